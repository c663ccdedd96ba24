//! Agent settings: defaults, then `PORTREAPER_*` environment variables, then
//! command-line flags.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::action_log::RotationPolicy;
use crate::error::ConfigError;
use crate::terminate::TerminationPolicy;

pub const ENV_PREFIX: &str = "PORTREAPER_";
pub const DEFAULT_PORT: u16 = 8787;

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub host: String,
    pub port: u16,
    pub refresh_interval: Duration,
    /// `None` keeps the audit trail in memory only.
    pub log_file: Option<PathBuf>,
    pub log_max_size: u64,
    pub log_backup_count: usize,
    pub log_capacity: usize,
    pub grace: Duration,
    pub kill_wait: Duration,
    pub token: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            refresh_interval: Duration::from_secs(5),
            log_file: Some(PathBuf::from("logs/portreaper.log")),
            log_max_size: 10 * 1024 * 1024,
            log_backup_count: 5,
            log_capacity: 1000,
            grace: Duration::from_millis(3000),
            kill_wait: Duration::from_millis(2000),
            token: None,
        }
    }
}

fn ranged<T>(key: &str, raw: Option<String>, lo: T, hi: T, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Copy + std::fmt::Display,
{
    let Some(raw) = raw else { return default };
    match raw.trim().parse::<T>() {
        Ok(v) if v >= lo && v <= hi => v,
        _ => {
            warn!("{ENV_PREFIX}{key}={raw:?} outside {lo}..={hi}; using {default}");
            default
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// `lookup` receives un-prefixed keys (`HOST`, `PORT`, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let host = match lookup("HOST") {
            Some(h) if h.trim().is_empty() => return Err(ConfigError::EmptyHost),
            Some(h) => h.trim().to_string(),
            None => d.host,
        };
        let log_file = match lookup("LOG_FILE") {
            Some(p) if p.trim().is_empty() => None,
            Some(p) => Some(PathBuf::from(p.trim())),
            None => d.log_file,
        };
        Ok(Self {
            host,
            port: ranged("PORT", lookup("PORT"), 1, u16::MAX, d.port),
            refresh_interval: Duration::from_secs(ranged(
                "REFRESH_INTERVAL",
                lookup("REFRESH_INTERVAL"),
                1,
                60,
                d.refresh_interval.as_secs(),
            )),
            log_file,
            log_max_size: ranged(
                "LOG_MAX_SIZE",
                lookup("LOG_MAX_SIZE"),
                1024,
                u64::MAX,
                d.log_max_size,
            ),
            log_backup_count: ranged(
                "LOG_BACKUP_COUNT",
                lookup("LOG_BACKUP_COUNT"),
                1,
                10,
                d.log_backup_count,
            ),
            log_capacity: ranged(
                "LOG_CAPACITY",
                lookup("LOG_CAPACITY"),
                1,
                1_000_000,
                d.log_capacity,
            ),
            grace: Duration::from_millis(ranged(
                "GRACE_MS",
                lookup("GRACE_MS"),
                0,
                60_000,
                d.grace.as_millis() as u64,
            )),
            kill_wait: Duration::from_millis(ranged(
                "KILL_WAIT_MS",
                lookup("KILL_WAIT_MS"),
                0,
                60_000,
                d.kill_wait.as_millis() as u64,
            )),
            token: lookup("TOKEN").filter(|t| !t.is_empty()),
        })
    }

    pub fn termination_policy(&self) -> TerminationPolicy {
        TerminationPolicy {
            grace: self.grace,
            kill_wait: self.kill_wait,
            ..TerminationPolicy::default()
        }
    }

    pub fn rotation(&self) -> RotationPolicy {
        RotationPolicy {
            max_bytes: self.log_max_size,
            backups: self.log_backup_count,
        }
    }

    pub fn apply_args(&mut self, args: &CliArgs) {
        if let Some(h) = &args.host {
            self.host = h.clone();
        }
        if let Some(p) = args.port {
            self.port = p;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub help: bool,
}

pub fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--port PORT|-p PORT] [--host ADDR|-H ADDR]\n\
         Environment: {ENV_PREFIX}HOST, {ENV_PREFIX}PORT, {ENV_PREFIX}LOG_FILE, \
         {ENV_PREFIX}GRACE_MS, {ENV_PREFIX}TOKEN, ..."
    )
}

/// `Err` carries a usage error ready to print.
pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<CliArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "portreaper_agent".into());
    let mut out = CliArgs::default();
    let parse_port = |v: Option<String>| -> Result<u16, String> {
        v.as_deref()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| format!("invalid port\n{}", usage(&prog)))
    };
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => out.help = true,
            "--port" | "-p" => out.port = Some(parse_port(it.next())?),
            "--host" | "-H" => {
                out.host = Some(
                    it.next()
                        .filter(|h| !h.trim().is_empty())
                        .ok_or_else(|| format!("missing host\n{}", usage(&prog)))?,
                )
            }
            _ if arg.starts_with("--port=") => {
                out.port = Some(parse_port(arg.split_once('=').map(|(_, v)| v.to_string()))?)
            }
            _ if arg.starts_with("--host=") => {
                out.host = Some(
                    arg.split_once('=')
                        .map(|(_, v)| v.to_string())
                        .filter(|h| !h.trim().is_empty())
                        .ok_or_else(|| format!("missing host\n{}", usage(&prog)))?,
                )
            }
            _ => return Err(format!("unexpected argument '{arg}'\n{}", usage(&prog))),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    fn args(v: &[&str]) -> Vec<String> {
        std::iter::once("agent")
            .chain(v.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_without_env() {
        let cfg = AgentConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, AgentConfig::default());
        assert_eq!(cfg.port, 8787);
        assert_eq!(cfg.termination_policy().grace, Duration::from_secs(3));
    }

    #[test]
    fn env_overrides_and_range_checks() {
        let cfg = AgentConfig::from_lookup(lookup(&[
            ("HOST", " 0.0.0.0 "),
            ("PORT", "9100"),
            ("REFRESH_INTERVAL", "600"),
            ("LOG_BACKUP_COUNT", "3"),
            ("LOG_FILE", ""),
            ("TOKEN", "s3cret"),
        ]))
        .unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.refresh_interval, Duration::from_secs(5));
        assert_eq!(cfg.rotation().backups, 3);
        assert_eq!(cfg.log_file, None);
        assert_eq!(cfg.token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn empty_host_is_rejected() {
        assert_eq!(
            AgentConfig::from_lookup(lookup(&[("HOST", "  ")])),
            Err(ConfigError::EmptyHost)
        );
    }

    #[test]
    fn port_long_short_and_assign() {
        assert_eq!(parse_args(args(&["--port", "9001"])).unwrap().port, Some(9001));
        assert_eq!(parse_args(args(&["-p", "9002"])).unwrap().port, Some(9002));
        assert_eq!(parse_args(args(&["--port=9003"])).unwrap().port, Some(9003));
        assert_eq!(parse_args(args(&[])).unwrap(), CliArgs::default());
        assert!(parse_args(args(&["-p", "notaport"])).is_err());
    }

    #[test]
    fn host_flags_and_help() {
        let a = parse_args(args(&["-H", "0.0.0.0", "-p", "0"])).unwrap();
        assert_eq!(a.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(a.port, Some(0));
        let a = parse_args(args(&["--host=::1"])).unwrap();
        assert_eq!(a.host.as_deref(), Some("::1"));
        assert!(parse_args(args(&["--help"])).unwrap().help);
        for empty in [&["--host", ""][..], &["--host="], &["-H", "  "]] {
            let err = parse_args(args(empty)).unwrap_err();
            assert!(err.starts_with("missing host"), "{err}");
        }
        assert!(parse_args(args(&["--bogus"])).unwrap_err().contains("Usage:"));
    }

    #[test]
    fn args_override_env() {
        let mut cfg = AgentConfig::from_lookup(lookup(&[("PORT", "9100")])).unwrap();
        cfg.apply_args(&CliArgs {
            port: Some(0),
            ..Default::default()
        });
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.host, "127.0.0.1");
    }
}
