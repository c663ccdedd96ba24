//! Criticality classification.
//!
//! A protected process name is a hard block; a protected port is only a
//! warning. Both mark a record as critical for display.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Windows,
    Linux,
    Macos,
    /// Unrecognised host: every family's list applies.
    Other,
}

impl OsFamily {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            OsFamily::Windows
        } else if cfg!(target_os = "linux") {
            OsFamily::Linux
        } else if cfg!(target_os = "macos") {
            OsFamily::Macos
        } else {
            OsFamily::Other
        }
    }
}

const WINDOWS_PROCESSES: &[&str] = &[
    "system",
    "smss.exe",
    "csrss.exe",
    "wininit.exe",
    "services.exe",
    "lsass.exe",
    "svchost.exe",
    "winlogon.exe",
    "explorer.exe",
    "dwm.exe",
];

const LINUX_PROCESSES: &[&str] = &["init", "systemd", "kthreadd", "ksoftirqd", "kworker"];

const MACOS_PROCESSES: &[&str] = &["launchd", "kernel_task", "WindowServer"];

// ssh, dns, dhcp (x2), ntp, msrpc, netbios (x3), smb
static PROTECTED_PORTS: Lazy<BTreeSet<u16>> =
    Lazy::new(|| [22, 53, 67, 68, 123, 135, 137, 138, 139, 445].into_iter().collect());

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reason {
    ProtectedProcess { name: String },
    ProtectedPort { port: u16 },
}

impl Reason {
    pub fn message(&self) -> String {
        match self {
            Reason::ProtectedProcess { name } => format!("{name} is a protected system process"),
            Reason::ProtectedPort { port } => format!("port {port} belongs to a protected service"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub is_critical: bool,
    pub reason: Option<Reason>,
}

impl Verdict {
    /// Only a process-name match refuses termination.
    pub fn blocks_termination(&self) -> bool {
        matches!(self.reason, Some(Reason::ProtectedProcess { .. }))
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    family: OsFamily,
    processes: BTreeSet<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::for_family(OsFamily::current())
    }
}

impl Classifier {
    pub fn for_family(family: OsFamily) -> Self {
        let lists: &[&[&str]] = match family {
            OsFamily::Windows => &[WINDOWS_PROCESSES],
            OsFamily::Linux => &[LINUX_PROCESSES],
            OsFamily::Macos => &[MACOS_PROCESSES],
            OsFamily::Other => &[WINDOWS_PROCESSES, LINUX_PROCESSES, MACOS_PROCESSES],
        };
        let processes = lists
            .iter()
            .flat_map(|l| l.iter())
            .map(|n| n.to_lowercase())
            .collect();
        Self { family, processes }
    }

    pub fn family(&self) -> OsFamily {
        self.family
    }

    pub fn is_protected_process(&self, name: &str) -> bool {
        self.processes.contains(&name.to_lowercase())
    }

    pub fn is_protected_port(&self, port: u16) -> bool {
        PROTECTED_PORTS.contains(&port)
    }

    pub fn protected_processes(&self) -> impl Iterator<Item = &str> {
        self.processes.iter().map(String::as_str)
    }

    pub fn protected_ports(&self) -> impl Iterator<Item = u16> {
        PROTECTED_PORTS.iter().copied()
    }

    /// Pure function of (name, port) and the static tables.
    pub fn classify(&self, process_name: Option<&str>, port: Option<u16>) -> Verdict {
        if let Some(name) = process_name.filter(|n| self.is_protected_process(n)) {
            return Verdict {
                is_critical: true,
                reason: Some(Reason::ProtectedProcess {
                    name: name.to_string(),
                }),
            };
        }
        match port.filter(|p| self.is_protected_port(*p)) {
            Some(port) => Verdict {
                is_critical: true,
                reason: Some(Reason::ProtectedPort { port }),
            },
            None => Verdict {
                is_critical: false,
                reason: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_names_match_case_insensitively() {
        let c = Classifier::for_family(OsFamily::Windows);
        assert!(c.classify(Some("SVCHOST.EXE"), None).is_critical);
        assert!(c.classify(Some("System"), Some(8080)).blocks_termination());
        assert!(!c.classify(Some("svchost"), None).is_critical);
    }

    #[test]
    fn lists_are_partitioned_by_family() {
        let linux = Classifier::for_family(OsFamily::Linux);
        assert!(linux.is_protected_process("systemd"));
        assert!(!linux.is_protected_process("lsass.exe"));
        let mac = Classifier::for_family(OsFamily::Macos);
        assert!(mac.is_protected_process("windowserver"));
        assert!(!mac.is_protected_process("init"));
        let other = Classifier::for_family(OsFamily::Other);
        assert!(other.is_protected_process("kernel_task") && other.is_protected_process("csrss.exe"));
    }

    #[test]
    fn protected_port_is_a_warning_not_a_block() {
        let c = Classifier::for_family(OsFamily::Linux);
        let v = c.classify(Some("sshd"), Some(22));
        assert!(v.is_critical);
        assert!(!v.blocks_termination());
        assert_eq!(v.reason, Some(Reason::ProtectedPort { port: 22 }));
    }

    #[test]
    fn process_match_wins_over_port() {
        let c = Classifier::for_family(OsFamily::Linux);
        let v = c.classify(Some("systemd"), Some(53));
        assert_eq!(
            v.reason,
            Some(Reason::ProtectedProcess {
                name: "systemd".into()
            })
        );
    }

    #[test]
    fn missing_name_falls_back_to_port_table() {
        let c = Classifier::for_family(OsFamily::Windows);
        assert!(c.classify(None, Some(445)).is_critical);
        assert!(!c.classify(None, Some(8787)).is_critical);
        assert!(!c.classify(None, None).is_critical);
    }
}
