//! Guarded process termination.
//!
//! Checks run in a fixed order and stop at the first refusal:
//! missing process, unreadable identity, protected process, the agent
//! itself. Only then is a signal sent. Every call appends exactly one audit
//! entry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::{info, warn};

use crate::action_log::{ActionLog, AuditDraft};
use crate::classify::Classifier;
use crate::error::SignalError;
use crate::host::{HostOs, Signal};
use crate::types::{Action, KillPreview, KillRequest, KillResult, ProcessDetails, ResultCode};

#[derive(Debug, Clone)]
pub struct TerminationPolicy {
    /// How long a graceful signal gets before the attempt is reported failed.
    pub grace: Duration,
    /// How long to wait for a forced kill to be confirmed.
    pub kill_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(3),
            kill_wait: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
        }
    }
}

enum Check {
    Proceed(ProcessDetails),
    Refuse {
        code: ResultCode,
        message: String,
        process: Option<ProcessDetails>,
    },
}

pub struct Terminator {
    host: Arc<dyn HostOs>,
    classifier: Classifier,
    log: Arc<ActionLog>,
    policy: TerminationPolicy,
}

impl Terminator {
    pub fn new(
        host: Arc<dyn HostOs>,
        classifier: Classifier,
        log: Arc<ActionLog>,
        policy: TerminationPolicy,
    ) -> Self {
        Self {
            host,
            classifier,
            log,
            policy,
        }
    }

    pub fn log(&self) -> &Arc<ActionLog> {
        &self.log
    }

    fn check(&self, pid: u32) -> Check {
        let Some(process) = self.host.process(pid) else {
            return Check::Refuse {
                code: ResultCode::ProcessNotFound,
                message: format!(
                    "Process with PID {pid} no longer exists (may have already terminated)"
                ),
                process: None,
            };
        };
        // A pid we cannot name cannot be cleared against the protected list.
        let Some(name) = process.name.as_deref() else {
            return Check::Refuse {
                code: ResultCode::Failed,
                message: format!("Access denied to process {pid}"),
                process: Some(process),
            };
        };
        if self.classifier.classify(Some(name), None).blocks_termination() {
            return Check::Refuse {
                code: ResultCode::CriticalProcess,
                message: format!("Cannot terminate critical system process: {name} (PID: {pid})"),
                process: Some(process),
            };
        }
        if pid == self.host.self_pid() {
            return Check::Refuse {
                code: ResultCode::SelfTermination,
                message: "Cannot terminate the agent process itself".to_string(),
                process: Some(process),
            };
        }
        Check::Proceed(process)
    }

    fn port_warning(&self, port: Option<u16>) -> Option<String> {
        let port = port.filter(|p| self.classifier.is_protected_port(*p))?;
        Some(format!(
            "port {port} is used by a protected service; dependent services may break"
        ))
    }

    /// Dry run of the refusal checks: no signal, no audit entry.
    pub fn preview(&self, pid: u32, port: Option<u16>) -> KillPreview {
        let warnings: Vec<String> = self.port_warning(port).into_iter().collect();
        match self.check(pid) {
            Check::Proceed(process) => KillPreview {
                pid,
                allowed: true,
                refusal: None,
                process: Some(process),
                warnings,
            },
            Check::Refuse { code, process, .. } => KillPreview {
                pid,
                allowed: false,
                refusal: Some(code),
                process,
                warnings,
            },
        }
    }

    pub fn process_details(&self, pid: u32) -> Option<ProcessDetails> {
        self.host.process(pid)
    }

    fn wait_for_exit(&self, pid: u32, budget: Duration) -> bool {
        let deadline = Instant::now() + budget;
        loop {
            if !self.host.is_alive(pid) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(self.policy.poll_interval.min(deadline - now));
        }
    }

    /// Blocking: may wait up to the grace period (or kill wait).
    pub fn terminate(&self, req: KillRequest) -> KillResult {
        let KillRequest { pid, force, port } = req;
        let mut warnings: Vec<String> = self.port_warning(port).into_iter().collect();
        info!(pid, ?port, force, "termination requested");

        let (action, code, message, process_name) = match self.check(pid) {
            Check::Refuse {
                code,
                message,
                process,
            } => {
                let action = match code {
                    ResultCode::ProcessNotFound | ResultCode::Failed => Action::KillAttempted,
                    _ => Action::KillBlocked,
                };
                (action, code, message, process.and_then(|p| p.name))
            }
            Check::Proceed(process) => {
                let label = process
                    .name
                    .clone()
                    .unwrap_or_else(|| "<unknown>".to_string());
                let (action, signal, budget) = if force {
                    (Action::ForceKill, Signal::Kill, self.policy.kill_wait)
                } else {
                    (Action::Terminate, Signal::Terminate, self.policy.grace)
                };
                let (action, code, message) = match self.host.signal(pid, signal) {
                    Ok(()) if self.wait_for_exit(pid, budget) => (
                        action,
                        ResultCode::Success,
                        format!("Successfully terminated {label} (PID: {pid})"),
                    ),
                    Ok(()) if force => (
                        action,
                        ResultCode::Failed,
                        format!("Process {label} (PID: {pid}) did not terminate after a forced kill"),
                    ),
                    Ok(()) => (
                        action,
                        ResultCode::Failed,
                        format!(
                            "Process {label} (PID: {pid}) did not exit within {} ms; retry with force",
                            budget.as_millis()
                        ),
                    ),
                    Err(SignalError::Refused(_)) => (
                        Action::KillAttempted,
                        ResultCode::Failed,
                        format!(
                            "Access denied. Insufficient permissions to terminate process {pid}. Try running as administrator."
                        ),
                    ),
                    Err(SignalError::NoSuchProcess(_)) => (
                        Action::KillAttempted,
                        ResultCode::ProcessNotFound,
                        format!("Process with PID {pid} exited before it could be signalled"),
                    ),
                };
                (action, code, message, process.name)
            }
        };

        let appended = self.log.append(AuditDraft {
            action,
            target_process: process_name.clone(),
            target_pid: pid,
            target_port: port,
            result: code,
            actor: self.host.current_user(),
        });
        if let Some(e) = appended.sink_error {
            warnings.push(format!("audit trail not persisted: {e}"));
        }

        if code == ResultCode::Success {
            info!(pid, ?port, force, result = code.as_str(), "{message}");
        } else {
            warn!(pid, ?port, force, result = code.as_str(), "{message}");
        }

        KillResult {
            success: code == ResultCode::Success,
            message,
            result_code: code,
            pid,
            process_name,
            timestamp: Local::now(),
            warnings,
        }
    }
}
