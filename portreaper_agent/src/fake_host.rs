//! Deterministic in-memory host for tests and demos.
//!
//! Processes own sockets; a process that exits takes its sockets with it, so
//! a snapshot taken after a successful kill no longer lists them.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};

use crate::error::{HostError, SignalError};
use crate::host::{HostOs, RawSocket, Signal};
use crate::types::{ConnState, ProcessDetails, Protocol};

#[derive(Debug, Clone)]
struct FakeProcess {
    details: ProcessDetails,
    /// Name visible to metadata lookups; `false` models an access-denied read.
    name_visible: bool,
    /// Exits on `Signal::Terminate`.
    honors_terminate: bool,
    /// Every signal is refused by the OS.
    protected_by_os: bool,
}

#[derive(Debug, Default)]
struct Inner {
    processes: BTreeMap<u32, FakeProcess>,
    sockets: Vec<RawSocket>,
    failing: HashSet<Protocol>,
    signals: Vec<(u32, Signal)>,
}

pub struct FakeHost {
    self_pid: u32,
    user: Option<String>,
    inner: Mutex<Inner>,
}

impl FakeHost {
    pub fn new(self_pid: u32) -> Self {
        Self {
            self_pid,
            user: Some("tester".to_string()),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not wedge the rest of the suite.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a live process that exits on a graceful signal.
    pub fn add_process(&self, pid: u32, name: &str) -> &Self {
        self.lock().processes.insert(
            pid,
            FakeProcess {
                details: ProcessDetails {
                    pid,
                    name: Some(name.to_string()),
                    path: Some(format!("/usr/bin/{name}")),
                    user: Some("tester".to_string()),
                },
                name_visible: true,
                honors_terminate: true,
                protected_by_os: false,
            },
        );
        self
    }

    /// The process ignores graceful signals and only dies on `Signal::Kill`.
    pub fn ignore_terminate(&self, pid: u32) -> &Self {
        if let Some(p) = self.lock().processes.get_mut(&pid) {
            p.honors_terminate = false;
        }
        self
    }

    /// The OS refuses every signal to this process (e.g. owned by root).
    pub fn deny_signals(&self, pid: u32) -> &Self {
        if let Some(p) = self.lock().processes.get_mut(&pid) {
            p.protected_by_os = true;
        }
        self
    }

    /// Metadata lookups see the pid but cannot read its name or path.
    pub fn hide_name(&self, pid: u32) -> &Self {
        if let Some(p) = self.lock().processes.get_mut(&pid) {
            p.name_visible = false;
        }
        self
    }

    /// Socket-table reads for this protocol fail.
    pub fn fail_protocol(&self, protocol: Protocol) -> &Self {
        self.lock().failing.insert(protocol);
        self
    }

    pub fn add_socket(
        &self,
        protocol: Protocol,
        local: &str,
        remote: Option<&str>,
        state: ConnState,
        pids: &[u32],
    ) -> &Self {
        let parse = |s: &str| s.parse::<SocketAddr>().ok();
        self.lock().sockets.push(RawSocket {
            protocol,
            local: parse(local),
            remote: remote.and_then(parse),
            state,
            pids: pids.to_vec(),
        });
        self
    }

    pub fn listen_tcp(&self, pid: u32, port: u16) -> &Self {
        self.add_socket(
            Protocol::Tcp,
            &format!("0.0.0.0:{port}"),
            None,
            ConnState::Listen,
            &[pid],
        )
    }

    /// Signals delivered so far, in order.
    pub fn signals(&self) -> Vec<(u32, Signal)> {
        self.lock().signals.clone()
    }

    fn reap(inner: &mut Inner, pid: u32) {
        inner.processes.remove(&pid);
        inner.sockets.retain_mut(|s| {
            let owned = s.pids.contains(&pid);
            s.pids.retain(|p| *p != pid);
            // A socket whose last owner died is closed with it.
            !(owned && s.pids.is_empty())
        });
    }
}

impl HostOs for FakeHost {
    fn sockets(&self, protocol: Protocol) -> Result<Vec<RawSocket>, HostError> {
        let inner = self.lock();
        if inner.failing.contains(&protocol) {
            return Err(HostError::SocketTable {
                protocol,
                message: "simulated failure".to_string(),
            });
        }
        Ok(inner
            .sockets
            .iter()
            .filter(|s| s.protocol == protocol)
            .cloned()
            .collect())
    }

    fn process(&self, pid: u32) -> Option<ProcessDetails> {
        let inner = self.lock();
        let p = inner.processes.get(&pid)?;
        if p.name_visible {
            Some(p.details.clone())
        } else {
            Some(ProcessDetails {
                pid,
                ..Default::default()
            })
        }
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<(), SignalError> {
        let mut inner = self.lock();
        let p = inner
            .processes
            .get(&pid)
            .cloned()
            .ok_or(SignalError::NoSuchProcess(pid))?;
        if p.protected_by_os {
            return Err(SignalError::Refused(pid));
        }
        inner.signals.push((pid, signal));
        if signal == Signal::Kill || p.honors_terminate {
            Self::reap(&mut inner, pid);
        }
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.lock().processes.contains_key(&pid)
    }

    fn self_pid(&self) -> u32 {
        self.self_pid
    }

    fn current_user(&self) -> Option<String> {
        self.user.clone()
    }
}
