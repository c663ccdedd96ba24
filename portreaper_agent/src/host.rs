//! OS collaborator seam: socket table, process metadata and process control.
//!
//! The core never touches the OS directly; it goes through [`HostOs`] so that
//! tests can swap in [`crate::fake_host::FakeHost`].

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::error::{HostError, SignalError};
use crate::types::{ConnState, ProcessDetails, Protocol};

/// One row of the kernel connection table, before process resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSocket {
    pub protocol: Protocol,
    pub local: Option<SocketAddr>,
    pub remote: Option<SocketAddr>,
    pub state: ConnState,
    /// Owning pids; empty when the OS hides them (permission-restricted).
    pub pids: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Cooperative shutdown request (SIGTERM or platform equivalent).
    Terminate,
    /// Unconditional kill (SIGKILL / TerminateProcess).
    Kill,
}

pub trait HostOs: Send + Sync {
    /// Socket table rows for one protocol. Freshly read on every call.
    fn sockets(&self, protocol: Protocol) -> Result<Vec<RawSocket>, HostError>;

    /// Metadata for a single pid; `None` if no such process exists.
    fn process(&self, pid: u32) -> Option<ProcessDetails>;

    /// Metadata for many pids at once. Missing pids are simply absent.
    fn processes(&self, pids: &[u32]) -> HashMap<u32, ProcessDetails> {
        pids.iter()
            .filter_map(|&pid| self.process(pid).map(|d| (pid, d)))
            .collect()
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<(), SignalError>;

    /// True while the process exists and is not a zombie.
    fn is_alive(&self, pid: u32) -> bool;

    /// Pid of the process serving the API.
    fn self_pid(&self) -> u32;

    /// Best-effort identity of whoever runs the agent.
    fn current_user(&self) -> Option<String> {
        std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .ok()
            .filter(|u| !u.is_empty())
    }
}
