//! Data types handed to API clients.
//! Field names here are the JSON field names clients see.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol '{other}'")),
        }
    }
}

/// Socket state as reported by the kernel connection table.
/// UDP sockets carry no handshake state and always report `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnState {
    Listen,
    Established,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Closing,
    DeleteTcb,
    None,
    Unknown,
}

impl ConnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnState::Listen => "LISTEN",
            ConnState::Established => "ESTABLISHED",
            ConnState::SynSent => "SYN_SENT",
            ConnState::SynRecv => "SYN_RECV",
            ConnState::FinWait1 => "FIN_WAIT1",
            ConnState::FinWait2 => "FIN_WAIT2",
            ConnState::TimeWait => "TIME_WAIT",
            ConnState::Close => "CLOSE",
            ConnState::CloseWait => "CLOSE_WAIT",
            ConnState::LastAck => "LAST_ACK",
            ConnState::Closing => "CLOSING",
            ConnState::DeleteTcb => "DELETE_TCB",
            ConnState::None => "NONE",
            ConnState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        const ALL: [ConnState; 14] = [
            ConnState::Listen,
            ConnState::Established,
            ConnState::SynSent,
            ConnState::SynRecv,
            ConnState::FinWait1,
            ConnState::FinWait2,
            ConnState::TimeWait,
            ConnState::Close,
            ConnState::CloseWait,
            ConnState::LastAck,
            ConnState::Closing,
            ConnState::DeleteTcb,
            ConnState::None,
            ConnState::Unknown,
        ];
        ALL.into_iter()
            .find(|st| st.as_str() == wanted)
            .ok_or_else(|| format!("unknown connection state '{}'", s.trim()))
    }
}

/// One observed socket, joined with its owning process when visible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortRecord {
    pub port: u16,
    pub protocol: Protocol,
    pub state: ConnState,
    pub local_address: Option<String>,
    pub remote_address: Option<String>,
    pub pid: Option<u32>,
    pub process_name: Option<String>,
    pub process_path: Option<String>,
    pub is_critical: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_tcp_ports: usize,
    pub total_udp_ports: usize,
    pub listening_ports: usize,
    pub established_connections: usize,
    pub unique_processes: usize,
}

/// Listing filters; every supplied field must match (AND).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortFilter {
    pub port: Option<u16>,
    pub protocol: Option<Protocol>,
    /// Case-insensitive substring of the process name.
    pub process: Option<String>,
    pub state: Option<ConnState>,
}

impl PortFilter {
    pub fn is_empty(&self) -> bool {
        self.port.is_none()
            && self.protocol.is_none()
            && self.process.as_deref().is_none_or(str::is_empty)
            && self.state.is_none()
    }

    pub fn matches(&self, rec: &PortRecord) -> bool {
        if self.port.is_some_and(|p| p != rec.port) {
            return false;
        }
        if self.protocol.is_some_and(|p| p != rec.protocol) {
            return false;
        }
        if self.state.is_some_and(|s| s != rec.state) {
            return false;
        }
        match self.process.as_deref() {
            Some(needle) if !needle.is_empty() => rec
                .process_name
                .as_deref()
                .is_some_and(|name| name.to_lowercase().contains(&needle.to_lowercase())),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillRequest {
    pub pid: u32,
    #[serde(default)]
    pub force: bool,
    /// Only used to correlate the audit entry; never used for targeting.
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Success,
    ProcessNotFound,
    CriticalProcess,
    SelfTermination,
    Failed,
}

impl ResultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Success => "SUCCESS",
            ResultCode::ProcessNotFound => "PROCESS_NOT_FOUND",
            ResultCode::CriticalProcess => "CRITICAL_PROCESS",
            ResultCode::SelfTermination => "SELF_TERMINATION",
            ResultCode::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillResult {
    pub success: bool,
    pub message: String,
    pub result_code: ResultCode,
    pub pid: u32,
    pub process_name: Option<String>,
    pub timestamp: DateTime<Local>,
    // protected-port advisories and audit-sink failures; never change result_code
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    KillBlocked,
    Terminate,
    ForceKill,
    KillAttempted,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::KillBlocked => "KILL_BLOCKED",
            Action::Terminate => "TERMINATE",
            Action::ForceKill => "FORCE_KILL",
            Action::KillAttempted => "KILL_ATTEMPTED",
        }
    }
}

/// Immutable audit record. `seq` is assigned by the log on append and gives
/// the total insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: DateTime<Local>,
    pub action: Action,
    pub target_process: Option<String>,
    pub target_pid: u32,
    pub target_port: Option<u16>,
    pub result: ResultCode,
    pub actor: Option<String>,
}

/// Process metadata as far as the OS lets us read it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDetails {
    pub pid: u32,
    pub name: Option<String>,
    pub path: Option<String>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortView {
    pub ports: Vec<PortRecord>,
    pub stats: Stats,
}

/// Outcome of the pre-kill checks, used by UIs to ask for confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillPreview {
    pub pid: u32,
    pub allowed: bool,
    pub refusal: Option<ResultCode>,
    pub process: Option<ProcessDetails>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
