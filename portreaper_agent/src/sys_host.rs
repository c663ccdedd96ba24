//! Real host backend: netstat2 for the socket table, sysinfo for process
//! metadata and signals.
//!
//! Every call builds its own short-lived `System` and refreshes only what it
//! needs, so concurrent snapshot requests share no mutable state.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use netstat2::{
    get_sockets_info, AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, TcpState,
};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind, Users};
use tracing::debug;

use crate::error::{HostError, SignalError};
use crate::host::{HostOs, RawSocket, Signal};
use crate::types::{ConnState, ProcessDetails, Protocol};

pub struct SystemHost {
    self_pid: u32,
    user: Option<String>,
}

impl SystemHost {
    pub fn new() -> Self {
        let self_pid = std::process::id();
        let user = owner_of(self_pid).or_else(env_user);
        Self { self_pid, user }
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

fn env_user() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|u| !u.is_empty())
}

fn metadata_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::nothing()
        .with_exe(UpdateKind::OnlyIfNotSet)
        .with_user(UpdateKind::OnlyIfNotSet)
}

fn refreshed(pids: &[Pid], kind: ProcessRefreshKind) -> System {
    let mut sys = System::new();
    sys.refresh_processes_specifics(ProcessesToUpdate::Some(pids), true, kind);
    sys
}

fn owner_of(pid: u32) -> Option<String> {
    let spid = Pid::from_u32(pid);
    let sys = refreshed(&[spid], metadata_kind());
    let uid = sys.process(spid)?.user_id()?.clone();
    let users = Users::new_with_refreshed_list();
    users.get_user_by_id(&uid).map(|u| u.name().to_string())
}

fn endpoint(addr: IpAddr, port: u16) -> Option<SocketAddr> {
    // Unconnected peers are reported as 0.0.0.0:0 / [::]:0.
    if addr.is_unspecified() && port == 0 {
        None
    } else {
        Some(SocketAddr::new(addr, port))
    }
}

fn map_tcp_state(st: &TcpState) -> ConnState {
    match st {
        TcpState::Listen => ConnState::Listen,
        TcpState::Established => ConnState::Established,
        TcpState::SynSent => ConnState::SynSent,
        TcpState::SynReceived => ConnState::SynRecv,
        TcpState::FinWait1 => ConnState::FinWait1,
        TcpState::FinWait2 => ConnState::FinWait2,
        TcpState::TimeWait => ConnState::TimeWait,
        TcpState::Closed => ConnState::Close,
        TcpState::CloseWait => ConnState::CloseWait,
        TcpState::LastAck => ConnState::LastAck,
        TcpState::Closing => ConnState::Closing,
        TcpState::DeleteTcb => ConnState::DeleteTcb,
        #[allow(unreachable_patterns)]
        _ => ConnState::Unknown,
    }
}

impl HostOs for SystemHost {
    fn sockets(&self, protocol: Protocol) -> Result<Vec<RawSocket>, HostError> {
        let af = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
        let proto = match protocol {
            Protocol::Tcp => ProtocolFlags::TCP,
            Protocol::Udp => ProtocolFlags::UDP,
        };
        let infos = get_sockets_info(af, proto).map_err(|e| HostError::SocketTable {
            protocol,
            message: e.to_string(),
        })?;
        let rows = infos
            .into_iter()
            .map(|si| {
                let pids = si.associated_pids;
                match si.protocol_socket_info {
                    ProtocolSocketInfo::Tcp(tcp) => RawSocket {
                        protocol: Protocol::Tcp,
                        local: Some(SocketAddr::new(tcp.local_addr, tcp.local_port)),
                        remote: endpoint(tcp.remote_addr, tcp.remote_port),
                        state: map_tcp_state(&tcp.state),
                        pids,
                    },
                    ProtocolSocketInfo::Udp(udp) => RawSocket {
                        protocol: Protocol::Udp,
                        local: Some(SocketAddr::new(udp.local_addr, udp.local_port)),
                        remote: None,
                        state: ConnState::None,
                        pids,
                    },
                }
            })
            .collect::<Vec<_>>();
        debug!(%protocol, rows = rows.len(), "socket table read");
        Ok(rows)
    }

    fn process(&self, pid: u32) -> Option<ProcessDetails> {
        self.processes(&[pid]).remove(&pid)
    }

    fn processes(&self, pids: &[u32]) -> HashMap<u32, ProcessDetails> {
        if pids.is_empty() {
            return HashMap::new();
        }
        let wanted: Vec<Pid> = pids.iter().map(|&p| Pid::from_u32(p)).collect();
        let sys = refreshed(&wanted, metadata_kind());
        let users = Users::new_with_refreshed_list();
        wanted
            .iter()
            .filter_map(|spid| {
                let p = sys.process(*spid)?;
                let name = p.name().to_string_lossy().into_owned();
                let details = ProcessDetails {
                    pid: spid.as_u32(),
                    name: (!name.is_empty()).then_some(name),
                    path: p.exe().map(|e| e.display().to_string()),
                    user: p
                        .user_id()
                        .and_then(|uid| users.get_user_by_id(uid))
                        .map(|u| u.name().to_string()),
                };
                Some((spid.as_u32(), details))
            })
            .collect()
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<(), SignalError> {
        let spid = Pid::from_u32(pid);
        let sys = refreshed(&[spid], ProcessRefreshKind::nothing());
        let p = sys.process(spid).ok_or(SignalError::NoSuchProcess(pid))?;
        let delivered = match signal {
            // Platforms without SIGTERM (Windows) fall back to TerminateProcess.
            Signal::Terminate => p.kill_with(sysinfo::Signal::Term).unwrap_or_else(|| p.kill()),
            Signal::Kill => p.kill(),
        };
        if delivered {
            Ok(())
        } else if self.is_alive(pid) {
            Err(SignalError::Refused(pid))
        } else {
            Err(SignalError::NoSuchProcess(pid))
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        let spid = Pid::from_u32(pid);
        let sys = refreshed(&[spid], ProcessRefreshKind::nothing());
        sys.process(spid)
            .is_some_and(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
    }

    fn self_pid(&self) -> u32 {
        self.self_pid
    }

    fn current_user(&self) -> Option<String> {
        self.user.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconnected_peer_is_absent() {
        assert_eq!(endpoint(IpAddr::from([0, 0, 0, 0]), 0), None);
        let peer = endpoint(IpAddr::from([10, 0, 0, 2]), 443).unwrap();
        assert_eq!(peer.to_string(), "10.0.0.2:443");
    }

    #[test]
    fn tcp_states_map_to_kernel_names() {
        assert_eq!(map_tcp_state(&TcpState::SynReceived).as_str(), "SYN_RECV");
        assert_eq!(map_tcp_state(&TcpState::Closed).as_str(), "CLOSE");
        assert_eq!(map_tcp_state(&TcpState::TimeWait).as_str(), "TIME_WAIT");
    }

    #[test]
    fn own_process_is_visible_and_alive() {
        let host = SystemHost::new();
        let me = host.self_pid();
        assert!(host.is_alive(me));
        let details = host.process(me).expect("own process visible");
        assert_eq!(details.pid, me);
        assert!(details.name.is_some());
    }
}
