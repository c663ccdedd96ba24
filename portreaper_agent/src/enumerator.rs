//! Port enumeration: reads the socket table and resolves owning processes.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use tracing::warn;

use crate::host::{HostOs, RawSocket};
use crate::types::{ConnState, ProcessDetails, Protocol};

/// A socket table row joined with whatever the OS told us about its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub protocol: Protocol,
    pub local: SocketAddr,
    pub remote: Option<SocketAddr>,
    pub state: ConnState,
    pub pid: Option<u32>,
    /// `None` when the pid is unknown, exited, or unreadable.
    pub process: Option<ProcessDetails>,
}

impl Connection {
    pub fn port(&self) -> u16 {
        self.local.port()
    }

    pub fn process_name(&self) -> Option<&str> {
        self.process.as_ref().and_then(|p| p.name.as_deref())
    }
}

#[derive(Hash, PartialEq, Eq)]
struct DedupKey {
    port: u16,
    protocol: Protocol,
    // UDP rows are keyed without state.
    state: Option<ConnState>,
    pid: Option<u32>,
}

/// One entry per (row, owner); rows without a visible owner get `pid = None`.
fn explode(raw: RawSocket) -> impl Iterator<Item = (RawSocket, Option<u32>)> {
    let owners: Vec<Option<u32>> = if raw.pids.is_empty() {
        vec![None]
    } else {
        raw.pids.iter().copied().map(Some).collect()
    };
    owners.into_iter().map(move |pid| (raw.clone(), pid))
}

/// Fresh snapshot of every TCP and UDP socket. A failing protocol is logged
/// and skipped; unresolvable owners degrade to `None`.
pub fn enumerate(host: &dyn HostOs) -> Vec<Connection> {
    let mut rows: Vec<(RawSocket, Option<u32>)> = Vec::new();
    for protocol in [Protocol::Tcp, Protocol::Udp] {
        match host.sockets(protocol) {
            Ok(raw) => rows.extend(raw.into_iter().flat_map(explode)),
            Err(e) => warn!("skipping {protocol} sockets: {e}"),
        }
    }

    let mut seen: HashSet<DedupKey> = HashSet::with_capacity(rows.len());
    let rows: Vec<(RawSocket, Option<u32>, SocketAddr)> = rows
        .into_iter()
        .filter_map(|(raw, pid)| {
            let local = raw.local?;
            let key = DedupKey {
                port: local.port(),
                protocol: raw.protocol,
                state: (raw.protocol == Protocol::Tcp).then_some(raw.state),
                pid,
            };
            seen.insert(key).then_some((raw, pid, local))
        })
        .collect();

    // Per-snapshot cache: each pid is looked up once and then dropped.
    let mut pids: Vec<u32> = rows.iter().filter_map(|(_, pid, _)| *pid).collect();
    pids.sort_unstable();
    pids.dedup();
    let owners: HashMap<u32, ProcessDetails> = host.processes(&pids);

    rows.into_iter()
        .map(|(raw, pid, local)| Connection {
            protocol: raw.protocol,
            local,
            remote: raw.remote,
            state: raw.state,
            pid,
            process: pid.and_then(|p| owners.get(&p).cloned()),
        })
        .collect()
}
