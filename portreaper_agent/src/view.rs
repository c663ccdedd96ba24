//! Port view: snapshot -> classified records -> filtered listing + stats.

use crate::classify::Classifier;
use crate::enumerator::{enumerate, Connection};
use crate::host::HostOs;
use crate::types::{ConnState, PortFilter, PortRecord, PortView, Protocol, Stats};

pub fn to_record(conn: Connection, classifier: &Classifier) -> PortRecord {
    let port = conn.port();
    let is_critical = classifier.classify(conn.process_name(), Some(port)).is_critical;
    let (process_name, process_path) = match conn.process {
        Some(p) => (p.name, p.path),
        None => (None, None),
    };
    PortRecord {
        port,
        protocol: conn.protocol,
        state: conn.state,
        local_address: Some(conn.local.to_string()),
        remote_address: conn.remote.map(|r| r.to_string()),
        pid: conn.pid,
        process_name,
        process_path,
        is_critical,
    }
}

pub fn compute_stats(records: &[PortRecord]) -> Stats {
    let mut pids: Vec<u32> = records.iter().filter_map(|r| r.pid).collect();
    pids.sort_unstable();
    pids.dedup();
    Stats {
        total_tcp_ports: records.iter().filter(|r| r.protocol == Protocol::Tcp).count(),
        total_udp_ports: records.iter().filter(|r| r.protocol == Protocol::Udp).count(),
        listening_ports: records.iter().filter(|r| r.state == ConnState::Listen).count(),
        established_connections: records
            .iter()
            .filter(|r| r.state == ConnState::Established)
            .count(),
        unique_processes: pids.len(),
    }
}

/// Stats always describe the whole snapshot; the filter only narrows `ports`.
/// No ordering is imposed here.
pub fn build_view(host: &dyn HostOs, classifier: &Classifier, filter: &PortFilter) -> PortView {
    let records: Vec<PortRecord> = enumerate(host)
        .into_iter()
        .map(|c| to_record(c, classifier))
        .collect();
    let stats = compute_stats(&records);
    let ports = if filter.is_empty() {
        records
    } else {
        records.into_iter().filter(|r| filter.matches(r)).collect()
    };
    PortView { ports, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::OsFamily;
    use crate::fake_host::FakeHost;

    fn host() -> FakeHost {
        let host = FakeHost::new(1);
        host.add_process(100, "sshd")
            .add_process(200, "node")
            .add_process(300, "systemd");
        host.listen_tcp(100, 22)
            .listen_tcp(200, 8787)
            .add_socket(
                Protocol::Tcp,
                "127.0.0.1:8787",
                Some("127.0.0.1:50000"),
                ConnState::Established,
                &[200],
            )
            .add_socket(Protocol::Udp, "0.0.0.0:8787", None, ConnState::None, &[200])
            .add_socket(Protocol::Udp, "0.0.0.0:5353", None, ConnState::None, &[300])
            .add_socket(Protocol::Tcp, "0.0.0.0:9999", None, ConnState::Listen, &[]);
        host
    }

    fn classifier() -> Classifier {
        Classifier::for_family(OsFamily::Linux)
    }

    #[test]
    fn stats_cover_full_snapshot() {
        let h = host();
        let all = build_view(&h, &classifier(), &PortFilter::default());
        assert_eq!(
            all.stats,
            Stats {
                total_tcp_ports: 4,
                total_udp_ports: 2,
                listening_ports: 3,
                established_connections: 1,
                unique_processes: 3,
            }
        );
        let narrowed = build_view(
            &h,
            &classifier(),
            &PortFilter {
                port: Some(8787),
                ..Default::default()
            },
        );
        assert_eq!(narrowed.stats, all.stats);
        assert_eq!(narrowed.ports.len(), 3);
    }

    #[test]
    fn protocol_and_port_filters_and_together() {
        let h = host();
        let v = build_view(
            &h,
            &classifier(),
            &PortFilter {
                port: Some(8787),
                protocol: Some(Protocol::Tcp),
                ..Default::default()
            },
        );
        assert_eq!(v.ports.len(), 2);
        assert!(v
            .ports
            .iter()
            .all(|r| r.port == 8787 && r.protocol == Protocol::Tcp));
    }

    #[test]
    fn state_filter_is_exact() {
        let h = host();
        let v = build_view(
            &h,
            &classifier(),
            &PortFilter {
                state: Some(ConnState::Established),
                ..Default::default()
            },
        );
        assert_eq!(v.ports.len(), 1);
        assert_eq!(v.ports[0].remote_address.as_deref(), Some("127.0.0.1:50000"));
    }

    #[test]
    fn criticality_from_name_or_port() {
        let h = host();
        let v = build_view(&h, &classifier(), &PortFilter::default());
        let by_port = |port: u16| v.ports.iter().find(|r| r.port == port).unwrap();
        assert!(by_port(22).is_critical); // protected port
        assert!(by_port(5353).is_critical); // systemd
        assert!(!by_port(9999).is_critical);
        assert_eq!(by_port(9999).pid, None);
        assert_eq!(by_port(9999).process_name, None);
        assert_eq!(by_port(22).process_path.as_deref(), Some("/usr/bin/sshd"));
    }
}
