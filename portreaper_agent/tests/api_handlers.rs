//! Handler-level tests: extractors are built by hand, no socket involved.
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use portreaper_agent::action_log::ActionLog;
use portreaper_agent::api::{self, KillQuery, LogsQuery, PortQuery};
use portreaper_agent::classify::{Classifier, OsFamily};
use portreaper_agent::error::ApiError;
use portreaper_agent::fake_host::FakeHost;
use portreaper_agent::host::HostOs;
use portreaper_agent::state::AppState;
use portreaper_agent::terminate::TerminationPolicy;
use portreaper_agent::types::{KillRequest, Protocol, ResultCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn state() -> (Arc<FakeHost>, AppState) {
    let host = Arc::new(FakeHost::new(2));
    host.add_process(2, "portreaper_agent")
        .add_process(30, "node")
        .listen_tcp(30, 3000)
        .add_process(31, "postgres")
        .listen_tcp(31, 5432)
        .add_process(32, "secret")
        .hide_name(32);
    let policy = TerminationPolicy {
        grace: std::time::Duration::from_millis(20),
        kill_wait: std::time::Duration::from_millis(20),
        poll_interval: std::time::Duration::from_millis(5),
    };
    let st = AppState::new(
        host.clone(),
        Classifier::for_family(OsFamily::Linux),
        Arc::new(ActionLog::in_memory(50)),
        policy,
    );
    (host, st)
}

#[tokio::test]
async fn ports_are_sorted_and_filterable() {
    let (_h, st) = state();
    let Json(all) = api::ports(State(st.clone()), Query(PortQuery::default()))
        .await
        .expect("ports");
    assert_eq!(
        all.iter().map(|r| r.port).collect::<Vec<_>>(),
        vec![3000, 5432]
    );
    let q = PortQuery {
        process: Some("POST".into()),
        protocol: Some("tcp".into()),
        ..Default::default()
    };
    let Json(pg) = api::ports(State(st), Query(q)).await.expect("ports");
    assert_eq!(pg.len(), 1);
    assert_eq!(pg[0].protocol, Protocol::Tcp);
    assert_eq!(pg[0].pid, Some(31));
}

#[tokio::test]
async fn bad_filter_values_are_rejected() {
    let (_h, st) = state();
    let q = PortQuery {
        protocol: Some("sctp".into()),
        ..Default::default()
    };
    let err = api::ports(State(st.clone()), Query(q)).await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
    let q = PortQuery {
        state: Some("HALF_OPEN".into()),
        ..Default::default()
    };
    let err = api::snapshot(State(st), Query(q)).await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
}

#[tokio::test]
async fn kill_then_logs() {
    let (host, st) = state();
    let Json(r) = api::kill_pid(
        State(st.clone()),
        Path(30),
        Query(KillQuery {
            force: false,
            port: Some(3000),
        }),
    )
    .await
    .expect("kill");
    assert!(r.success);
    assert!(!host.is_alive(30));

    let Json(r) = api::kill(
        State(st.clone()),
        Json(KillRequest {
            pid: 2,
            force: true,
            port: None,
        }),
    )
    .await
    .expect("kill");
    assert_eq!(r.result_code, ResultCode::SelfTermination);

    let Json(entries) = api::logs(State(st.clone()), Query(LogsQuery { limit: Some(1) }))
        .await
        .expect("logs");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].target_pid, 2);

    for bad in [0, 1001] {
        let err = api::logs(State(st.clone()), Query(LogsQuery { limit: Some(bad) }))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}

#[tokio::test]
async fn pid_zero_is_a_bad_request() {
    let (_h, st) = state();
    let err = api::kill_pid(State(st.clone()), Path(0), Query(KillQuery::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
    assert!(st.log.is_empty());
}

#[tokio::test]
async fn process_lookup_distinguishes_missing_and_hidden() {
    let (_h, st) = state();
    let Json(d) = api::process_details(State(st.clone()), Path(31))
        .await
        .expect("details");
    assert_eq!(d.name.as_deref(), Some("postgres"));
    assert!(matches!(
        api::process_details(State(st.clone()), Path(999)).await,
        Err(ApiError::NotFound(_))
    ));
    assert!(matches!(
        api::process_details(State(st), Path(32)).await,
        Err(ApiError::Forbidden(_))
    ));
}

#[tokio::test]
async fn health_and_protection_config() {
    let (_h, st) = state();
    let Json(h) = api::health(State(st.clone())).await;
    assert_eq!(h.status, "healthy");
    assert_eq!(h.audit_failures, 0);
    let Json(cfg) = api::protection_config(State(st)).await;
    assert_eq!(cfg.os_family, OsFamily::Linux);
    assert!(cfg.protected_processes.iter().any(|p| p == "systemd"));
    assert!(cfg.protected_ports.contains(&22));
}

async fn status_of(addr: std::net::SocketAddr, path: &str) -> u16 {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let req = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(req.as_bytes()).await.expect("write");
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.expect("read");
    let head = String::from_utf8_lossy(&buf);
    // "HTTP/1.1 200 OK"
    head.split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status line")
}

#[tokio::test]
async fn token_guards_api_and_ws_but_not_health() {
    let (_h, mut st) = state();
    st.auth_token = Some("s3cret".into());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, api::router(st)).await;
    });

    assert_eq!(status_of(addr, "/api/stats").await, 401);
    assert_eq!(status_of(addr, "/api/stats?token=wrong").await, 401);
    assert_eq!(status_of(addr, "/api/stats?token=s3cret").await, 200);
    assert_eq!(status_of(addr, "/api/logs?token=s3cret&limit=5").await, 200);
    assert_eq!(status_of(addr, "/ws").await, 401);
    assert_eq!(status_of(addr, "/health").await, 200);
}
