//! HTTP surface. Handlers are thin: parse, hop to a blocking thread for OS
//! work, serialize.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::classify::OsFamily;
use crate::error::ApiError;
use crate::state::AppState;
use crate::types::{
    ConnState, KillPreview, KillRequest, KillResult, LogEntry, PortFilter, PortRecord, PortView,
    ProcessDetails, Protocol, Stats,
};
use crate::view::build_view;
use crate::ws::ws_handler;

pub const MAX_LOG_LIMIT: usize = 1000;
const DEFAULT_LOG_LIMIT: usize = 100;

/// Raw listing query; unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct PortQuery {
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub process: Option<String>,
    pub state: Option<String>,
}

impl TryFrom<PortQuery> for PortFilter {
    type Error = ApiError;

    fn try_from(q: PortQuery) -> Result<Self, Self::Error> {
        let nonblank = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
        Ok(PortFilter {
            port: q.port,
            protocol: nonblank(q.protocol)
                .map(|p| p.parse::<Protocol>())
                .transpose()
                .map_err(ApiError::BadRequest)?,
            process: nonblank(q.process),
            state: nonblank(q.state)
                .map(|s| s.parse::<ConnState>())
                .transpose()
                .map_err(ApiError::BadRequest)?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct KillQuery {
    #[serde(default)]
    pub force: bool,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PreviewQuery {
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub refresh_interval_secs: u64,
    pub audit_failures: u64,
}

#[derive(Debug, Serialize)]
pub struct ProtectionConfig {
    pub os_family: OsFamily,
    pub refresh_interval_secs: u64,
    pub protected_processes: Vec<String>,
    pub protected_ports: Vec<u16>,
}

/// Full snapshot, listing sorted by (port, protocol) for presentation.
pub async fn snapshot_view(state: &AppState, filter: PortFilter) -> Result<PortView, ApiError> {
    let host = state.host.clone();
    let classifier = state.classifier.clone();
    let mut view =
        tokio::task::spawn_blocking(move || build_view(host.as_ref(), &classifier, &filter))
            .await?;
    view.ports.sort_by_key(|r| (r.port, r.protocol));
    Ok(view)
}

pub async fn ports(
    State(state): State<AppState>,
    Query(q): Query<PortQuery>,
) -> Result<Json<Vec<PortRecord>>, ApiError> {
    let view = snapshot_view(&state, q.try_into()?).await?;
    Ok(Json(view.ports))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<Stats>, ApiError> {
    let view = snapshot_view(&state, PortFilter::default()).await?;
    Ok(Json(view.stats))
}

pub async fn snapshot(
    State(state): State<AppState>,
    Query(q): Query<PortQuery>,
) -> Result<Json<PortView>, ApiError> {
    Ok(Json(snapshot_view(&state, q.try_into()?).await?))
}

async fn run_kill(state: &AppState, req: KillRequest) -> Result<KillResult, ApiError> {
    if req.pid == 0 {
        return Err(ApiError::BadRequest("pid must be greater than 0".into()));
    }
    let terminator = state.terminator.clone();
    Ok(tokio::task::spawn_blocking(move || terminator.terminate(req)).await?)
}

pub async fn kill(
    State(state): State<AppState>,
    Json(req): Json<KillRequest>,
) -> Result<Json<KillResult>, ApiError> {
    Ok(Json(run_kill(&state, req).await?))
}

pub async fn kill_pid(
    State(state): State<AppState>,
    Path(pid): Path<u32>,
    Query(q): Query<KillQuery>,
) -> Result<Json<KillResult>, ApiError> {
    let req = KillRequest {
        pid,
        force: q.force,
        port: q.port,
    };
    Ok(Json(run_kill(&state, req).await?))
}

pub async fn preview(
    State(state): State<AppState>,
    Path(pid): Path<u32>,
    Query(q): Query<PreviewQuery>,
) -> Result<Json<KillPreview>, ApiError> {
    let terminator = state.terminator.clone();
    let p = tokio::task::spawn_blocking(move || terminator.preview(pid, q.port)).await?;
    Ok(Json(p))
}

pub async fn logs(
    State(state): State<AppState>,
    Query(q): Query<LogsQuery>,
) -> Result<Json<Vec<LogEntry>>, ApiError> {
    let limit = q.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    if !(1..=MAX_LOG_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_LOG_LIMIT}"
        )));
    }
    Ok(Json(state.log.recent(limit)))
}

pub async fn process_details(
    State(state): State<AppState>,
    Path(pid): Path<u32>,
) -> Result<Json<ProcessDetails>, ApiError> {
    let terminator = state.terminator.clone();
    let details = tokio::task::spawn_blocking(move || terminator.process_details(pid)).await?;
    match details {
        None => Err(ApiError::NotFound(format!(
            "Process with PID {pid} does not exist"
        ))),
        Some(d) if d.name.is_none() => {
            Err(ApiError::Forbidden(format!("Access denied to process {pid}")))
        }
        Some(d) => Ok(Json(d)),
    }
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        refresh_interval_secs: state.refresh_interval.as_secs(),
        audit_failures: state.log.sink_failures(),
    })
}

pub async fn protection_config(State(state): State<AppState>) -> Json<ProtectionConfig> {
    Json(ProtectionConfig {
        os_family: state.classifier.family(),
        refresh_interval_secs: state.refresh_interval.as_secs(),
        protected_processes: state
            .classifier
            .protected_processes()
            .map(str::to_string)
            .collect(),
        protected_ports: state.classifier.protected_ports().collect(),
    })
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": "portreaper_agent",
        "version": env!("CARGO_PKG_VERSION"),
        "api": "/api/ports",
        "health": "/health",
    }))
}

async fn require_token(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.auth_token.as_ref() {
        match q.get("token") {
            Some(t) if t == expected => {}
            _ => return Err(ApiError::Unauthorized),
        }
    }
    Ok(next.run(req).await)
}

pub fn router(state: AppState) -> Router {
    let auth = middleware::from_fn_with_state(state.clone(), require_token);
    let api = Router::new()
        .route("/ports", get(ports))
        .route("/stats", get(stats))
        .route("/snapshot", get(snapshot))
        .route("/config", get(protection_config))
        .route("/kill", post(kill))
        .route("/kill/:pid", post(kill_pid))
        .route("/kill/:pid/preview", get(preview))
        .route("/logs", get(logs))
        .route("/process/:pid", get(process_details))
        .route_layer(auth.clone());
    let ws = Router::new()
        .route("/ws", get(ws_handler))
        .route_layer(auth);
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api", api)
        .merge(ws)
        .with_state(state)
}
