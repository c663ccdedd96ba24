//! Error types for the agent. Resolution gaps are not errors: they show up as
//! `None` fields on records and details.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::types::Protocol;

/// Failure to read the kernel socket table.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("socket table unavailable for {protocol}: {message}")]
    SocketTable { protocol: Protocol, message: String },
}

/// Failure to deliver a signal to a process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("process {0} does not exist")]
    NoSuchProcess(u32),

    #[error("the OS refused to signal process {0} (insufficient privileges?)")]
    Refused(u32),
}

/// Failure of the durable audit sink.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("host cannot be empty")]
    EmptyHost,
}

/// Errors surfaced by HTTP handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("missing or invalid token")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "ACCESS_DENIED"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "PROCESS_NOT_FOUND"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = Json(json!({ "error": code, "message": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_statuses() {
        let resp = ApiError::NotFound("gone".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = ApiError::Unauthorized.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let resp = ApiError::Forbidden("no".into()).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn signal_error_messages_name_the_pid() {
        assert!(SignalError::Refused(77).to_string().contains("77"));
        assert!(SignalError::NoSuchProcess(5).to_string().contains('5'));
    }
}
