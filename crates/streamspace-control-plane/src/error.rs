//! Unified API error handling: translates `CoreError`/`HubError` into HTTP
//! responses the way the agent fabric's own domain errors already
//! distinguish state conflicts from not-found from capacity exhaustion
//! (spec.md §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use streamspace_core::CoreError;
use streamspace_hub::HubError;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Conflict(_) => "CONFLICT",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            Self::Internal(msg) => error!(error_code = code, message = %msg, "api error"),
            Self::ServiceUnavailable(msg) => warn!(error_code = code, message = %msg, "service unavailable"),
            _ => tracing::debug!(error_code = code, message = %message, "client error"),
        }

        (status, Json(ErrorResponse { error: message, code })).into_response()
    }
}

/// Maps each `CoreError` variant onto the error kind table of spec.md §7:
/// state conflicts and not-found are distinguished from plain database
/// failure so callers don't have to string-match.
impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::SessionNotFound(id) => Self::NotFound(format!("session not found: {id}")),
            CoreError::AgentNotFound(id) => Self::NotFound(format!("agent not found: {id}")),
            CoreError::CommandNotFound(id) => Self::NotFound(format!("command not found: {id}")),
            CoreError::StateConflict(from, to) => {
                Self::Conflict(format!("invalid transition: {from} -> {to}"))
            }
            CoreError::NoAgentsAvailable => {
                Self::ServiceUnavailable("no agents available matching criteria".into())
            }
            CoreError::QueueFull => Self::ServiceUnavailable("command queue is full".into()),
            CoreError::InvalidCommand(msg) => Self::BadRequest(msg),
            CoreError::Database(e) => Self::Internal(e.to_string()),
            CoreError::Serialization(e) => Self::BadRequest(e.to_string()),
        }
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::NotConnected(id) => Self::ServiceUnavailable(format!("agent not connected: {id}")),
            HubError::SendBufferFull(id) => {
                Self::ServiceUnavailable(format!("send buffer full for agent: {id}"))
            }
            HubError::QueueFull => Self::ServiceUnavailable("dispatcher queue is full".into()),
            HubError::InvalidCommand(msg) => Self::BadRequest(msg),
            HubError::Core(e) => ApiError::from(e),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
