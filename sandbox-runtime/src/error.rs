use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Error taxonomy for the control plane.
///
/// Each variant maps to exactly one HTTP status (see [`SandboxError::status_code`]
/// and [`SandboxError::code`]); propagation policy is "surface unchanged" except
/// for validation, which is raised locally by the manager before anything else
/// runs.
#[derive(Debug)]
pub enum SandboxError {
    /// Validation failure: quota overage, malformed memory string, duplicate
    /// sandbox id, missing required field. HTTP 400.
    BadRequest(String),
    /// Sandbox id unknown to both the KV cache and the operator. HTTP 404.
    NotFound(String),
    /// Session already closed, or a session name collision. HTTP 409.
    Conflict(String),
    /// Upstream worker or model-proxy target exceeded its deadline. HTTP 504.
    Timeout(String),
    /// Worker returned non-2xx, or the connection reset. HTTP 502.
    Upstream(String),
    /// Unexpected internal failure. HTTP 500.
    Internal(String),
    /// Authentication failure (invalid or missing bearer token). HTTP 401.
    Auth(String),
    /// Container runtime failure that doesn't fit the categories above.
    Docker(String),
}

impl SandboxError {
    /// Stable machine-readable error code for the `{code: ...}` envelope field.
    pub fn code(&self) -> &'static str {
        match self {
            SandboxError::BadRequest(_) => "BadRequest",
            SandboxError::NotFound(_) => "NotFound",
            SandboxError::Conflict(_) => "Conflict",
            SandboxError::Timeout(_) => "Timeout",
            SandboxError::Upstream(_) => "Upstream",
            SandboxError::Internal(_) => "Internal",
            SandboxError::Auth(_) => "Auth",
            SandboxError::Docker(_) => "Docker",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SandboxError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SandboxError::NotFound(_) => StatusCode::NOT_FOUND,
            SandboxError::Conflict(_) => StatusCode::CONFLICT,
            SandboxError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            SandboxError::Upstream(_) => StatusCode::BAD_GATEWAY,
            SandboxError::Internal(_) | SandboxError::Docker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            SandboxError::Auth(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            SandboxError::NotFound(msg) => write!(f, "not found: {msg}"),
            SandboxError::Conflict(msg) => write!(f, "conflict: {msg}"),
            SandboxError::Timeout(msg) => write!(f, "timeout: {msg}"),
            SandboxError::Upstream(msg) => write!(f, "upstream error: {msg}"),
            SandboxError::Internal(msg) => write!(f, "internal error: {msg}"),
            SandboxError::Auth(msg) => write!(f, "auth error: {msg}"),
            SandboxError::Docker(msg) => write!(f, "docker error: {msg}"),
        }
    }
}

impl std::error::Error for SandboxError {}

/// The `{status, error, code}` envelope used by every admin HTTP endpoint
/// (§6), with the HTTP status mirroring §7's taxonomy.
#[derive(Serialize)]
struct ErrorEnvelope {
    status: &'static str,
    error: String,
    code: &'static str,
}

impl IntoResponse for SandboxError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let body = ErrorEnvelope { status: "Failed", error: self.to_string(), code };
        (status, Json(body)).into_response()
    }
}

impl From<SandboxError> for String {
    fn from(err: SandboxError) -> Self {
        err.to_string()
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
