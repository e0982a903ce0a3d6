use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Main error type for cachegate operations
#[derive(Debug, Error)]
pub enum CacheGateError {
    #[error("Network request failed: {0}")]
    Network(String),

    #[error("Upstream returned {status} for {url}")]
    UpstreamStatus { status: u16, url: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Install of version '{version}' failed: {reason}")]
    InstallFailed { version: String, reason: String },

    #[error("No active worker")]
    NoActiveWorker,

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheGateError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Network(_) | Self::UpstreamStatus { .. } => StatusCode::BAD_GATEWAY,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NoActiveWorker => StatusCode::SERVICE_UNAVAILABLE,
            Self::InstallFailed { .. } => StatusCode::CONFLICT,
            Self::Config(_) | Self::Snapshot(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<reqwest::Error> for CacheGateError {
    fn from(e: reqwest::Error) -> Self {
        CacheGateError::Network(e.to_string())
    }
}

/// Implement IntoResponse for Axum integration
impl IntoResponse for CacheGateError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias for cachegate operations
pub type Result<T> = std::result::Result<T, CacheGateError>;
