//! # Error Handling
//!
//! Application-level error types and their conversion to HTTP responses.
//!
//! ## Error Layers:
//! - **AppError**: Returned from HTTP handlers, rendered as a JSON error body
//! - **SinkError**: A side-channel write failed (caption channel, transcript file). These are
//!   logged and counted by the caller and never abort a segment.
//!
//! Per-segment pipeline failures live in `pipeline::PipelineError`, engine failures in
//! `engines::EngineError` and routing failures in `translation::TranslationError`.
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "bad_request",
//!     "message": "No translation route from 'en' to 'de'",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

use crate::translation::{ConfigurationError, TranslationError};

/// Errors surfaced through the HTTP API.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500)
/// - **BadRequest**: Client sent invalid data (400)
/// - **ConfigError**: Configuration problems (500)
/// - **ServiceUnavailable**: Capacity exhausted, retry later (503)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    ConfigError(String),
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();
        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// A route missing at session setup means the client asked for an unsupported target.
impl From<ConfigurationError> for AppError {
    fn from(err: ConfigurationError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<TranslationError> for AppError {
    fn from(err: TranslationError) -> Self {
        match err {
            TranslationError::Configuration(inner) => inner.into(),
            other => AppError::ServiceUnavailable(other.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// A best-effort side channel refused a write.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkError {
    /// The channel is closed or was never opened
    Closed,
    /// The write was attempted and failed
    Write(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Closed => write!(f, "Sink is closed"),
            SinkError::Write(msg) => write!(f, "Sink write failed: {}", msg),
        }
    }
}

impl std::error::Error for SinkError {}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Write(err.to_string())
    }
}
