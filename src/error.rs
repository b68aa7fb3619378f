//! Error types for the prediction gateway

use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Downstream service could not be reached
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Downstream service did not answer within the configured timeout
    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Downstream service answered with a non-success status
    #[error("Upstream {service} returned {status}: {message}")]
    Upstream {
        /// Which backend answered
        service: &'static str,
        /// HTTP status returned by the backend
        status: u16,
        /// Error text reported by the backend (logged, never returned)
        message: String,
    },

    /// Request payload failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Durable storage error
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx_core::error::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify a reqwest failure against `service` into timeout/unavailable.
    pub fn from_transport(service: &'static str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout(service.to_string())
        } else if err.is_decode() {
            Self::Upstream {
                service,
                status: err.status().map_or(502, |s| s.as_u16()),
                message: err.to_string(),
            }
        } else {
            Self::UpstreamUnavailable(service.to_string())
        }
    }

    /// HTTP status the gateway answers with for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamUnavailable(_) | Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable, generic message that is safe to show to callers
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidRequest(msg) => msg.clone(),
            Self::Json(_) => "Invalid request format".to_string(),
            Self::UpstreamTimeout(_) => "upstream service timed out".to_string(),
            Self::UpstreamUnavailable(_) | Self::Upstream { .. } => {
                "upstream service failure".to_string()
            }
            _ => "internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}
