//! Error types for the relay.
//!
//! `ApiError` is what a handler can fail with and knows its HTTP status.
//! `PollError` and `HistoryError` cover the two outbound HTTP paths: the
//! monitor polling the relay, and readings forwarded to a remote history log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The write body is not valid JSON; nothing was applied.
    #[error("invalid request body: {0}")]
    Decode(#[from] serde_json::Error),

    /// The diagnostic echo endpoint could not read its body.
    #[error("error processing data: {0}")]
    Echo(serde_json::Error),

    /// Readings are forwarded elsewhere, this process keeps no history.
    #[error("history log is not kept by this relay")]
    HistoryUnavailable,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Echo(_) => StatusCode::BAD_REQUEST,
            Self::HistoryUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            Self::Echo(e) => serde_json::json!({
                "message": "Error processing data",
                "error": e.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "status": "error",
            }),
            other => serde_json::json!({ "error": other.to_string() }),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Errors from a single monitor poll.
#[derive(Debug, Error)]
pub enum PollError {
    /// Transport-level failure (connection refused, reset, ...).
    #[error("request failed: {0}")]
    Http(#[source] reqwest::Error),

    /// The relay answered with a non-success status.
    #[error("relay answered {0}")]
    Status(reqwest::StatusCode),

    /// The body was not a read-contract payload.
    #[error("could not decode state: {0}")]
    Decode(#[source] reqwest::Error),

    /// No answer within the poll interval.
    #[error("request timed out after {0} ms")]
    Timeout(u64),
}

/// Errors delivering a reading to a remote history log.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("history log answered {0}")]
    Status(reqwest::StatusCode),
}
