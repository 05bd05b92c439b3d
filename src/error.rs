use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Error taxonomy for the session runtime and its adapters.
///
/// Carrier/provider transport hiccups are logged and swallowed where the call
/// can continue; everything else becomes a state transition on the session
/// (typically a failed finalize) plus an event on the event bus.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Malformed frame from the carrier or provider. The frame is dropped,
    /// the event logged, the call is not ended.
    #[error("transport error: {0}")]
    Transport(String),

    /// Provider connection refused or closed before becoming ready.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(String),
    #[error("call not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Sqlite(e.to_string())
    }
}

/// Errors surfaced by the control plane (C6), one-to-one with an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("at capacity")]
    CapacityExceeded { total: usize, outgoing: usize, incoming: usize },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<CapacityStats>,
}

#[derive(Debug, Serialize)]
struct CapacityStats {
    #[serde(rename = "totalCalls")]
    total_calls: usize,
    #[serde(rename = "outgoingCalls")]
    outgoing_calls: usize,
    #[serde(rename = "incomingCalls")]
    incoming_calls: usize,
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = match &self {
            ControlError::Unauthorized => StatusCode::UNAUTHORIZED,
            ControlError::NotFound(_) => StatusCode::NOT_FOUND,
            ControlError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ControlError::CapacityExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ControlError::Storage(_) | ControlError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let stats = match &self {
            ControlError::CapacityExceeded { total, outgoing, incoming } => Some(CapacityStats {
                total_calls: *total,
                outgoing_calls: *outgoing,
                incoming_calls: *incoming,
            }),
            _ => None,
        };
        let body = ErrorBody { error: self.to_string(), stats };
        (status, Json(body)).into_response()
    }
}
