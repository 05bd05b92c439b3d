pub mod calls;
pub mod shutdown;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::error::ControlError;

/// Shared-secret query parameter every control-plane route requires (§6).
#[derive(Debug, Deserialize)]
pub struct SecretQuery {
    #[serde(default)]
    pub secret: String,
}

/// Constant-time comparison so a bad secret doesn't leak its prefix length
/// through request latency.
fn secret_matches(provided: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in provided.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

pub fn check_secret(provided: &str, expected: &str) -> Result<(), ControlError> {
    if secret_matches(provided, expected) {
        Ok(())
    } else {
        Err(ControlError::Unauthorized)
    }
}

impl IntoResponse for ControlOk {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self.0)).into_response()
    }
}

/// Thin wrapper so handlers can return `Result<ControlOk, ControlError>` and
/// let both arms convert to a `Response` via `IntoResponse` (the error side
/// already implements it, see `error.rs`).
pub struct ControlOk(pub serde_json::Value);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_matches_equal_strings_only() {
        assert!(secret_matches("abc123", "abc123"));
        assert!(!secret_matches("abc123", "abc124"));
        assert!(!secret_matches("short", "longersecret"));
        assert!(!secret_matches("anything", ""));
    }
}
