use axum::extract::{Query, State};
use serde::Serialize;

use crate::control::{check_secret, ControlOk, SecretQuery};
use crate::error::ControlError;
use crate::AppState;

#[derive(Debug, Serialize)]
struct ShutdownResponse {
    #[serde(rename = "terminatedCount")]
    terminated_count: usize,
    #[serde(rename = "failedCount")]
    failed_count: usize,
    #[serde(rename = "terminatedCalls")]
    terminated_calls: Vec<String>,
}

/// POST /emergency-shutdown?secret=... — hangs up every live session and
/// empties C5 (§6 scenario 6).
pub async fn emergency_shutdown(
    State(state): State<AppState>,
    Query(secret): Query<SecretQuery>,
) -> Result<ControlOk, ControlError> {
    check_secret(&secret.secret, &state.config.api.secret)?;

    let report = state.session_manager.emergency_shutdown().await;
    tracing::warn!(
        terminated = report.terminated_calls.len(),
        failed = report.failed_calls.len(),
        "emergency shutdown executed"
    );

    let response = ShutdownResponse {
        terminated_count: report.terminated_calls.len(),
        failed_count: report.failed_calls.len(),
        terminated_calls: report.terminated_calls,
    };
    Ok(ControlOk(serde_json::to_value(response).unwrap()))
}
