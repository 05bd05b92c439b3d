use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::call::{Call, CallStatus, Direction, ProviderKind};
use crate::control::{check_secret, ControlOk, SecretQuery};
use crate::error::ControlError;
use crate::events::DashboardEvent;
use crate::session::manager::CapacityError;
use crate::session::runtime::valid_dtmf;
use crate::session::{CommandResult, SessionCommand};
use crate::twilio::client::NewCallParams;
use crate::AppState;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct CreateCallRequest {
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "systemInstructions")]
    pub system_instructions: String,
    #[serde(rename = "callInstructions", default)]
    pub call_instructions: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(rename = "fromNumber", default)]
    pub from_number: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateCallResponse {
    #[serde(rename = "callId")]
    call_id: String,
    status: &'static str,
}

/// POST /calls/create?secret=... — originate an outbound call (the
/// distilled spec's `createOutboundCall`).
pub async fn create_call(
    State(state): State<AppState>,
    Query(secret): Query<SecretQuery>,
    Json(req): Json<CreateCallRequest>,
) -> Result<ControlOk, ControlError> {
    check_secret(&secret.secret, &state.config.api.secret)?;

    if req.to.trim().is_empty() || !looks_like_e164(&req.to) {
        return Err(ControlError::InvalidArgument("To must be an E.164 phone number".into()));
    }
    if req.system_instructions.trim().is_empty() {
        return Err(ControlError::InvalidArgument("systemInstructions is required".into()));
    }

    state.session_manager.can_accept(Direction::Outbound).map_err(capacity_error)?;

    let voice = req.voice.unwrap_or_else(|| state.config.provider.default_voice.clone());
    let from_number = req.from_number.unwrap_or_else(|| state.config.twilio.phone_number.clone());
    let params = NewCallParams {
        to_number: &req.to,
        from_number: &from_number,
        voice: &voice,
        system_instructions: &req.system_instructions,
        call_instructions: &req.call_instructions,
    };

    let call_id = state
        .twilio
        .originate(&req.to, &params)
        .await
        .map_err(|e| ControlError::Internal(e.to_string()))?;

    let provider = ProviderKind::parse(&state.config.provider.default).unwrap_or(ProviderKind::Openai);
    let call = Call::new_initiated(
        call_id.clone(),
        Direction::Outbound,
        from_number,
        req.to.clone(),
        voice,
        provider,
        req.system_instructions,
        req.call_instructions,
    );
    state.repository.create_call(&call).await?;
    state.events.publish(DashboardEvent::CallStatusChanged {
        call_id: call_id.clone(),
        status: CallStatus::Initiated,
    });

    Ok(ControlOk(serde_json::to_value(CreateCallResponse { call_id, status: "initiated" }).unwrap()))
}

/// POST /calls/{callId}/hold?secret=...
pub async fn hold(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Query(secret): Query<SecretQuery>,
) -> Result<ControlOk, ControlError> {
    check_secret(&secret.secret, &state.config.api.secret)?;
    let handle = state.session_manager.get(&call_id).ok_or_else(|| ControlError::NotFound(call_id.clone()))?;
    let result = send_command(&handle.commands, SessionCommand::Hold).await?;
    Ok(ControlOk(serde_json::json!({ "status": result.status })))
}

/// POST /calls/{callId}/resume?secret=... — the session actor for a held
/// call has already torn itself down (see `session::runtime::handle_close`),
/// so resume is driven against the durable record in C7 directly rather
/// than through a `SessionHandle`: flip status, then redirect the carrier
/// leg, which produces a fresh `start` event that re-bootstraps C4.
pub async fn resume(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Query(secret): Query<SecretQuery>,
) -> Result<ControlOk, ControlError> {
    check_secret(&secret.secret, &state.config.api.secret)?;

    let call = state.repository.get_call(&call_id).await?.ok_or_else(|| ControlError::NotFound(call_id.clone()))?;
    if call.status != CallStatus::OnHold {
        return Err(ControlError::InvalidArgument(format!("call {call_id} is not on hold")));
    }

    state.repository.set_status(&call_id, CallStatus::InProgress).await?;
    state
        .twilio
        .redirect_to_resume(&call_id)
        .await
        .map_err(|e| ControlError::Internal(e.to_string()))?;

    Ok(ControlOk(serde_json::json!({ "status": "in-progress" })))
}

/// POST /calls/{callId}/hangup?secret=... — idempotent: a second hangup
/// after the session actor already tore itself down finds the terminal
/// status already persisted in C7 and just echoes it back.
pub async fn hangup(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Query(secret): Query<SecretQuery>,
) -> Result<ControlOk, ControlError> {
    check_secret(&secret.secret, &state.config.api.secret)?;

    if let Some(handle) = state.session_manager.get(&call_id) {
        let result = send_command(&handle.commands, SessionCommand::Hangup).await?;
        return Ok(ControlOk(serde_json::json!({ "status": result.status })));
    }

    let call = state.repository.get_call(&call_id).await?.ok_or_else(|| ControlError::NotFound(call_id.clone()))?;
    if matches!(call.status, CallStatus::Completed | CallStatus::Failed) {
        return Ok(ControlOk(serde_json::json!({ "status": status_str(call.status) })));
    }

    state.twilio.hangup(&call_id).await.map_err(|e| ControlError::Internal(e.to_string()))?;
    let ended_at = chrono::Utc::now();
    let duration_secs = (ended_at - call.started_at).num_seconds().max(0);
    state
        .repository
        .finalize(
            &call_id,
            crate::persistence::FinalizeOutcome {
                ended_at,
                duration_secs,
                status: CallStatus::Completed,
                conversation_history: call.conversation_history,
                carrier_events: call.carrier_events,
                provider_events: call.provider_events,
                error_message: None,
            },
        )
        .await?;
    state.events.publish(DashboardEvent::CallStatusChanged { call_id, status: CallStatus::Completed });

    Ok(ControlOk(serde_json::json!({ "status": "completed" })))
}

#[derive(Debug, Deserialize)]
pub struct InjectContextRequest {
    pub context: String,
}

/// POST /calls/{callId}/inject-context?secret=...
pub async fn inject_context(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Query(secret): Query<SecretQuery>,
    Json(req): Json<InjectContextRequest>,
) -> Result<ControlOk, ControlError> {
    check_secret(&secret.secret, &state.config.api.secret)?;
    if req.context.trim().is_empty() {
        return Err(ControlError::InvalidArgument("context must not be empty".into()));
    }

    if let Some(handle) = state.session_manager.get(&call_id) {
        let result = send_command(&handle.commands, |reply| SessionCommand::InjectContext {
            text: req.context.clone(),
            reply,
        })
        .await?;
        return Ok(ControlOk(serde_json::json!({ "status": result.status, "resumed": result.resumed })));
    }

    inject_context_while_on_hold(&state, &call_id, &req.context).await
}

/// The session actor is gone while a call is on hold, so an injection that
/// arrives then is applied directly against the durable record: appended to
/// history, and if the agent had a question pending, cleared and the call
/// resumed automatically (distilled spec §4.4's "auto-resume" rule).
async fn inject_context_while_on_hold(
    state: &AppState,
    call_id: &str,
    text: &str,
) -> Result<ControlOk, ControlError> {
    let mut call = state.repository.get_call(call_id).await?.ok_or_else(|| ControlError::NotFound(call_id.to_string()))?;
    if call.status != CallStatus::OnHold {
        return Err(ControlError::NotFound(call_id.to_string()));
    }

    call.conversation_history.push(crate::call::ConversationEntry::new(
        crate::call::Role::System,
        format!("Operator note: {}", text.trim()),
    ));
    state.repository.update_conversation_history(call_id, &call.conversation_history).await?;

    if call.pending_context_request.take().is_some() {
        state.repository.set_pending_context_request(call_id, None).await?;
        state.repository.set_status(call_id, CallStatus::InProgress).await?;
        state
            .twilio
            .redirect_to_resume(call_id)
            .await
            .map_err(|e| ControlError::Internal(e.to_string()))?;
        return Ok(ControlOk(serde_json::json!({ "status": "resumed", "resumed": true })));
    }

    Ok(ControlOk(serde_json::json!({ "status": "ok", "resumed": false })))
}

#[derive(Debug, Deserialize)]
pub struct DtmfRequest {
    pub digits: String,
}

/// POST /calls/{callId}/dtmf?secret=...
pub async fn dtmf(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Query(secret): Query<SecretQuery>,
    Json(req): Json<DtmfRequest>,
) -> Result<ControlOk, ControlError> {
    check_secret(&secret.secret, &state.config.api.secret)?;
    if !valid_dtmf(&req.digits) {
        return Err(ControlError::InvalidArgument("digits must match [0-9*#A-DwW ]+".into()));
    }

    let handle = state.session_manager.get(&call_id).ok_or_else(|| ControlError::NotFound(call_id.clone()))?;
    let result = send_command(&handle.commands, |reply| SessionCommand::Dtmf { digits: req.digits.clone(), reply })
        .await?;
    Ok(ControlOk(serde_json::json!({ "status": result.status })))
}

async fn send_command(
    commands: &tokio::sync::mpsc::Sender<SessionCommand>,
    build: impl FnOnce(oneshot::Sender<CommandResult>) -> SessionCommand,
) -> Result<CommandResult, ControlError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    commands
        .send(build(reply_tx))
        .await
        .map_err(|_| ControlError::Internal("session actor is gone".into()))?;
    tokio::time::timeout(COMMAND_TIMEOUT, reply_rx)
        .await
        .map_err(|_| ControlError::Internal("session did not respond in time".into()))?
        .map_err(|_| ControlError::Internal("session actor dropped the reply channel".into()))
}

fn capacity_error(e: CapacityError) -> ControlError {
    ControlError::CapacityExceeded { total: e.total, outgoing: e.outgoing, incoming: e.incoming }
}

fn status_str(status: CallStatus) -> &'static str {
    match status {
        CallStatus::Initiated => "initiated",
        CallStatus::InProgress => "in-progress",
        CallStatus::OnHold => "on-hold",
        CallStatus::Completed => "completed",
        CallStatus::Failed => "failed",
    }
}

fn looks_like_e164(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some('+')) && chars.clone().count() >= 7 && chars.all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e164_validation() {
        assert!(looks_like_e164("+15551230000"));
        assert!(!looks_like_e164("5551230000"));
        assert!(!looks_like_e164("+123"));
    }
}
