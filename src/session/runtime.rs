use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message as CarrierMessage;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::call::{Call, CallStatus, Direction, ProviderKind, Role, summarize_conversation};
use crate::config::Config;
use crate::events::{DashboardEvent, EventBus, Speaker};
use crate::persistence::{CallRepository, FinalizeOutcome};
use crate::provider::{self, ProviderAdapter, ProviderEvent};
use crate::session::goodbye;
use crate::session::manager::SessionManager;
use crate::session::{CommandResult, SessionCommand, SessionHandle};
use crate::state::{ActiveCallState, ContextRequest};
use crate::twilio::client::TwilioClient;
use crate::twilio::wire::{self, StartMetadata, StreamEvent};

/// Everything one session actor needs that isn't call-specific. Cheap to
/// clone: every field is already an `Arc`.
#[derive(Clone)]
pub struct SessionDeps {
    pub config: Arc<Config>,
    pub repository: Arc<dyn CallRepository>,
    pub session_manager: Arc<SessionManager>,
    pub events: Arc<EventBus>,
    pub twilio: Arc<TwilioClient>,
}

/// Spawns the session actor (C4) as its own task. Returns the command
/// channel immediately — the actor doesn't know its own `callId` until the
/// carrier's `start` event arrives, so registration with [`SessionManager`]
/// happens from inside `run`, not here.
pub fn spawn(deps: SessionDeps, to_carrier: mpsc::Sender<CarrierMessage>) -> mpsc::Sender<SessionCommand> {
    let (commands_tx, commands_rx) = mpsc::channel(256);
    let self_handle_tx = commands_tx.clone();
    tokio::spawn(run(deps, commands_rx, to_carrier, self_handle_tx));
    commands_tx
}

struct Bootstrap {
    call: Call,
    state: ActiveCallState,
    stream_sid: String,
    provider: Box<dyn ProviderAdapter>,
    awaiting_resume_injection: bool,
}

async fn run(
    deps: SessionDeps,
    mut commands: mpsc::Receiver<SessionCommand>,
    to_carrier: mpsc::Sender<CarrierMessage>,
    self_handle_tx: mpsc::Sender<SessionCommand>,
) {
    let Some(Bootstrap { call, mut state, stream_sid, mut provider, mut awaiting_resume_injection }) =
        bootstrap(&deps, &mut commands).await
    else {
        return;
    };

    let call_id = call.call_id.clone();
    let direction = call.direction;
    let started_at = call.started_at;

    // The polite "we're at capacity" TwiML is returned from the voice
    // webhook, before the media stream ever opens (see
    // `twilio::webhook::handle_voice`); by this point the carrier leg is
    // already a live audio WebSocket, too late to say anything into it, so
    // this is purely the race-window backstop for calls that clear the
    // webhook's check just before the cap is hit.
    let handle = SessionHandle { commands: self_handle_tx, to_carrier: to_carrier.clone(), direction };
    if let Err(cap_err) = deps.session_manager.try_register(call_id.clone(), direction, handle) {
        tracing::warn!(
            call_id = %call_id,
            total = cap_err.total,
            outgoing = cap_err.outgoing,
            incoming = cap_err.incoming,
            "admission refused for an already-connected call, ending it"
        );
        provider.close().await;
        return;
    }

    deps.events.publish(DashboardEvent::CallStatusChanged {
        call_id: call_id.clone(),
        status: CallStatus::InProgress,
    });

    let max_duration_secs = match direction {
        Direction::Outbound => deps.config.caps.max_outgoing_call_duration,
        Direction::Inbound => deps.config.caps.max_incoming_call_duration,
    };
    let duration_deadline = Instant::now() + Duration::from_secs(max_duration_secs);
    let mut goodbye_deadline: Option<Instant> = None;

    loop {
        if state.call_ending {
            break;
        }

        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(SessionCommand::Carrier(event)) => {
                        handle_carrier_event(
                            &deps, &call_id, direction, started_at, &mut state, &mut provider,
                            &to_carrier, &stream_sid, event,
                        ).await;
                    }
                    Some(SessionCommand::CarrierClosed) => {
                        handle_close(&deps, &call_id, direction, started_at, &mut state, &mut provider).await;
                    }
                    Some(SessionCommand::Hold(reply)) => {
                        handle_hold(&deps, &call_id, &mut state).await;
                        let _ = reply.send(CommandResult::ok("on-hold"));
                    }
                    Some(SessionCommand::Hangup(reply)) => {
                        finalize(
                            &deps, &call_id, direction, started_at, &mut state, &mut provider,
                            CallStatus::Completed, None, true,
                        ).await;
                        let _ = reply.send(CommandResult::ok("completed"));
                    }
                    Some(SessionCommand::InjectContext { text, reply }) => {
                        let result = handle_inject_context(&deps, &call_id, &mut state, &mut provider, text).await;
                        let _ = reply.send(result);
                    }
                    Some(SessionCommand::Dtmf { digits, reply }) => {
                        let result = handle_dtmf(&deps, &call_id, &mut state, &mut provider, digits).await;
                        let _ = reply.send(result);
                    }
                    None => {
                        // Every sender (carrier task, control plane, self-handle) dropped.
                        handle_close(&deps, &call_id, direction, started_at, &mut state, &mut provider).await;
                    }
                }
            }
            Some(event) = provider.next_event() => {
                handle_provider_event(
                    &deps, &call_id, direction, started_at, &mut state, &mut provider,
                    &to_carrier, &stream_sid, &mut goodbye_deadline, &mut awaiting_resume_injection, event,
                ).await;
            }
            _ = tokio::time::sleep_until(duration_deadline) => {
                tracing::info!(call_id = %call_id, "duration cap reached");
                finalize(
                    &deps, &call_id, direction, started_at, &mut state, &mut provider,
                    CallStatus::Completed, None, true,
                ).await;
            }
            _ = wait_optional(goodbye_deadline) => {
                tracing::info!(call_id = %call_id, "goodbye grace period elapsed");
                finalize(
                    &deps, &call_id, direction, started_at, &mut state, &mut provider,
                    CallStatus::Completed, None, true,
                ).await;
            }
        }
    }

    // Grace period before the carrier/provider transports are dropped, so any
    // trailing audio (a farewell line, a hangup REST call in flight) lands.
    tokio::time::sleep(Duration::from_secs(5)).await;
}

/// Resolves to `()` at `deadline` if set, otherwise never — lets the
/// goodbye timer be an optional `select!` arm without a busy-poll.
async fn wait_optional(deadline: Option<Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending::<()>().await,
    }
}

async fn bootstrap(deps: &SessionDeps, commands: &mut mpsc::Receiver<SessionCommand>) -> Option<Bootstrap> {
    loop {
        match commands.recv().await? {
            SessionCommand::Carrier(StreamEvent::Connected { .. }) => continue,
            SessionCommand::Carrier(StreamEvent::Stop { .. }) | SessionCommand::CarrierClosed => return None,
            SessionCommand::Carrier(StreamEvent::Start { stream_sid, start }) => {
                return build_call(deps, stream_sid, start).await;
            }
            _ => continue,
        }
    }
}

async fn build_call(deps: &SessionDeps, stream_sid: String, start: StartMetadata) -> Option<Bootstrap> {
    let call_id = start.call_sid;
    let params = start.custom_parameters;

    let existing = match deps.repository.get_call(&call_id).await {
        Ok(existing) => existing,
        Err(e) => {
            tracing::error!(call_id = %call_id, error = %e, "failed to load call record");
            None
        }
    };

    let (mut call, awaiting_resume_injection, is_new) = match existing {
        // `resume()` flips the durable status to in-progress *before* the
        // carrier redirect (the race-safety rule in 4.4.4), so by the time
        // this `start` event lands the record is no longer `on-hold` —
        // anything other than `initiated` here means the call was bridged
        // before and this is a resume (or a reconnect while still on hold).
        Some(call) if call.status != CallStatus::Initiated => (call, true, false),
        // `initiated` means the control plane's `createOutboundCall`
        // persisted this record ahead of the carrier's `start` event; this
        // is that call's first bridge, not a resume.
        Some(call) => (call, false, false),
        None => {
            if params.system_instructions.trim().is_empty() {
                tracing::warn!(call_id = %call_id, "new call arrived with no systemInstructions, rejecting");
                return None;
            }
            let direction = if params.direction == "outbound" { Direction::Outbound } else { Direction::Inbound };
            let voice = if params.voice.is_empty() { deps.config.provider.default_voice.clone() } else { params.voice };
            let provider_kind = ProviderKind::parse(&deps.config.provider.default).unwrap_or(ProviderKind::Openai);
            let call = Call::new_initiated(
                call_id.clone(),
                direction,
                params.from_number,
                params.to_number,
                voice,
                provider_kind,
                params.system_instructions,
                params.call_instructions,
            );
            (call, false, true)
        }
    };
    call.status = CallStatus::InProgress;

    if is_new {
        if let Err(e) = deps.repository.create_call(&call).await {
            tracing::error!(call_id = %call_id, error = %e, "failed to create call record");
            return None;
        }
    } else if let Err(e) = deps.repository.mark_in_progress(&call_id).await {
        tracing::error!(call_id = %call_id, error = %e, "failed to mark call in-progress");
    }

    let mut state = ActiveCallState::new(call_id.clone());
    state.carrier_stream_id = Some(stream_sid.clone());
    state.status = CallStatus::InProgress;
    state.conversation_history = call.conversation_history.clone();
    state.pending_context_request = call.pending_context_request.clone();

    let connect_instructions =
        if awaiting_resume_injection { call.system_instructions.clone() } else { call.opening_instructions() };

    let mut adapter = provider::build(call.provider, &deps.config);
    if let Err(e) = adapter.connect(&connect_instructions, &call.voice).await {
        tracing::error!(call_id = %call_id, error = %e, "provider connection failed, failing call");
        let outcome = FinalizeOutcome {
            ended_at: Utc::now(),
            duration_secs: 0,
            status: CallStatus::Failed,
            conversation_history: state.conversation_history,
            carrier_events: state.carrier_events,
            provider_events: state.provider_events,
            error_message: Some(e.to_string()),
        };
        let _ = deps.repository.finalize(&call_id, outcome).await;
        return None;
    }

    Some(Bootstrap { call, state, stream_sid, provider: adapter, awaiting_resume_injection })
}

async fn send_carrier_frame(to_carrier: &mpsc::Sender<CarrierMessage>, value: serde_json::Value) {
    let _ = to_carrier.send(CarrierMessage::Text(value.to_string().into())).await;
}

#[allow(clippy::too_many_arguments)]
async fn handle_carrier_event(
    deps: &SessionDeps,
    call_id: &str,
    direction: Direction,
    started_at: DateTime<Utc>,
    state: &mut ActiveCallState,
    provider: &mut Box<dyn ProviderAdapter>,
    to_carrier: &mpsc::Sender<CarrierMessage>,
    stream_sid: &str,
    event: StreamEvent,
) {
    match event {
        StreamEvent::Media { media, .. } => {
            if let Some(ts) = media.timestamp.as_deref().and_then(|t| t.parse::<u64>().ok()) {
                state.latest_media_timestamp_ms = ts;
            }
            state.has_seen_media = true;
            if let Err(e) = provider.send_audio(&media.payload).await {
                tracing::warn!(call_id, error = %e, "failed to forward carrier audio to provider");
            }
        }
        StreamEvent::Mark { mark, .. } => {
            state.dequeue_mark(&mark.name);
        }
        StreamEvent::Dtmf { dtmf, .. } => {
            state.log_carrier_event("dtmf", serde_json::json!({ "digit": dtmf.digit }));
            if let Err(e) = provider
                .send_contextual_update(&format!("[Caller pressed touch-tone: {}]", dtmf.digit))
                .await
            {
                tracing::warn!(call_id, error = %e, "failed to forward caller DTMF to provider");
            }
        }
        StreamEvent::Stop { .. } => {
            handle_close(deps, call_id, direction, started_at, state, provider).await;
        }
        StreamEvent::Connected { .. } | StreamEvent::Start { .. } => {
            // Only expected once, during bootstrap; a repeat is logged and ignored.
            tracing::debug!(call_id, "ignoring duplicate connected/start event");
        }
    }
}

/// Carrier transport went away. If the call was mid-hold this is the
/// expected teardown of this actor (the session continues logically, just
/// without a running task until resume); otherwise it's a real hangup.
async fn handle_close(
    deps: &SessionDeps,
    call_id: &str,
    direction: Direction,
    started_at: DateTime<Utc>,
    state: &mut ActiveCallState,
    provider: &mut Box<dyn ProviderAdapter>,
) {
    if state.call_ending {
        return;
    }
    if state.status == CallStatus::OnHold || state.awaiting_dtmf_reconnect {
        state.call_ending = true;
        provider.close().await;
        deps.session_manager.unregister(call_id, direction);
        tracing::info!(call_id, "session actor torn down for hold or dtmf redirect");
    } else {
        finalize(deps, call_id, direction, started_at, state, provider, CallStatus::Completed, None, false).await;
    }
}

async fn handle_hold(deps: &SessionDeps, call_id: &str, state: &mut ActiveCallState) {
    // Race-safety rule: the durable status flips before the carrier redirect
    // is issued, so anything racing the redirect observes on-hold already.
    state.status = CallStatus::OnHold;
    if let Err(e) = deps.repository.update_conversation_history(call_id, &state.conversation_history).await {
        tracing::error!(call_id, error = %e, "failed to persist history before hold");
    }
    if let Err(e) = deps.repository.set_status(call_id, CallStatus::OnHold).await {
        tracing::error!(call_id, error = %e, "failed to persist on-hold status");
    }
    deps.events.publish(DashboardEvent::CallStatusChanged {
        call_id: call_id.to_string(),
        status: CallStatus::OnHold,
    });
    if let Err(e) = deps.twilio.redirect_to_hold(call_id).await {
        tracing::error!(call_id, error = %e, "failed to redirect carrier leg to hold");
    }
}

async fn handle_inject_context(
    deps: &SessionDeps,
    call_id: &str,
    state: &mut ActiveCallState,
    provider: &mut Box<dyn ProviderAdapter>,
    text: String,
) -> CommandResult {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return CommandResult::ok("rejected: context text must not be empty");
    }

    state.append_conversation(Role::System, format!("Operator note: {trimmed}"));
    if let Err(e) = deps.repository.update_conversation_history(call_id, &state.conversation_history).await {
        tracing::error!(call_id, error = %e, "failed to persist operator note");
    }

    if state.pending_context_request.take().is_some() {
        if let Err(e) = deps.repository.set_pending_context_request(call_id, None).await {
            tracing::error!(call_id, error = %e, "failed to clear pending context request");
        }
    }

    let summary = summarize_conversation(&state.conversation_history);
    let block = format!("OPERATOR INSTRUCTION:\n{trimmed}\n\nCONVERSATION SUMMARY:\n{summary}");
    if let Err(e) = provider.send_contextual_update(&block).await {
        tracing::warn!(call_id, error = %e, "failed to deliver operator context to provider");
    }

    CommandResult::ok("ok")
}

async fn handle_dtmf(
    deps: &SessionDeps,
    call_id: &str,
    state: &mut ActiveCallState,
    provider: &mut Box<dyn ProviderAdapter>,
    digits: String,
) -> CommandResult {
    if !valid_dtmf(&digits) {
        return CommandResult::ok("rejected: invalid DTMF digits");
    }
    state.append_conversation(Role::System, format!("Operator sent DTMF: {digits}"));
    if let Err(e) = deps.repository.update_conversation_history(call_id, &state.conversation_history).await {
        tracing::error!(call_id, error = %e, "failed to persist DTMF marker");
    }
    state.awaiting_dtmf_reconnect = true;
    if let Err(e) = deps.twilio.send_digits(call_id, &digits).await {
        state.awaiting_dtmf_reconnect = false;
        tracing::warn!(call_id, error = %e, "failed to play operator DTMF on the carrier leg");
    }
    if let Err(e) = provider.send_contextual_update(&format!("[System: DTMF '{digits}' sent.]")).await {
        tracing::warn!(call_id, error = %e, "failed to notify provider of operator DTMF");
    }
    CommandResult::ok("ok")
}

pub(crate) fn valid_dtmf(digits: &str) -> bool {
    !digits.is_empty() && digits.chars().all(|c| matches!(c, '0'..='9' | '*' | '#' | 'A'..='D' | 'w' | 'W' | ' '))
}

#[allow(clippy::too_many_arguments)]
async fn handle_provider_event(
    deps: &SessionDeps,
    call_id: &str,
    direction: Direction,
    started_at: DateTime<Utc>,
    state: &mut ActiveCallState,
    provider: &mut Box<dyn ProviderAdapter>,
    to_carrier: &mpsc::Sender<CarrierMessage>,
    stream_sid: &str,
    goodbye_deadline: &mut Option<Instant>,
    awaiting_resume_injection: &mut bool,
    event: ProviderEvent,
) {
    match event {
        ProviderEvent::Ready => {
            if *awaiting_resume_injection {
                *awaiting_resume_injection = false;
                let summary = summarize_conversation(&state.conversation_history);
                let block = format!(
                    "CONVERSATION SUMMARY:\n{summary}\n\nResuming call from hold. Continue the conversation naturally."
                );
                if let Err(e) = provider.send_contextual_update(&block).await {
                    tracing::warn!(call_id, error = %e, "failed to inject resume summary");
                }
            }
        }
        ProviderEvent::Audio { item_id, payload_b64 } => {
            send_carrier_frame(to_carrier, wire::media_frame(stream_sid, &payload_b64)).await;
            let mark_token = Uuid::new_v4().to_string();
            send_carrier_frame(to_carrier, wire::mark_frame(stream_sid, &mark_token)).await;
            state.enqueue_mark(mark_token);
            if state.response_start_timestamp_ms.is_none() {
                state.response_start_timestamp_ms = Some(state.latest_media_timestamp_ms);
            }
            state.last_assistant_item_id = Some(item_id);
        }
        ProviderEvent::SpeechStarted | ProviderEvent::Interruption => {
            handle_barge_in(state, provider, to_carrier, stream_sid).await;
        }
        ProviderEvent::UserTranscript { text, is_partial } => {
            handle_transcript(deps, call_id, state, Speaker::User, Role::User, text, is_partial, goodbye_deadline).await;
        }
        ProviderEvent::AgentTranscript { text, is_partial } => {
            handle_transcript(
                deps, call_id, state, Speaker::Assistant, Role::Assistant, text, is_partial, goodbye_deadline,
            )
            .await;
        }
        ProviderEvent::ToolCall { name, arguments } => {
            handle_tool_call(deps, call_id, state, provider, name, arguments).await;
        }
        ProviderEvent::Error(message) => {
            tracing::error!(call_id, %message, "provider reported an error");
            finalize(deps, call_id, direction, started_at, state, provider, CallStatus::Failed, Some(message), true)
                .await;
        }
        ProviderEvent::Closed => {
            if !state.call_ending && state.status != CallStatus::OnHold {
                finalize(deps, call_id, direction, started_at, state, provider, CallStatus::Completed, None, false)
                    .await;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_transcript(
    deps: &SessionDeps,
    call_id: &str,
    state: &mut ActiveCallState,
    speaker: Speaker,
    role: Role,
    text: String,
    is_partial: bool,
    goodbye_deadline: &mut Option<Instant>,
) {
    if text.trim().is_empty() {
        return;
    }

    deps.events.publish(DashboardEvent::TranscriptUpdate {
        call_id: call_id.to_string(),
        speaker,
        text: text.clone(),
        timestamp: Utc::now(),
        is_partial,
        is_interruption: false,
        truncated: false,
    });

    if is_partial {
        return;
    }

    state.append_conversation(role, text.clone());
    if let Err(e) = deps.repository.update_conversation_history(call_id, &state.conversation_history).await {
        tracing::error!(call_id, error = %e, "failed to persist transcript");
    }

    if goodbye_deadline.is_none() && goodbye::is_goodbye(&text) {
        tracing::info!(call_id, "goodbye phrase detected, scheduling finalize in 2s");
        *goodbye_deadline = Some(Instant::now() + Duration::from_secs(2));
    }
}

async fn handle_tool_call(
    deps: &SessionDeps,
    call_id: &str,
    state: &mut ActiveCallState,
    provider: &mut Box<dyn ProviderAdapter>,
    name: String,
    arguments: serde_json::Value,
) {
    match name.as_str() {
        "request_operator_input" => {
            let question = arguments.get("question").and_then(|v| v.as_str()).unwrap_or("").trim().to_string();
            if question.is_empty() {
                tracing::warn!(call_id, "request_operator_input tool call missing question");
                return;
            }
            let request = ContextRequest { question: question.clone(), requested_by: "agent".into(), timestamp: Utc::now() };
            state.pending_context_request = Some(request.clone());
            state.append_conversation(Role::System, format!("Agent requested operator input: {question}"));

            if let Err(e) = deps.repository.set_pending_context_request(call_id, Some(request)).await {
                tracing::error!(call_id, error = %e, "failed to persist pending context request");
            }
            if let Err(e) = deps.repository.update_conversation_history(call_id, &state.conversation_history).await {
                tracing::error!(call_id, error = %e, "failed to persist history");
            }
            deps.events.publish(DashboardEvent::ContextRequest {
                call_id: call_id.to_string(),
                question,
                requested_by: "agent".into(),
                timestamp: Utc::now(),
            });
        }
        "send_dtmf" => {
            let digits = arguments.get("digits").and_then(|v| v.as_str()).unwrap_or("").to_string();
            if !valid_dtmf(&digits) {
                tracing::warn!(call_id, %digits, "agent requested invalid DTMF digits, dropping");
                return;
            }
            state.append_conversation(Role::System, format!("Agent sent DTMF: {digits}"));
            if let Err(e) = deps.repository.update_conversation_history(call_id, &state.conversation_history).await {
                tracing::error!(call_id, error = %e, "failed to persist agent DTMF marker");
            }
            state.awaiting_dtmf_reconnect = true;
            if let Err(e) = deps.twilio.send_digits(call_id, &digits).await {
                state.awaiting_dtmf_reconnect = false;
                tracing::warn!(call_id, error = %e, "failed to play agent-requested DTMF on the carrier leg");
            }
            if let Err(e) = provider.send_contextual_update(&format!("[System: DTMF '{digits}' sent.]")).await {
                tracing::warn!(call_id, error = %e, "failed to acknowledge agent DTMF tool call");
            }
        }
        other => {
            tracing::warn!(call_id, tool = other, "dropping unrecognized tool call");
        }
    }
}

/// The barge-in algorithm: guard order and reset exactly match distilled
/// spec §4.4. Skipped entirely unless a response is actually mid-flight —
/// this both avoids truncating silence and makes the handler idempotent
/// against a second interruption event arriving before the reset lands.
async fn handle_barge_in(
    state: &mut ActiveCallState,
    provider: &mut Box<dyn ProviderAdapter>,
    to_carrier: &mpsc::Sender<CarrierMessage>,
    stream_sid: &str,
) {
    if state.mark_queue.is_empty() {
        return;
    }
    let Some(response_start) = state.response_start_timestamp_ms else { return };
    let Some(item_id) = state.last_assistant_item_id.clone() else { return };

    let elapsed = state.latest_media_timestamp_ms.saturating_sub(response_start);
    if let Err(e) = provider.truncate(&item_id, elapsed).await {
        tracing::warn!(error = %e, "provider truncate call failed during barge-in");
    }
    send_carrier_frame(to_carrier, wire::clear_frame(stream_sid)).await;
    state.truncate_last_assistant_entry(elapsed);
    state.reset_response_tracking();
}

#[allow(clippy::too_many_arguments)]
async fn finalize(
    deps: &SessionDeps,
    call_id: &str,
    direction: Direction,
    started_at: DateTime<Utc>,
    state: &mut ActiveCallState,
    provider: &mut Box<dyn ProviderAdapter>,
    status: CallStatus,
    error_message: Option<String>,
    hangup_call: bool,
) {
    if state.call_ending {
        return;
    }
    state.call_ending = true;
    state.status = status;

    provider.close().await;
    deps.session_manager.unregister(call_id, direction);

    if hangup_call {
        let twilio = deps.twilio.clone();
        let call_id_owned = call_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = twilio.hangup(&call_id_owned).await {
                tracing::warn!(call_id = %call_id_owned, error = %e, "failed to hang up carrier leg");
            }
        });
    }

    let ended_at = Utc::now();
    let duration_secs = (ended_at - started_at).num_seconds().max(0);
    let outcome = FinalizeOutcome {
        ended_at,
        duration_secs,
        status,
        conversation_history: state.conversation_history.clone(),
        carrier_events: state.carrier_events.clone(),
        provider_events: state.provider_events.clone(),
        error_message,
    };

    if let Err(e) = deps.repository.finalize(call_id, outcome.clone()).await {
        tracing::error!(call_id, error = %e, "finalize write failed, retrying once");
        if let Err(e2) = deps.repository.finalize(call_id, outcome).await {
            tracing::error!(call_id, error = %e2, "finalize retry also failed");
        }
    }

    deps.events.publish(DashboardEvent::CallStatusChanged { call_id: call_id.to_string(), status });
    tracing::info!(call_id, status = ?status, duration_secs, "call finalized");
}
