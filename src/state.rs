use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::{CallStatus, ConversationEntry, LoggedEvent, Role};

/// A question the agent itself raised for the human operator (via a tool
/// call), awaiting an `injectContext` reply. Persisted on the durable `Call`
/// record so it survives the in-memory session going away on hold, and
/// cleared the moment an operator injection answers it (which also
/// auto-resumes the call, per the distilled spec's `injectContext` rule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRequest {
    pub question: String,
    pub requested_by: String,
    pub timestamp: DateTime<Utc>,
}

/// Ephemeral, in-memory state for one active call, owned exclusively by the
/// session's event loop task (C4). Nothing outside that task mutates this.
#[derive(Debug)]
pub struct ActiveCallState {
    pub call_id: String,
    pub carrier_stream_id: Option<String>,
    pub latest_media_timestamp_ms: u64,

    /// Outbound `mark` names sent to the carrier but not yet echoed back,
    /// in send order. Drained front-to-back as acks arrive.
    pub mark_queue: VecDeque<String>,

    /// Provider item id of the assistant response currently playing out to
    /// the carrier, if any. `None` once the response completes or is
    /// truncated, so a stray mark/clear after that point is a no-op.
    pub last_assistant_item_id: Option<String>,

    /// Carrier-clock timestamp (ms) at which the current assistant response
    /// started playing, used to compute `audio_end_ms` for a provider
    /// truncate call on barge-in.
    pub response_start_timestamp_ms: Option<u64>,

    /// True once the carrier's first `media` frame has arrived. Audio queued
    /// before this point is buffered rather than dropped.
    pub has_seen_media: bool,

    /// A context-injection request that arrived while the call was on hold,
    /// applied automatically the next time the call resumes.
    pub pending_context_request: Option<ContextRequest>,

    pub status: CallStatus,

    /// Guards `finalize` against running twice for the same call
    /// (both carrier-close and provider-close paths can race to end it).
    pub call_ending: bool,

    /// Set for the brief window between issuing a DTMF-playback redirect and
    /// the carrier reconnecting afterward. Tells `handle_close` the
    /// resulting stream teardown is expected, not a real hangup — handled
    /// the same way as hold, just without the durable on-hold status or
    /// hold music.
    pub awaiting_dtmf_reconnect: bool,

    pub conversation_history: Vec<ConversationEntry>,
    pub carrier_events: Vec<LoggedEvent>,
    pub provider_events: Vec<LoggedEvent>,
}

impl ActiveCallState {
    pub fn new(call_id: String) -> Self {
        Self {
            call_id,
            carrier_stream_id: None,
            latest_media_timestamp_ms: 0,
            mark_queue: VecDeque::new(),
            last_assistant_item_id: None,
            response_start_timestamp_ms: None,
            has_seen_media: false,
            pending_context_request: None,
            status: CallStatus::Initiated,
            call_ending: false,
            awaiting_dtmf_reconnect: false,
            conversation_history: Vec::new(),
            carrier_events: Vec::new(),
            provider_events: Vec::new(),
        }
    }

    pub fn append_conversation(&mut self, role: Role, content: impl Into<String>) {
        self.conversation_history
            .push(ConversationEntry::new(role, content));
    }

    /// Marks the most recent assistant entry as truncated by a barge-in.
    /// A no-op if the last entry isn't an untruncated assistant turn.
    pub fn truncate_last_assistant_entry(&mut self, at_ms: u64) {
        if let Some(entry) = self
            .conversation_history
            .iter_mut()
            .rev()
            .find(|e| e.role == Role::Assistant)
        {
            if !entry.truncated {
                entry.truncated = true;
                entry.truncated_at_ms = Some(at_ms);
            }
        }
    }

    pub fn log_carrier_event(&mut self, kind: impl Into<String>, data: serde_json::Value) {
        self.carrier_events.push(LoggedEvent {
            kind: kind.into(),
            data,
            at: chrono::Utc::now(),
        });
    }

    pub fn log_provider_event(&mut self, kind: impl Into<String>, data: serde_json::Value) {
        self.provider_events.push(LoggedEvent {
            kind: kind.into(),
            data,
            at: chrono::Utc::now(),
        });
    }

    pub fn enqueue_mark(&mut self, name: String) {
        self.mark_queue.push_back(name);
    }

    /// Pops the oldest outstanding mark, regardless of what name the carrier
    /// echoed back. The queue tracks cardinality only (I3) — Twilio's mark
    /// acks identify "one more chunk was played", not which one.
    pub fn dequeue_mark(&mut self, _name: &str) -> bool {
        self.mark_queue.pop_front().is_some()
    }

    /// Clears barge-in/response tracking once a response finishes normally
    /// or is fully truncated, so the next response starts from a clean slate.
    pub fn reset_response_tracking(&mut self) {
        self.last_assistant_item_id = None;
        self.response_start_timestamp_ms = None;
        self.mark_queue.clear();
    }

    pub fn is_on_hold(&self) -> bool {
        self.status == CallStatus::OnHold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_queue_drains_fifo_by_cardinality_not_name() {
        let mut state = ActiveCallState::new("CA1".into());
        state.enqueue_mark("a".into());
        state.enqueue_mark("b".into());

        // A mismatched name still counts as one ack (I3 cares about depth only).
        assert!(state.dequeue_mark("unrelated"));
        assert_eq!(state.mark_queue.len(), 1);

        assert!(state.dequeue_mark("b"));
        assert!(state.mark_queue.is_empty());
        assert!(!state.dequeue_mark("c"));
    }

    #[test]
    fn truncate_last_assistant_entry_is_idempotent() {
        let mut state = ActiveCallState::new("CA1".into());
        state.append_conversation(Role::User, "hi");
        state.append_conversation(Role::Assistant, "hello there");

        state.truncate_last_assistant_entry(1200);
        state.truncate_last_assistant_entry(9999);

        let entry = state.conversation_history.last().unwrap();
        assert!(entry.truncated);
        assert_eq!(entry.truncated_at_ms, Some(1200));
    }

    #[test]
    fn reset_response_tracking_clears_mark_queue_and_item_id() {
        let mut state = ActiveCallState::new("CA1".into());
        state.last_assistant_item_id = Some("item_1".into());
        state.response_start_timestamp_ms = Some(500);
        state.enqueue_mark("m1".into());

        state.reset_response_tracking();

        assert!(state.last_assistant_item_id.is_none());
        assert!(state.response_start_timestamp_ms.is_none());
        assert!(state.mark_queue.is_empty());
    }
}
