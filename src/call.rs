use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::ContextRequest;

/// Direction a [`Call`] was placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Which realtime provider is bridging this call's audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Elevenlabs,
}

impl ProviderKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "openai" => Some(ProviderKind::Openai),
            "elevenlabs" => Some(ProviderKind::Elevenlabs),
            _ => None,
        }
    }
}

/// Durable call status. Transitions monotonically along
/// `initiated -> in-progress -> (on-hold <-> in-progress)* -> completed|failed` (I5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Initiated,
    InProgress,
    OnHold,
    Completed,
    Failed,
}

/// A speaker role in the conversation transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry in the append-only conversation history (I2).
///
/// `truncated` flips false -> true exactly once, when a barge-in cuts off an
/// in-flight assistant response; it never flips back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub truncated_at_ms: Option<u64>,
}

impl ConversationEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            truncated: false,
            truncated_at_ms: None,
        }
    }
}

/// A single logged carrier or provider event, kept for diagnostics and
/// for reconstructing what happened on a call after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub kind: String,
    pub data: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// The durable call record (C3). Created on first bridge of a new call,
/// updated throughout, finalized on termination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub call_id: String,
    pub direction: Direction,
    pub from_number: String,
    pub to_number: String,
    pub voice: String,
    pub provider: ProviderKind,
    pub system_instructions: String,
    pub call_instructions: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub status: CallStatus,
    pub error_message: Option<String>,
    pub conversation_history: Vec<ConversationEntry>,
    pub carrier_events: Vec<LoggedEvent>,
    pub provider_events: Vec<LoggedEvent>,
    /// An unanswered operator-input question the agent raised via a tool
    /// call. Survives hold/resume since it lives on the durable record, not
    /// the ephemeral `ActiveCallState`.
    #[serde(default)]
    pub pending_context_request: Option<ContextRequest>,
}

impl Call {
    pub fn new_initiated(
        call_id: String,
        direction: Direction,
        from_number: String,
        to_number: String,
        voice: String,
        provider: ProviderKind,
        system_instructions: String,
        call_instructions: String,
    ) -> Self {
        Self {
            call_id,
            direction,
            from_number,
            to_number,
            voice,
            provider,
            system_instructions,
            call_instructions,
            started_at: Utc::now(),
            ended_at: None,
            duration_secs: None,
            status: CallStatus::Initiated,
            error_message: None,
            conversation_history: Vec::new(),
            carrier_events: Vec::new(),
            provider_events: Vec::new(),
            pending_context_request: None,
        }
    }

    /// Build the numbered, truncated summary used in operator context blocks
    /// and in the resume-from-hold marker (distilled spec: each excerpt
    /// truncated at 100 chars, system messages excluded).
    pub fn conversation_summary(&self) -> String {
        summarize_conversation(&self.conversation_history)
    }

    /// The instructions sent to the provider on a call's first bridge:
    /// the system prompt plus, when present, the per-call directive that
    /// kicks off the conversation (e.g. "Say hi."). Not used on resume —
    /// by then the directive has already been acted on.
    pub fn opening_instructions(&self) -> String {
        if self.call_instructions.trim().is_empty() {
            self.system_instructions.clone()
        } else {
            format!("{}\n\nFor this call: {}", self.system_instructions, self.call_instructions)
        }
    }
}

/// Standalone form of [`Call::conversation_summary`] so the session runtime
/// can summarize `ActiveCallState.conversation_history` directly without a
/// full `Call` on hand.
pub fn summarize_conversation(history: &[ConversationEntry]) -> String {
    history
        .iter()
        .filter(|e| e.role != Role::System)
        .enumerate()
        .map(|(i, e)| {
            let excerpt: String = e.content.chars().take(100).collect();
            format!("{}. {:?}: {}", i + 1, e.role, excerpt)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_summary_excludes_system_and_truncates() {
        let mut call = Call::new_initiated(
            "CA1".into(),
            Direction::Inbound,
            "+1".into(),
            "+2".into(),
            "sage".into(),
            ProviderKind::Openai,
            "sys".into(),
            "".into(),
        );
        call.conversation_history.push(ConversationEntry::new(Role::System, "Operator note: hi"));
        call.conversation_history.push(ConversationEntry::new(Role::User, "a".repeat(150)));
        let summary = call.conversation_summary();
        assert!(!summary.contains("Operator note"));
        assert!(summary.contains("1. User:"));
        assert_eq!(summary.matches('a').count(), 100);
    }

    #[test]
    fn provider_kind_parses_known_values_only() {
        assert_eq!(ProviderKind::parse("openai"), Some(ProviderKind::Openai));
        assert_eq!(ProviderKind::parse("elevenlabs"), Some(ProviderKind::Elevenlabs));
        assert_eq!(ProviderKind::parse("bogus"), None);
    }

    #[test]
    fn opening_instructions_appends_call_instructions_when_present() {
        let call = Call::new_initiated(
            "CA1".into(),
            Direction::Outbound,
            "+1".into(),
            "+2".into(),
            "sage".into(),
            ProviderKind::Openai,
            "You are helpful.".into(),
            "Say hi.".into(),
        );
        let opening = call.opening_instructions();
        assert!(opening.contains("You are helpful."));
        assert!(opening.contains("Say hi."));
    }

    #[test]
    fn opening_instructions_is_just_the_system_prompt_when_no_call_instructions() {
        let call = Call::new_initiated(
            "CA1".into(),
            Direction::Inbound,
            "+1".into(),
            "+2".into(),
            "sage".into(),
            ProviderKind::Openai,
            "You are helpful.".into(),
            "".into(),
        );
        assert_eq!(call.opening_instructions(), "You are helpful.");
    }
}
