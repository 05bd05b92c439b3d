pub mod elevenlabs;
pub mod openai;

use async_trait::async_trait;

use crate::call::ProviderKind;
use crate::config::Config;
use crate::error::SessionError;

/// Events a [`ProviderAdapter`] pushes up to the session runtime. Delivered
/// through the same `SessionCommand` channel C4 already multiplexes carrier
/// events on, so the adapter never touches `ActiveCallState` directly.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// The provider session is usable; any buffered audio/context may flush.
    Ready,
    /// A chunk of synthesized speech for the item currently playing.
    Audio { item_id: String, payload_b64: String },
    /// The caller started speaking while a response was in flight.
    SpeechStarted,
    /// Incremental or final transcript of what the caller said.
    UserTranscript { text: String, is_partial: bool },
    /// Incremental or final transcript of what the assistant is saying.
    AgentTranscript { text: String, is_partial: bool },
    /// The provider itself discarded an in-flight response (ElevenLabs'
    /// own VAD firing server-side); functionally a barge-in notification
    /// distinct from `SpeechStarted` in that no truncate call is needed.
    Interruption,
    /// The model invoked a server-side tool (e.g. `request_operator_input`,
    /// `send_dtmf`). C4 dispatches on `name`; unrecognized names are logged
    /// and dropped.
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
    Error(String),
    Closed,
}

/// The uniform interface C4 drives both realtime backends through.
///
/// Implementations are connection-oriented: a single `ProviderAdapter`
/// instance corresponds to exactly one upstream WebSocket for exactly one
/// call, created fresh on every bridge (including on resume-from-hold).
#[async_trait]
pub trait ProviderAdapter: Send {
    /// Opens the upstream connection and configures the session (voice,
    /// instructions, VAD, audio format). Does not block on readiness;
    /// `ProviderEvent::Ready` arrives asynchronously through `events`.
    async fn connect(
        &mut self,
        system_instructions: &str,
        voice: &str,
    ) -> Result<(), SessionError>;

    /// Forwards one base64 mu-law chunk from the carrier. Safe to call
    /// before `Ready`; adapters that need to (OpenAI) buffer internally.
    async fn send_audio(&mut self, payload_b64: &str) -> Result<(), SessionError>;

    /// Tells the provider the assistant response identified by `item_id`
    /// was only heard up to `audio_end_ms`, so its own transcript/context
    /// state matches what the caller actually heard. A documented no-op for
    /// providers whose own VAD already discards the response server-side.
    async fn truncate(&mut self, item_id: &str, audio_end_ms: u64) -> Result<(), SessionError>;

    /// Sends an out-of-band text item (operator injection, resume summary).
    async fn send_contextual_update(&mut self, text: &str) -> Result<(), SessionError>;

    /// Pulls the next event, if any is queued, without blocking the caller's
    /// own select loop. Returns `None` when no event is currently available.
    async fn next_event(&mut self) -> Option<ProviderEvent>;

    async fn close(&mut self);
}

/// Builds the adapter matching a [`Call`](crate::call::Call)'s configured
/// provider. Fresh on every bridge — including on resume-from-hold, where a
/// new upstream session is opened and re-seeded rather than reused (see
/// DESIGN.md's note on the distilled spec's Open Question (b)).
pub fn build(kind: ProviderKind, config: &Config) -> Box<dyn ProviderAdapter> {
    match kind {
        ProviderKind::Openai => Box::new(openai::OpenAiRealtimeAdapter::new(
            config.provider.openai_api_key.clone(),
        )),
        ProviderKind::Elevenlabs => Box::new(elevenlabs::ElevenLabsConvaiAdapter::new(
            config.provider.elevenlabs_api_key.clone(),
            config.provider.elevenlabs_agent_id.clone(),
        )),
    }
}
