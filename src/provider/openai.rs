use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use crate::error::SessionError;
use crate::provider::{ProviderAdapter, ProviderEvent};

const OPENAI_REALTIME_URL: &str =
    "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview";

/// Realtime session adapter for OpenAI's `session.update`/`conversation.item.*`
/// wire protocol. Holds a writer task feeding outbound frames and a reader
/// task translating server events into [`ProviderEvent`]s; both are spawned
/// on `connect` and torn down on `close`.
pub struct OpenAiRealtimeAdapter {
    api_key: String,
    outbound_tx: Option<mpsc::Sender<Message>>,
    event_rx: Option<mpsc::Receiver<ProviderEvent>>,
    ready: bool,
    pending_audio: Vec<String>,
    pending_context: Vec<String>,
}

impl OpenAiRealtimeAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            outbound_tx: None,
            event_rx: None,
            ready: false,
            pending_audio: Vec::new(),
            pending_context: Vec::new(),
        }
    }

    async fn send_json(&mut self, value: serde_json::Value) -> Result<(), SessionError> {
        let tx = self
            .outbound_tx
            .as_ref()
            .ok_or_else(|| SessionError::ProviderUnavailable("not connected".into()))?;
        tx.send(Message::Text(value.to_string().into()))
            .await
            .map_err(|_| SessionError::ProviderUnavailable("writer task gone".into()))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiRealtimeAdapter {
    async fn connect(
        &mut self,
        system_instructions: &str,
        voice: &str,
    ) -> Result<(), SessionError> {
        let mut request = OPENAI_REALTIME_URL
            .into_client_request()
            .map_err(|e| SessionError::ProviderUnavailable(e.to_string()))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.api_key)
                .parse()
                .map_err(|_| SessionError::ProviderUnavailable("invalid api key".into()))?,
        );
        request.headers_mut().insert(
            "OpenAI-Beta",
            "realtime=v1"
                .parse()
                .map_err(|_| SessionError::ProviderUnavailable("header build failed".into()))?,
        );

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SessionError::ProviderUnavailable(e.to_string()))?;
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let session_update = serde_json::json!({
            "type": "session.update",
            "session": {
                "modalities": ["audio", "text"],
                "instructions": system_instructions,
                "voice": voice,
                "input_audio_format": "g711_ulaw",
                "output_audio_format": "g711_ulaw",
                "turn_detection": { "type": "server_vad" },
                "input_audio_transcription": { "model": "whisper-1" },
                "tools": realtime_tools(),
            }
        });

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);
        let (event_tx, event_rx) = mpsc::channel::<ProviderEvent>(128);

        outbound_tx
            .send(Message::Text(session_update.to_string().into()))
            .await
            .map_err(|_| SessionError::ProviderUnavailable("writer task gone".into()))?;

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if ws_write.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = ws_write.send(Message::Close(None)).await;
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                let Ok(msg) = msg else {
                    let _ = event_tx.send(ProviderEvent::Closed).await;
                    break;
                };
                let Message::Text(text) = msg else { continue };
                let Some(event) = parse_server_event(&text) else { continue };
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        self.outbound_tx = Some(outbound_tx);
        self.event_rx = Some(event_rx);
        Ok(())
    }

    async fn send_audio(&mut self, payload_b64: &str) -> Result<(), SessionError> {
        if !self.ready {
            self.pending_audio.push(payload_b64.to_string());
            return Ok(());
        }
        self.send_json(serde_json::json!({
            "type": "input_audio_buffer.append",
            "audio": payload_b64,
        }))
        .await
    }

    async fn truncate(&mut self, item_id: &str, audio_end_ms: u64) -> Result<(), SessionError> {
        self.send_json(serde_json::json!({
            "type": "conversation.item.truncate",
            "item_id": item_id,
            "content_index": 0,
            "audio_end_ms": audio_end_ms,
        }))
        .await
    }

    async fn send_contextual_update(&mut self, text: &str) -> Result<(), SessionError> {
        if !self.ready {
            self.pending_context.push(text.to_string());
            return Ok(());
        }
        self.send_json(serde_json::json!({
            "type": "conversation.item.create",
            "item": {
                "type": "message",
                "role": "user",
                "content": [{ "type": "input_text", "text": text }],
            }
        }))
        .await?;
        self.send_json(serde_json::json!({ "type": "response.create" })).await
    }

    async fn next_event(&mut self) -> Option<ProviderEvent> {
        let rx = self.event_rx.as_mut()?;
        let event = rx.recv().await?;
        if matches!(event, ProviderEvent::Ready) {
            self.ready = true;
            for payload in std::mem::take(&mut self.pending_audio) {
                let _ = self.send_audio(&payload).await;
            }
            for text in std::mem::take(&mut self.pending_context) {
                let _ = self.send_contextual_update(&text).await;
            }
        }
        Some(event)
    }

    async fn close(&mut self) {
        self.outbound_tx = None;
        self.event_rx = None;
    }
}

/// Tool schemas the model may invoke: escalate to a human operator, or ask
/// the carrier to play touch-tones. Both are dispatched by C4 through
/// `ProviderEvent::ToolCall`.
fn realtime_tools() -> serde_json::Value {
    serde_json::json!([
        {
            "type": "function",
            "name": "request_operator_input",
            "description": "Pause and ask a human operator for guidance before continuing the call.",
            "parameters": {
                "type": "object",
                "properties": { "question": { "type": "string" } },
                "required": ["question"],
            }
        },
        {
            "type": "function",
            "name": "send_dtmf",
            "description": "Send touch-tone digits on the current call.",
            "parameters": {
                "type": "object",
                "properties": { "digits": { "type": "string" } },
                "required": ["digits"],
            }
        }
    ])
}

fn parse_server_event(text: &str) -> Option<ProviderEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let event_type = value.get("type")?.as_str()?;
    match event_type {
        "session.created" => Some(ProviderEvent::Ready),
        "response.audio.delta" => Some(ProviderEvent::Audio {
            item_id: value.get("item_id")?.as_str()?.to_string(),
            payload_b64: value.get("delta")?.as_str()?.to_string(),
        }),
        "input_audio_buffer.speech_started" => Some(ProviderEvent::SpeechStarted),
        "conversation.item.input_audio_transcription.completed" => {
            Some(ProviderEvent::UserTranscript {
                text: value.get("transcript")?.as_str()?.to_string(),
                is_partial: false,
            })
        }
        "conversation.item.input_audio_transcription.delta" => Some(ProviderEvent::UserTranscript {
            text: value.get("delta")?.as_str()?.to_string(),
            is_partial: true,
        }),
        "response.audio_transcript.delta" => Some(ProviderEvent::AgentTranscript {
            text: value.get("delta")?.as_str()?.to_string(),
            is_partial: true,
        }),
        "response.audio_transcript.done" => Some(ProviderEvent::AgentTranscript {
            text: value.get("transcript")?.as_str().unwrap_or_default().to_string(),
            is_partial: false,
        }),
        "response.function_call_arguments.done" => Some(ProviderEvent::ToolCall {
            name: value.get("name")?.as_str()?.to_string(),
            arguments: value
                .get("arguments")
                .and_then(|a| a.as_str())
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(serde_json::Value::Null),
        }),
        "error" => Some(ProviderEvent::Error(
            value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("unknown realtime error")
                .to_string(),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_audio_delta() {
        let raw = r#"{"type":"response.audio.delta","item_id":"item_1","delta":"abcd"}"#;
        match parse_server_event(raw) {
            Some(ProviderEvent::Audio { item_id, payload_b64 }) => {
                assert_eq!(item_id, "item_1");
                assert_eq!(payload_b64, "abcd");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn ignores_unknown_event_types() {
        let raw = r#"{"type":"response.output_item.added"}"#;
        assert!(parse_server_event(raw).is_none());
    }

    #[test]
    fn parses_error_event() {
        let raw = r#"{"type":"error","error":{"message":"bad request"}}"#;
        match parse_server_event(raw) {
            Some(ProviderEvent::Error(msg)) => assert_eq!(msg, "bad request"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
