use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use crate::error::SessionError;
use crate::provider::{ProviderAdapter, ProviderEvent};

const ELEVENLABS_CONVAI_URL: &str =
    "wss://api.elevenlabs.io/v1/convai/conversation?agent_id=";

/// Realtime session adapter for ElevenLabs Conversational AI. Unlike OpenAI,
/// the ElevenLabs agent is usable the instant the socket is open — the first
/// message sent is itself the configuration, so `Ready` fires immediately
/// after connect rather than waiting on a server acknowledgement.
pub struct ElevenLabsConvaiAdapter {
    api_key: String,
    agent_id: String,
    outbound_tx: Option<mpsc::Sender<Message>>,
    event_rx: Option<mpsc::Receiver<ProviderEvent>>,
}

impl ElevenLabsConvaiAdapter {
    pub fn new(api_key: String, agent_id: String) -> Self {
        Self {
            api_key,
            agent_id,
            outbound_tx: None,
            event_rx: None,
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
impl ProviderAdapter for ElevenLabsConvaiAdapter {
    async fn connect(
        &mut self,
        system_instructions: &str,
        voice: &str,
    ) -> Result<(), SessionError> {
        let url = format!("{ELEVENLABS_CONVAI_URL}{}", self.agent_id);
        let mut request = url
            .into_client_request()
            .map_err(|e| SessionError::ProviderUnavailable(e.to_string()))?;
        request.headers_mut().insert(
            "xi-api-key",
            self.api_key
                .parse()
                .map_err(|_| SessionError::ProviderUnavailable("invalid api key".into()))?,
        );

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SessionError::ProviderUnavailable(e.to_string()))?;
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let init = serde_json::json!({
            "type": "conversation_initiation_client_data",
            "conversation_config_override": {
                "agent": {
                    "prompt": { "prompt": system_instructions },
                },
                "tts": { "voice_id": voice },
            }
        });

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);
        let (event_tx, event_rx) = mpsc::channel::<ProviderEvent>(128);

        ws_write
            .send(Message::Text(init.to_string().into()))
            .await
            .map_err(|e| SessionError::ProviderUnavailable(e.to_string()))?;

        // Unlike OpenAI, there is no server acknowledgement that gates
        // readiness — the ConvAI agent is usable the instant the init frame
        // is away, so `Ready` is synthesized locally rather than waited for.
        let _ = event_tx.send(ProviderEvent::Ready).await;

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
        self.send_json(serde_json::json!({
            "user_audio_chunk": payload_b64,
        }))
        .await
    }

    /// ElevenLabs' agent discards its in-flight response server-side the
    /// moment its own VAD fires an `interruption` event; there is no
    /// client-initiated truncate call in the ConvAI protocol, so this is a
    /// documented no-op (see DESIGN.md).
    async fn truncate(&mut self, _item_id: &str, _audio_end_ms: u64) -> Result<(), SessionError> {
        Ok(())
    }

    async fn send_contextual_update(&mut self, text: &str) -> Result<(), SessionError> {
        self.send_json(serde_json::json!({
            "type": "contextual_update",
            "text": text,
        }))
        .await
    }

    async fn next_event(&mut self) -> Option<ProviderEvent> {
        let rx = self.event_rx.as_mut()?;
        rx.recv().await
    }

    async fn close(&mut self) {
        self.outbound_tx = None;
        self.event_rx = None;
    }
}

fn parse_server_event(text: &str) -> Option<ProviderEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let event_type = value.get("type")?.as_str()?;
    match event_type {
        "audio" => {
            let event = value.get("audio_event")?;
            let item_id = event.get("event_id")?.as_u64()?.to_string();
            Some(ProviderEvent::Audio {
                item_id,
                payload_b64: event.get("audio_base_64")?.as_str()?.to_string(),
            })
        }
        "user_transcript" => Some(ProviderEvent::UserTranscript {
            text: value
                .get("user_transcription_event")?
                .get("user_transcript")?
                .as_str()?
                .to_string(),
            is_partial: false,
        }),
        "agent_response" => Some(ProviderEvent::AgentTranscript {
            text: value
                .get("agent_response_event")?
                .get("agent_response")?
                .as_str()?
                .to_string(),
            is_partial: false,
        }),
        "interruption" => Some(ProviderEvent::Interruption),
        "client_tool_call" => {
            let call = value.get("client_tool_call")?;
            Some(ProviderEvent::ToolCall {
                name: call.get("tool_name")?.as_str()?.to_string(),
                arguments: call.get("parameters").cloned().unwrap_or(serde_json::Value::Null),
            })
        }
        "ping" => None,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_agent_response() {
        let raw = r#"{"type":"agent_response","agent_response_event":{"agent_response":"hi there"}}"#;
        match parse_server_event(raw) {
            Some(ProviderEvent::AgentTranscript { text, is_partial }) => {
                assert_eq!(text, "hi there");
                assert!(!is_partial);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_interruption() {
        let raw = r#"{"type":"interruption"}"#;
        assert!(matches!(parse_server_event(raw), Some(ProviderEvent::Interruption)));
    }

    #[test]
    fn ignores_ping() {
        let raw = r#"{"type":"ping","ping_event":{"event_id":1}}"#;
        assert!(parse_server_event(raw).is_none());
    }
}
