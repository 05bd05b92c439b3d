use serde::{Deserialize, Serialize};

/// Inbound Twilio Media Streams event, tagged on `event` (§6).
#[derive(Debug, Deserialize)]
#[serde(tag = "event")]
#[serde(rename_all = "lowercase")]
#[allow(clippy::large_enum_variant)]
pub enum StreamEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartMetadata,
    },
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    Dtmf {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        dtmf: DtmfPayload,
    },
    Stop {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    pub call_sid: String,
    #[serde(default)]
    pub custom_parameters: CustomParameters,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomParameters {
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub from_number: String,
    #[serde(default)]
    pub to_number: String,
    #[serde(default)]
    pub voice: String,
    #[serde(default)]
    pub system_instructions: String,
    #[serde(default)]
    pub call_instructions: String,
}

#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    pub timestamp: Option<String>,
    /// Base64-encoded mu-law 8kHz audio, forwarded opaque end to end.
    pub payload: String,
}

#[derive(Debug, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct DtmfPayload {
    pub digit: String,
}

/// Outbound `media` frame: carrier plays this payload on the call leg.
pub fn media_frame(stream_sid: &str, payload_b64: &str) -> serde_json::Value {
    serde_json::json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": { "payload": payload_b64 },
    })
}

/// Outbound `mark` frame: the carrier echoes this back once the preceding
/// audio has finished playing, letting C4 track playback progress.
pub fn mark_frame(stream_sid: &str, name: &str) -> serde_json::Value {
    serde_json::json!({
        "event": "mark",
        "streamSid": stream_sid,
        "mark": { "name": name },
    })
}

/// Outbound `clear` frame: discard any audio the carrier has buffered but
/// not yet played, issued on barge-in.
pub fn clear_frame(stream_sid: &str) -> serde_json::Value {
    serde_json::json!({
        "event": "clear",
        "streamSid": stream_sid,
    })
}

#[derive(Debug, Serialize)]
pub struct CallCreatedResponse {
    #[serde(rename = "callId")]
    pub call_id: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_event_with_custom_parameters() {
        let raw = r#"{
            "event": "start",
            "streamSid": "MZ123",
            "start": {
                "callSid": "CA123",
                "customParameters": {
                    "fromNumber": "+15551230000",
                    "toNumber": "+15554560000",
                    "voice": "sage",
                    "systemInstructions": "Be helpful.",
                    "callInstructions": "Confirm the appointment."
                }
            }
        }"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        match event {
            StreamEvent::Start { stream_sid, start } => {
                assert_eq!(stream_sid, "MZ123");
                assert_eq!(start.call_sid, "CA123");
                assert_eq!(start.custom_parameters.voice, "sage");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_media_event() {
        let raw = r#"{"event":"media","streamSid":"MZ1","media":{"timestamp":"100","payload":"abcd"}}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, StreamEvent::Media { .. }));
    }
}
