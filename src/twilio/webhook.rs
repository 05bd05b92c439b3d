use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::call::Direction;
use crate::AppState;

/// Per-call configuration threaded through the outbound webhook's query
/// string by [`crate::twilio::client::TwilioClient::originate`]. Present
/// only the first time a new outbound call connects; a resumed call omits
/// these since C7 already holds the record.
#[derive(Debug, Default, Deserialize)]
pub struct OutboundParams {
    #[serde(rename = "toNumber")]
    to_number: Option<String>,
    #[serde(rename = "fromNumber")]
    from_number: Option<String>,
    voice: Option<String>,
    #[serde(rename = "systemInstructions")]
    system_instructions: Option<String>,
    #[serde(rename = "callInstructions")]
    call_instructions: Option<String>,
}

/// POST /twilio/voice — inbound call webhook. No prior configuration exists
/// for a call the carrier originated on its own, so the configured defaults
/// are attached directly as `<Parameter>` elements — C4 always sees a
/// non-empty `systemInstructions` regardless of which leg produced the call.
///
/// Checked against the inbound admission cap before the media stream opens:
/// the session actor only registers with [`crate::session::manager::SessionManager`]
/// once bootstrap completes, far too late to turn an over-capacity caller
/// away politely, so this is the one admission check that has to happen
/// here rather than in C4.
pub async fn handle_voice(State(state): State<AppState>) -> Response {
    if state.session_manager.can_accept(Direction::Inbound).is_err() {
        return busy_response();
    }

    let voice = state.config.provider.default_voice.clone();
    let instructions = state.config.provider.default_system_instructions.clone();
    let twiml_params = [
        ("direction", "inbound"),
        ("voice", voice.as_str()),
        ("systemInstructions", instructions.as_str()),
    ];
    twiml_connect(&media_stream_url(&state.config.server.external_url), &twiml_params)
}

/// POST /twilio/voice/outbound — webhook for calls C4 originated, both the
/// first leg and every resume-from-hold leg. Re-emits the per-call
/// configuration as `<Parameter>` elements so the resulting `start` event's
/// `customParameters` carry them through to C4; `direction` is always
/// `outbound` here regardless of query contents, since this path is only
/// ever reached for a call this system placed.
pub async fn handle_voice_outbound(
    State(state): State<AppState>,
    Query(params): Query<OutboundParams>,
) -> Response {
    let mut twiml_params = vec![("direction", "outbound")];
    if let Some(v) = &params.to_number {
        twiml_params.push(("toNumber", v.as_str()));
    }
    if let Some(v) = &params.from_number {
        twiml_params.push(("fromNumber", v.as_str()));
    }
    if let Some(v) = &params.voice {
        twiml_params.push(("voice", v.as_str()));
    }
    if let Some(v) = &params.system_instructions {
        twiml_params.push(("systemInstructions", v.as_str()));
    }
    if let Some(v) = &params.call_instructions {
        twiml_params.push(("callInstructions", v.as_str()));
    }
    twiml_connect(&media_stream_url(&state.config.server.external_url), &twiml_params)
}

/// POST /twilio/voice/hold — played while a call is on-hold. Loops hold
/// music rather than opening a new media stream.
pub async fn handle_voice_hold() -> Response {
    let twiml = r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Play loop="0">https://com.twilio.music.classical.s3.amazonaws.com/ith_crazy_tall_people.mp3</Play>
</Response>"#;
    ([("Content-Type", "text/xml")], twiml).into_response()
}

#[derive(Debug, Deserialize)]
pub struct DtmfParams {
    digits: String,
}

/// POST /twilio/voice/dtmf — [`crate::twilio::client::TwilioClient::send_digits`]
/// redirects here to play operator/agent-issued touch-tones in-band, then
/// redirects straight back into the media stream so the session actor picks
/// the call back up as a resume once the tones finish.
pub async fn handle_voice_dtmf(State(state): State<AppState>, Query(params): Query<DtmfParams>) -> Response {
    let twiml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Play digits="{}" />
    <Redirect method="POST">{}/twilio/voice/outbound</Redirect>
</Response>"#,
        escape_xml(&params.digits),
        state.config.server.external_url
    );
    ([("Content-Type", "text/xml")], twiml).into_response()
}

/// TwiML played to a caller turned away at the door: hang up politely
/// instead of leaving the line silent.
fn busy_response() -> Response {
    let twiml = r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Say>We're at capacity right now. Please try your call again shortly.</Say>
    <Hangup />
</Response>"#;
    ([("Content-Type", "text/xml")], twiml).into_response()
}

fn twiml_connect(ws_url: &str, params: &[(&str, &str)]) -> Response {
    let parameter_tags: String = params
        .iter()
        .map(|(name, value)| format!(r#"<Parameter name="{name}" value="{}" />"#, escape_xml(value)))
        .collect();

    let twiml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Connect>
        <Stream url="{ws_url}">
            {parameter_tags}
        </Stream>
    </Connect>
</Response>"#
    );
    ([("Content-Type", "text/xml")], twiml).into_response()
}

fn media_stream_url(external_url: &str) -> String {
    let base = external_url
        .replace("https://", "wss://")
        .replace("http://", "ws://");
    format!("{base}/twilio/media")
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
