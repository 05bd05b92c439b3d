use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::session;
use crate::session::SessionCommand;
use crate::twilio::wire::StreamEvent;
use crate::AppState;

/// GET /twilio/media — the Media Streams WebSocket Twilio connects to after
/// `<Connect><Stream>`. One socket per call leg; this handler owns nothing
/// beyond wiring the socket to a freshly spawned session actor (C4) and is
/// torn down the moment that socket closes.
pub async fn handle_media(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| bridge(socket, state))
}

async fn bridge(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (to_carrier_tx, mut to_carrier_rx) = mpsc::channel::<Message>(64);

    let deps = session::runtime::SessionDeps {
        config: state.config.clone(),
        repository: state.repository.clone(),
        session_manager: state.session_manager.clone(),
        events: state.events.clone(),
        twilio: state.twilio.clone(),
    };
    let commands = session::runtime::spawn(deps, to_carrier_tx);

    tokio::spawn(async move {
        while let Some(msg) = to_carrier_rx.recv().await {
            if ws_sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_sink.send(Message::Close(None)).await;
    });

    while let Some(msg) = ws_stream.next().await {
        let Ok(msg) = msg else { break };
        let Message::Text(text) = msg else { continue };
        match serde_json::from_str::<StreamEvent>(&text) {
            Ok(event) => {
                if commands.send(SessionCommand::Carrier(event)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse carrier frame, dropping");
            }
        }
    }

    let _ = commands.send(SessionCommand::CarrierClosed).await;
}
