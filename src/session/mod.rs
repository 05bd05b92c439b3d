pub mod goodbye;
pub mod manager;
pub mod runtime;

use axum::extract::ws::Message as CarrierMessage;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::twilio::wire::StreamEvent;

/// Everything that can happen to a live call, serialized onto the owning
/// session actor's single `select!` loop (the "single-threaded cooperative
/// event loop" the runtime requires).
pub enum SessionCommand {
    Carrier(StreamEvent),
    CarrierClosed,
    Hold(oneshot::Sender<CommandResult>),
    Hangup(oneshot::Sender<CommandResult>),
    InjectContext {
        text: String,
        reply: oneshot::Sender<CommandResult>,
    },
    Dtmf {
        digits: String,
        reply: oneshot::Sender<CommandResult>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub status: String,
    pub resumed: bool,
}

impl CommandResult {
    pub fn ok(status: impl Into<String>) -> Self {
        Self { status: status.into(), resumed: false }
    }

    pub fn resumed(status: impl Into<String>) -> Self {
        Self { status: status.into(), resumed: true }
    }
}

/// A live session's address, held by C5 and by the carrier WS task. Sending
/// a `CarrierMessage` back out is the outbound half; `commands` is the
/// inbound half the actor task reads from.
#[derive(Clone)]
pub struct SessionHandle {
    pub commands: tokio::sync::mpsc::Sender<SessionCommand>,
    pub to_carrier: tokio::sync::mpsc::Sender<CarrierMessage>,
    pub direction: crate::call::Direction,
}
