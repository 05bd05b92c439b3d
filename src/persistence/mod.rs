pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::call::{Call, CallStatus, ConversationEntry, LoggedEvent};
use crate::error::StorageError;
use crate::state::ContextRequest;

pub use sqlite::SqliteCallRepository;

/// Everything [`CallRepository::finalize`] writes in one shot, so a call's
/// terminal state lands as a single durable write rather than several.
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub ended_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub status: CallStatus,
    pub conversation_history: Vec<ConversationEntry>,
    pub carrier_events: Vec<LoggedEvent>,
    pub provider_events: Vec<LoggedEvent>,
    pub error_message: Option<String>,
}

/// The persistence boundary (C7). Implementations must support atomic
/// append-ish updates to conversation history and a one-shot finalize,
/// and must not block the caller's single-threaded session loop for long —
/// `SqliteCallRepository` satisfies this by driving rusqlite through
/// `spawn_blocking`.
#[async_trait]
pub trait CallRepository: Send + Sync {
    async fn create_call(&self, call: &Call) -> Result<(), StorageError>;
    async fn mark_in_progress(&self, call_id: &str) -> Result<(), StorageError>;
    async fn get_call(&self, call_id: &str) -> Result<Option<Call>, StorageError>;
    async fn update_conversation_history(
        &self,
        call_id: &str,
        history: &[ConversationEntry],
    ) -> Result<(), StorageError>;
    async fn set_status(&self, call_id: &str, status: CallStatus) -> Result<(), StorageError>;
    async fn set_pending_context_request(
        &self,
        call_id: &str,
        request: Option<ContextRequest>,
    ) -> Result<(), StorageError>;
    async fn finalize(&self, call_id: &str, outcome: FinalizeOutcome) -> Result<(), StorageError>;
}
