use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::call::{Call, CallStatus, ConversationEntry, Direction, LoggedEvent, ProviderKind};
use crate::error::StorageError;
use crate::state::ContextRequest;

use super::{CallRepository, FinalizeOutcome};

/// SQLite-backed [`CallRepository`]. The connection is not `Send`-shareable
/// across awaits on its own, so every query runs inside `spawn_blocking`
/// holding a plain `std::sync::Mutex` for the duration of that one query —
/// never held across an `.await`.
pub struct SqliteCallRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCallRepository {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS calls (
                call_id TEXT PRIMARY KEY,
                direction TEXT NOT NULL,
                from_number TEXT NOT NULL,
                to_number TEXT NOT NULL,
                voice TEXT NOT NULL,
                provider TEXT NOT NULL,
                system_instructions TEXT NOT NULL,
                call_instructions TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                duration_secs INTEGER,
                status TEXT NOT NULL,
                error_message TEXT,
                conversation_history TEXT NOT NULL,
                carrier_events TEXT NOT NULL,
                provider_events TEXT NOT NULL,
                pending_context_request TEXT
            )",
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn row_to_call(row: &rusqlite::Row) -> rusqlite::Result<Call> {
        let direction: String = row.get("direction")?;
        let provider: String = row.get("provider")?;
        let status: String = row.get("status")?;
        let conversation_history: String = row.get("conversation_history")?;
        let carrier_events: String = row.get("carrier_events")?;
        let provider_events: String = row.get("provider_events")?;
        let pending_context_request: Option<String> = row.get("pending_context_request")?;

        Ok(Call {
            call_id: row.get("call_id")?,
            direction: parse_direction(&direction),
            from_number: row.get("from_number")?,
            to_number: row.get("to_number")?,
            voice: row.get("voice")?,
            provider: ProviderKind::parse(&provider).unwrap_or(ProviderKind::Openai),
            system_instructions: row.get("system_instructions")?,
            call_instructions: row.get("call_instructions")?,
            started_at: row.get("started_at")?,
            ended_at: row.get("ended_at")?,
            duration_secs: row.get("duration_secs")?,
            status: parse_status(&status),
            error_message: row.get("error_message")?,
            conversation_history: serde_json::from_str(&conversation_history).unwrap_or_default(),
            carrier_events: serde_json::from_str(&carrier_events).unwrap_or_default(),
            provider_events: serde_json::from_str(&provider_events).unwrap_or_default(),
            pending_context_request: pending_context_request
                .and_then(|s| serde_json::from_str(&s).ok()),
        })
    }
}

fn parse_direction(s: &str) -> Direction {
    match s {
        "outbound" => Direction::Outbound,
        _ => Direction::Inbound,
    }
}

fn direction_str(d: Direction) -> &'static str {
    match d {
        Direction::Inbound => "inbound",
        Direction::Outbound => "outbound",
    }
}

fn parse_status(s: &str) -> CallStatus {
    match s {
        "in-progress" => CallStatus::InProgress,
        "on-hold" => CallStatus::OnHold,
        "completed" => CallStatus::Completed,
        "failed" => CallStatus::Failed,
        _ => CallStatus::Initiated,
    }
}

fn status_str(s: CallStatus) -> &'static str {
    match s {
        CallStatus::Initiated => "initiated",
        CallStatus::InProgress => "in-progress",
        CallStatus::OnHold => "on-hold",
        CallStatus::Completed => "completed",
        CallStatus::Failed => "failed",
    }
}

#[async_trait]
impl CallRepository for SqliteCallRepository {
    async fn create_call(&self, call: &Call) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let call = call.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO calls (
                    call_id, direction, from_number, to_number, voice, provider,
                    system_instructions, call_instructions, started_at, ended_at,
                    duration_secs, status, error_message, conversation_history,
                    carrier_events, provider_events, pending_context_request
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, NULL, ?10, NULL, ?11, ?12, ?13, NULL)",
                params![
                    call.call_id,
                    direction_str(call.direction),
                    call.from_number,
                    call.to_number,
                    call.voice,
                    format!("{:?}", call.provider).to_lowercase(),
                    call.system_instructions,
                    call.call_instructions,
                    call.started_at,
                    status_str(call.status),
                    serde_json::to_string(&call.conversation_history)?,
                    serde_json::to_string(&call.carrier_events)?,
                    serde_json::to_string(&call.provider_events)?,
                ],
            )?;
            Ok::<_, StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Sqlite(e.to_string()))?
    }

    async fn mark_in_progress(&self, call_id: &str) -> Result<(), StorageError> {
        self.set_status(call_id, CallStatus::InProgress).await
    }

    async fn get_call(&self, call_id: &str) -> Result<Option<Call>, StorageError> {
        let conn = self.conn.clone();
        let call_id = call_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let call = conn
                .query_row(
                    "SELECT * FROM calls WHERE call_id = ?1",
                    params![call_id],
                    Self::row_to_call,
                )
                .optional()?;
            Ok::<_, StorageError>(call)
        })
        .await
        .map_err(|e| StorageError::Sqlite(e.to_string()))?
    }

    async fn update_conversation_history(
        &self,
        call_id: &str,
        history: &[ConversationEntry],
    ) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let call_id = call_id.to_string();
        let history_json = serde_json::to_string(history)?;
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let updated = conn.execute(
                "UPDATE calls SET conversation_history = ?1 WHERE call_id = ?2",
                params![history_json, call_id],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound(call_id));
            }
            Ok::<_, StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Sqlite(e.to_string()))?
    }

    async fn set_status(&self, call_id: &str, status: CallStatus) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let call_id = call_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let updated = conn.execute(
                "UPDATE calls SET status = ?1 WHERE call_id = ?2",
                params![status_str(status), call_id],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound(call_id));
            }
            Ok::<_, StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Sqlite(e.to_string()))?
    }

    async fn set_pending_context_request(
        &self,
        call_id: &str,
        request: Option<ContextRequest>,
    ) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let call_id = call_id.to_string();
        let encoded = match request {
            Some(r) => Some(serde_json::to_string(&r)?),
            None => None,
        };
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let updated = conn.execute(
                "UPDATE calls SET pending_context_request = ?1 WHERE call_id = ?2",
                params![encoded, call_id],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound(call_id));
            }
            Ok::<_, StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Sqlite(e.to_string()))?
    }

    async fn finalize(&self, call_id: &str, outcome: FinalizeOutcome) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let call_id = call_id.to_string();
        let history_json = serde_json::to_string(&outcome.conversation_history)?;
        let carrier_json = serde_json::to_string(&outcome.carrier_events)?;
        let provider_json = serde_json::to_string(&outcome.provider_events)?;
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let updated = conn.execute(
                "UPDATE calls SET
                    status = ?1, ended_at = ?2, duration_secs = ?3, error_message = ?4,
                    conversation_history = ?5, carrier_events = ?6, provider_events = ?7
                 WHERE call_id = ?8",
                params![
                    status_str(outcome.status),
                    outcome.ended_at,
                    outcome.duration_secs,
                    outcome.error_message,
                    history_json,
                    carrier_json,
                    provider_json,
                    call_id,
                ],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound(call_id));
            }
            Ok::<_, StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Sqlite(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Role;

    fn sample_call(id: &str) -> Call {
        Call::new_initiated(
            id.to_string(),
            Direction::Inbound,
            "+15550001111".into(),
            "+15550002222".into(),
            "sage".into(),
            ProviderKind::Openai,
            "Be helpful.".into(),
            "".into(),
        )
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let repo = SqliteCallRepository::open(":memory:").unwrap();
        let call = sample_call("CA1");
        repo.create_call(&call).await.unwrap();

        let fetched = repo.get_call("CA1").await.unwrap().expect("call exists");
        assert_eq!(fetched.call_id, "CA1");
        assert_eq!(fetched.status, CallStatus::Initiated);
        assert_eq!(fetched.provider, ProviderKind::Openai);
    }

    #[tokio::test]
    async fn get_unknown_call_returns_none() {
        let repo = SqliteCallRepository::open(":memory:").unwrap();
        assert!(repo.get_call("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_conversation_history_round_trips_and_survives_hold_resume() {
        let repo = SqliteCallRepository::open(":memory:").unwrap();
        let call = sample_call("CA1");
        repo.create_call(&call).await.unwrap();

        let history = vec![
            ConversationEntry::new(Role::User, "hi"),
            ConversationEntry::new(Role::Assistant, "hello there"),
        ];
        repo.update_conversation_history("CA1", &history).await.unwrap();
        repo.set_status("CA1", CallStatus::OnHold).await.unwrap();

        let fetched = repo.get_call("CA1").await.unwrap().unwrap();
        assert_eq!(fetched.status, CallStatus::OnHold);
        assert_eq!(fetched.conversation_history.len(), 2);
        assert_eq!(fetched.conversation_history[1].content, "hello there");
    }

    #[tokio::test]
    async fn finalize_is_a_single_terminal_write() {
        let repo = SqliteCallRepository::open(":memory:").unwrap();
        let call = sample_call("CA1");
        repo.create_call(&call).await.unwrap();

        let outcome = FinalizeOutcome {
            ended_at: chrono::Utc::now(),
            duration_secs: 42,
            status: CallStatus::Completed,
            conversation_history: vec![ConversationEntry::new(Role::User, "bye bye")],
            carrier_events: vec![],
            provider_events: vec![],
            error_message: None,
        };
        repo.finalize("CA1", outcome).await.unwrap();

        let fetched = repo.get_call("CA1").await.unwrap().unwrap();
        assert_eq!(fetched.status, CallStatus::Completed);
        assert_eq!(fetched.duration_secs, Some(42));
        assert_eq!(fetched.conversation_history.len(), 1);
    }

    #[tokio::test]
    async fn pending_context_request_round_trips() {
        let repo = SqliteCallRepository::open(":memory:").unwrap();
        repo.create_call(&sample_call("CA1")).await.unwrap();

        let request = ContextRequest {
            question: "Confirm the customer's email?".into(),
            requested_by: "agent".into(),
            timestamp: chrono::Utc::now(),
        };
        repo.set_pending_context_request("CA1", Some(request.clone())).await.unwrap();
        let fetched = repo.get_call("CA1").await.unwrap().unwrap();
        assert_eq!(fetched.pending_context_request.unwrap().question, request.question);

        repo.set_pending_context_request("CA1", None).await.unwrap();
        let fetched = repo.get_call("CA1").await.unwrap().unwrap();
        assert!(fetched.pending_context_request.is_none());
    }
}
