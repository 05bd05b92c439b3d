use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::call::Direction;
use crate::config::CapsConfig;
use crate::session::{CommandResult, SessionCommand, SessionHandle};

#[derive(Debug, Default, Clone, Copy)]
struct AdmissionCounters {
    outgoing: usize,
    incoming: usize,
}

impl AdmissionCounters {
    fn total(&self) -> usize {
        self.outgoing + self.incoming
    }
}

/// The process-wide registry of live calls (C5). `sessions` and `counters`
/// are two separate mutexes guarding two different pieces of state, but
/// `try_register` takes both together so the check-then-insert pair in the
/// admission path is atomic (I4's single-mutex requirement, realized here
/// as "lock both, mutate both, unlock both" rather than a literal single
/// lock, since the handle map and the counters are never read independently
/// of one another).
pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    counters: Mutex<AdmissionCounters>,
    caps: CapsConfig,
}

pub struct CapacityError {
    pub total: usize,
    pub outgoing: usize,
    pub incoming: usize,
}

pub struct ShutdownReport {
    pub terminated_calls: Vec<String>,
    pub failed_calls: Vec<String>,
}

impl SessionManager {
    pub fn new(caps: CapsConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            counters: Mutex::new(AdmissionCounters::default()),
            caps,
        }
    }

    /// Atomically checks admission caps and, if they hold, registers the
    /// handle and bumps the relevant counter. Returns the capacity snapshot
    /// as an error when refused, so callers can report it (§6's 429 body).
    pub fn try_register(
        &self,
        call_id: String,
        direction: Direction,
        handle: SessionHandle,
    ) -> Result<(), CapacityError> {
        let mut counters = self.counters.lock().unwrap();
        Self::check_admission(&counters, &self.caps, direction)?;

        match direction {
            Direction::Outbound => counters.outgoing += 1,
            Direction::Inbound => counters.incoming += 1,
        }
        self.sessions.lock().unwrap().insert(call_id, handle);
        Ok(())
    }

    /// Read-only admission check, for callers (the control plane's
    /// `createOutboundCall`) that need to refuse before a carrier
    /// origination attempt is even made, well before a `SessionHandle`
    /// exists to register.
    pub fn can_accept(&self, direction: Direction) -> Result<(), CapacityError> {
        let counters = self.counters.lock().unwrap();
        Self::check_admission(&counters, &self.caps, direction)
    }

    fn check_admission(
        counters: &AdmissionCounters,
        caps: &CapsConfig,
        direction: Direction,
    ) -> Result<(), CapacityError> {
        let directional_ok = match direction {
            Direction::Outbound => counters.outgoing < caps.max_concurrent_outgoing_calls,
            Direction::Inbound => counters.incoming < caps.max_concurrent_incoming_calls,
        };
        if counters.total() >= caps.max_concurrent_calls || !directional_ok {
            return Err(CapacityError {
                total: counters.total(),
                outgoing: counters.outgoing,
                incoming: counters.incoming,
            });
        }
        Ok(())
    }

    pub fn unregister(&self, call_id: &str, direction: Direction) {
        if self.sessions.lock().unwrap().remove(call_id).is_some() {
            let mut counters = self.counters.lock().unwrap();
            match direction {
                Direction::Outbound => counters.outgoing = counters.outgoing.saturating_sub(1),
                Direction::Inbound => counters.incoming = counters.incoming.saturating_sub(1),
            }
        }
    }

    pub fn get(&self, call_id: &str) -> Option<SessionHandle> {
        self.sessions.lock().unwrap().get(call_id).cloned()
    }

    pub fn list_active(&self) -> Vec<String> {
        self.sessions.lock().unwrap().keys().cloned().collect()
    }

    /// Sends `Hangup` to every live session and waits (bounded) for each
    /// reply, tallying successes against timeouts/drops.
    pub async fn emergency_shutdown(&self) -> ShutdownReport {
        let handles: Vec<_> = self.sessions.lock().unwrap().clone().into_iter().collect();
        let mut terminated_calls = Vec::new();
        let mut failed_calls = Vec::new();

        for (call_id, handle) in handles {
            let (reply_tx, reply_rx) = oneshot::channel();
            if handle.commands.send(SessionCommand::Hangup(reply_tx)).await.is_err() {
                failed_calls.push(call_id);
                continue;
            }
            match tokio::time::timeout(Duration::from_secs(5), reply_rx).await {
                Ok(Ok(CommandResult { .. })) => terminated_calls.push(call_id),
                _ => failed_calls.push(call_id),
            }
        }

        ShutdownReport { terminated_calls, failed_calls }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    fn test_handle() -> SessionHandle {
        let (commands, _rx) = mpsc::channel(1);
        let (to_carrier, _rx2) = mpsc::channel::<Message>(1);
        SessionHandle { commands, to_carrier, direction: Direction::Inbound }
    }

    fn tight_caps() -> CapsConfig {
        CapsConfig {
            max_concurrent_calls: 2,
            max_concurrent_outgoing_calls: 1,
            max_concurrent_incoming_calls: 1,
            max_outgoing_call_duration: 600,
            max_incoming_call_duration: 1800,
        }
    }

    #[test]
    fn rejects_past_directional_cap_even_with_total_headroom() {
        let mgr = SessionManager::new(tight_caps());
        assert!(mgr.try_register("A".into(), Direction::Inbound, test_handle()).is_ok());
        let err = mgr
            .try_register("B".into(), Direction::Inbound, test_handle())
            .err()
            .expect("second inbound call should be refused");
        assert_eq!(err.incoming, 1);
    }

    #[test]
    fn rejects_past_total_cap() {
        let mgr = SessionManager::new(tight_caps());
        assert!(mgr.try_register("A".into(), Direction::Inbound, test_handle()).is_ok());
        assert!(mgr.try_register("B".into(), Direction::Outbound, test_handle()).is_ok());
        assert!(mgr.try_register("C".into(), Direction::Outbound, test_handle()).is_err());
    }

    #[test]
    fn unregister_frees_directional_capacity() {
        let mgr = SessionManager::new(tight_caps());
        mgr.try_register("A".into(), Direction::Inbound, test_handle()).unwrap();
        mgr.unregister("A", Direction::Inbound);
        assert!(mgr.try_register("B".into(), Direction::Inbound, test_handle()).is_ok());
    }

    #[test]
    fn at_most_one_entry_per_call_id() {
        let mgr = SessionManager::new(CapsConfig {
            max_concurrent_calls: 10,
            ..tight_caps()
        });
        mgr.try_register("A".into(), Direction::Inbound, test_handle()).unwrap();
        assert_eq!(mgr.list_active().len(), 1);
        mgr.try_register("A".into(), Direction::Inbound, test_handle()).unwrap();
        assert_eq!(mgr.list_active().len(), 1);
    }
}
