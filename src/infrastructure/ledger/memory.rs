//! In-memory session ledger
//!
//! Process-local adapter used by tests and single-node deployments (the
//! `memory` feature). Status subscriptions ride a per-request broadcast
//! channel; delivery is at-least-once and replays re-broadcast, so
//! consumers de-duplicate by `(id, status)` exactly as against the
//! durable adapter.

use crate::domain::call::ledger::SessionLedger;
use crate::domain::call::request::{CallRequest, RequestStatus};
use crate::domain::call::session::CallSession;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{RequestId, SessionId};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

pub struct InMemorySessionLedger {
    requests: Mutex<HashMap<RequestId, CallRequest>>,
    sessions: Mutex<HashMap<SessionId, CallSession>>,
    channels: Mutex<HashMap<RequestId, broadcast::Sender<CallRequest>>>,
    unavailable: AtomicBool,
}

impl InMemorySessionLedger {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate a persistence outage (tests)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DomainError::LedgerUnavailable(
                "in-memory ledger marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn publish(&self, request: &CallRequest) {
        let channels = self.channels.lock().unwrap();
        if let Some(tx) = channels.get(&request.id) {
            // No subscribers is fine
            let _ = tx.send(request.clone());
        }
    }
}

impl Default for InMemorySessionLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionLedger for InMemorySessionLedger {
    async fn create_session(&self, session: CallSession) -> Result<CallSession> {
        self.check_available()?;
        let mut sessions = self.sessions.lock().unwrap();
        // Idempotent by id: a replayed create returns the stored row
        if let Some(existing) = sessions.get(&session.id) {
            return Ok(existing.clone());
        }
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn create_request(&self, request: CallRequest) -> Result<CallRequest> {
        self.check_available()?;
        {
            let sessions = self.sessions.lock().unwrap();
            if !sessions.contains_key(&request.session_id) {
                return Err(DomainError::NotFound(format!(
                    "session {} for new request",
                    request.session_id
                )));
            }
        }

        let mut requests = self.requests.lock().unwrap();
        if let Some(existing) = requests.get(&request.id) {
            return Ok(existing.clone());
        }
        requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<CallRequest>> {
        self.check_available()?;
        Ok(self.requests.lock().unwrap().get(&id).cloned())
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<CallSession>> {
        self.check_available()?;
        Ok(self.sessions.lock().unwrap().get(&id).cloned())
    }

    async fn update_request_status(
        &self,
        id: RequestId,
        status: RequestStatus,
    ) -> Result<CallRequest> {
        self.check_available()?;
        let updated = {
            let mut requests = self.requests.lock().unwrap();
            let request = requests
                .get_mut(&id)
                .ok_or_else(|| DomainError::NotFound(format!("call request {}", id)))?;

            let applied = request.transition_to(status)?;
            if !applied {
                debug!(request_id = %id, status = status.as_str(), "status replay, re-broadcasting");
            }
            request.clone()
        };

        // At-least-once: replays re-broadcast too
        self.publish(&updated);
        Ok(updated)
    }

    async fn activate_session(&self, id: SessionId) -> Result<CallSession> {
        self.check_available()?;
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| DomainError::NotFound(format!("call session {}", id)))?;
        session.activate()?;
        Ok(session.clone())
    }

    async fn close_session(&self, id: SessionId, duration_seconds: u64) -> Result<CallSession> {
        self.check_available()?;
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| DomainError::NotFound(format!("call session {}", id)))?;
        session.close(duration_seconds)?;
        Ok(session.clone())
    }

    async fn abandon_session(&self, id: SessionId) -> Result<CallSession> {
        self.check_available()?;
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| DomainError::NotFound(format!("call session {}", id)))?;
        session.abandon()?;
        Ok(session.clone())
    }

    async fn subscribe(&self, id: RequestId) -> Result<broadcast::Receiver<CallRequest>> {
        self.check_available()?;
        {
            let requests = self.requests.lock().unwrap();
            if !requests.contains_key(&id) {
                return Err(DomainError::NotFound(format!("call request {}", id)));
            }
        }

        let mut channels = self.channels.lock().unwrap();
        let tx = channels
            .entry(id)
            .or_insert_with(|| broadcast::channel(32).0);
        Ok(tx.subscribe())
    }

    async fn expire_stale_requests(&self, ringing_window: chrono::Duration) -> Result<usize> {
        self.check_available()?;
        let now = Utc::now();

        let expired: Vec<CallRequest> = {
            let mut requests = self.requests.lock().unwrap();
            requests
                .values_mut()
                .filter(|request| request.is_stale(ringing_window, now))
                .filter_map(|request| {
                    request
                        .transition_to(RequestStatus::Expired)
                        .ok()
                        .filter(|applied| *applied)
                        .map(|_| request.clone())
                })
                .collect()
        };

        for request in &expired {
            debug!(request_id = %request.id, "expiry sweep expired request");
            self.publish(request);
        }
        Ok(expired.len())
    }

    async fn count_pending_requests(&self) -> Result<usize> {
        self.check_available()?;
        let requests = self.requests.lock().unwrap();
        Ok(requests
            .values()
            .filter(|request| request.status == RequestStatus::Pending)
            .count())
    }
}
