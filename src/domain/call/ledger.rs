//! Session ledger port - single source of truth for call status transitions
//!
//! Defined in the domain layer as a trait (port) and implemented in the
//! infrastructure layer (in-memory and PostgreSQL adapters).

use crate::domain::call::request::{CallRequest, RequestStatus};
use crate::domain::call::session::CallSession;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{RequestId, SessionId};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Durable record of call requests and call sessions.
///
/// All writes are idempotent keyed by request/session id: replaying an
/// already-applied status update is a no-op, not an error. Status changes
/// are compare-and-set on the expected prior state, so client-driven writes
/// and server-side sweeps are safe to run concurrently.
#[async_trait]
pub trait SessionLedger: Send + Sync {
    /// Persist a freshly minted session. Idempotent by session id.
    async fn create_session(&self, session: CallSession) -> Result<CallSession>;

    /// Persist a call request referencing an existing session.
    /// Idempotent by request id.
    async fn create_request(&self, request: CallRequest) -> Result<CallRequest>;

    async fn get_request(&self, id: RequestId) -> Result<Option<CallRequest>>;

    async fn get_session(&self, id: SessionId) -> Result<Option<CallSession>>;

    /// Compare-and-set status update. Fails with `InvalidTransition` if the
    /// stored status is already a different terminal value; replaying the
    /// stored status succeeds without changing anything (the event is
    /// re-delivered, subscribers de-duplicate).
    async fn update_request_status(
        &self,
        id: RequestId,
        status: RequestStatus,
    ) -> Result<CallRequest>;

    /// Mark the session active on first join. Subsequent calls replay as
    /// no-ops; terminal sessions reject the transition.
    async fn activate_session(&self, id: SessionId) -> Result<CallSession>;

    /// Close an active session with its measured billable duration.
    async fn close_session(&self, id: SessionId, duration_seconds: u64) -> Result<CallSession>;

    /// Tear down a session that never completed.
    async fn abandon_session(&self, id: SessionId) -> Result<CallSession>;

    /// Server-push stream of request snapshots, at-least-once delivery.
    /// Consumers must de-duplicate by `(id, status)`.
    async fn subscribe(&self, id: RequestId) -> Result<broadcast::Receiver<CallRequest>>;

    /// Sweep support: expire every pending request older than the ringing
    /// window. Returns how many requests were expired. Safe to run
    /// concurrently with accept/decline - the compare-and-set loses cleanly.
    async fn expire_stale_requests(&self, ringing_window: chrono::Duration) -> Result<usize>;

    /// Number of requests still waiting for a response (metrics)
    async fn count_pending_requests(&self) -> Result<usize>;
}
