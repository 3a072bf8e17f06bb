//! PostgreSQL implementation of the session ledger
//!
//! Status transitions are conditional UPDATEs keyed on the expected prior
//! state, which is what makes client writes and sweep jobs safe to race.
//! Subscriptions ride an in-process broadcast registry fed by whichever
//! node applied the write.

use crate::domain::call::ledger::SessionLedger;
use crate::domain::call::request::{CallRequest, RequestStatus};
use crate::domain::call::session::{CallSession, SessionCredentials, SessionStatus};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{
    CallType, Currency, ExpertId, RequestId, SessionId, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(FromRow)]
struct RequestRow {
    id: Uuid,
    session_id: Uuid,
    caller_id: Uuid,
    callee_id: Uuid,
    call_type: String,
    requested_duration_minutes: i32,
    status: String,
    created_at: DateTime<Utc>,
    responded_at: Option<DateTime<Utc>>,
}

impl From<RequestRow> for CallRequest {
    fn from(r: RequestRow) -> Self {
        CallRequest {
            id: RequestId::from_uuid(r.id),
            session_id: SessionId::from_uuid(r.session_id),
            caller_id: UserId::from_uuid(r.caller_id),
            callee_id: ExpertId::from_uuid(r.callee_id),
            call_type: CallType::from_str(&r.call_type).unwrap_or(CallType::Audio),
            requested_duration_minutes: r.requested_duration_minutes.max(0) as u32,
            status: RequestStatus::from_str(&r.status).unwrap_or(RequestStatus::Expired),
            created_at: r.created_at,
            responded_at: r.responded_at,
        }
    }
}

#[derive(FromRow)]
struct SessionRow {
    id: Uuid,
    channel_name: String,
    transport_token: String,
    transport_participant_id: String,
    caller_id: Uuid,
    callee_id: Uuid,
    call_type: String,
    estimated_cost: f64,
    currency: String,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    actual_duration_seconds: i64,
    status: String,
    created_at: DateTime<Utc>,
}

impl From<SessionRow> for CallSession {
    fn from(r: SessionRow) -> Self {
        CallSession {
            id: SessionId::from_uuid(r.id),
            credentials: SessionCredentials {
                channel_name: r.channel_name,
                transport_token: r.transport_token,
                transport_participant_id: r.transport_participant_id,
            },
            caller_id: UserId::from_uuid(r.caller_id),
            callee_id: ExpertId::from_uuid(r.callee_id),
            call_type: CallType::from_str(&r.call_type).unwrap_or(CallType::Audio),
            estimated_cost: r.estimated_cost,
            currency: Currency::from_code(&r.currency),
            started_at: r.started_at,
            ended_at: r.ended_at,
            actual_duration_seconds: r.actual_duration_seconds.max(0) as u64,
            status: SessionStatus::from_str(&r.status).unwrap_or(SessionStatus::Abandoned),
            created_at: r.created_at,
        }
    }
}

fn db_error(e: sqlx::Error) -> DomainError {
    error!("ledger database error: {}", e);
    DomainError::LedgerUnavailable(e.to_string())
}

pub struct PgSessionLedger {
    pool: PgPool,
    channels: Mutex<HashMap<RequestId, broadcast::Sender<CallRequest>>>,
}

impl PgSessionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn publish(&self, request: &CallRequest) {
        let channels = self.channels.lock().unwrap();
        if let Some(tx) = channels.get(&request.id) {
            let _ = tx.send(request.clone());
        }
    }

    async fn fetch_request(&self, id: RequestId) -> Result<Option<CallRequest>> {
        let row = sqlx::query_as::<_, RequestRow>("SELECT * FROM call_requests WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(row.map(CallRequest::from))
    }

    async fn fetch_session(&self, id: SessionId) -> Result<Option<CallSession>> {
        let row = sqlx::query_as::<_, SessionRow>("SELECT * FROM call_sessions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(row.map(CallSession::from))
    }
}

#[async_trait]
impl SessionLedger for PgSessionLedger {
    async fn create_session(&self, session: CallSession) -> Result<CallSession> {
        sqlx::query(
            r#"
            INSERT INTO call_sessions (
                id, channel_name, transport_token, transport_participant_id,
                caller_id, callee_id, call_type, estimated_cost, currency,
                started_at, ended_at, actual_duration_seconds, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(&session.credentials.channel_name)
        .bind(&session.credentials.transport_token)
        .bind(&session.credentials.transport_participant_id)
        .bind(session.caller_id.as_uuid())
        .bind(session.callee_id.as_uuid())
        .bind(session.call_type.as_str())
        .bind(session.estimated_cost)
        .bind(session.currency.code())
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.actual_duration_seconds as i64)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        self.fetch_session(session.id)
            .await?
            .ok_or_else(|| DomainError::LedgerUnavailable("session insert lost".to_string()))
    }

    async fn create_request(&self, request: CallRequest) -> Result<CallRequest> {
        sqlx::query(
            r#"
            INSERT INTO call_requests (
                id, session_id, caller_id, callee_id, call_type,
                requested_duration_minutes, status, created_at, responded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(request.id.as_uuid())
        .bind(request.session_id.as_uuid())
        .bind(request.caller_id.as_uuid())
        .bind(request.callee_id.as_uuid())
        .bind(request.call_type.as_str())
        .bind(request.requested_duration_minutes as i32)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .bind(request.responded_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        self.fetch_request(request.id)
            .await?
            .ok_or_else(|| DomainError::LedgerUnavailable("request insert lost".to_string()))
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<CallRequest>> {
        self.fetch_request(id).await
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<CallSession>> {
        self.fetch_session(id).await
    }

    async fn update_request_status(
        &self,
        id: RequestId,
        status: RequestStatus,
    ) -> Result<CallRequest> {
        let responded_at = matches!(
            status,
            RequestStatus::Accepted | RequestStatus::Declined
        )
        .then(Utc::now);

        let updated = sqlx::query_as::<_, RequestRow>(
            r#"
            UPDATE call_requests
            SET status = $2, responded_at = $3
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(responded_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let request = match updated {
            Some(row) => CallRequest::from(row),
            None => {
                // Compare-and-set lost: either a replay of the stored
                // terminal value (fine) or a conflicting one (rejected)
                let current = self
                    .fetch_request(id)
                    .await?
                    .ok_or_else(|| DomainError::NotFound(format!("call request {}", id)))?;
                if current.status != status {
                    return Err(DomainError::InvalidTransition(format!(
                        "call request {} already {}",
                        id,
                        current.status.as_str()
                    )));
                }
                debug!(request_id = %id, status = status.as_str(), "status replay, re-broadcasting");
                current
            }
        };

        self.publish(&request);
        Ok(request)
    }

    async fn activate_session(&self, id: SessionId) -> Result<CallSession> {
        let updated = sqlx::query_as::<_, SessionRow>(
            r#"
            UPDATE call_sessions
            SET status = 'active', started_at = $2
            WHERE id = $1 AND status = 'created'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match updated {
            Some(row) => Ok(CallSession::from(row)),
            None => {
                let current = self
                    .fetch_session(id)
                    .await?
                    .ok_or_else(|| DomainError::NotFound(format!("call session {}", id)))?;
                // First-join-wins: a second join replays as a no-op
                if current.status == SessionStatus::Active {
                    Ok(current)
                } else {
                    Err(DomainError::InvalidTransition(format!(
                        "session {} cannot activate from {}",
                        id,
                        current.status.as_str()
                    )))
                }
            }
        }
    }

    async fn close_session(&self, id: SessionId, duration_seconds: u64) -> Result<CallSession> {
        let updated = sqlx::query_as::<_, SessionRow>(
            r#"
            UPDATE call_sessions
            SET status = 'ended', ended_at = $2, actual_duration_seconds = $3
            WHERE id = $1 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(Utc::now())
        .bind(duration_seconds as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match updated {
            Some(row) => Ok(CallSession::from(row)),
            None => {
                let current = self
                    .fetch_session(id)
                    .await?
                    .ok_or_else(|| DomainError::NotFound(format!("call session {}", id)))?;
                if current.status == SessionStatus::Ended {
                    Ok(current)
                } else {
                    Err(DomainError::InvalidTransition(format!(
                        "session {} cannot close from {}",
                        id,
                        current.status.as_str()
                    )))
                }
            }
        }
    }

    async fn abandon_session(&self, id: SessionId) -> Result<CallSession> {
        let updated = sqlx::query_as::<_, SessionRow>(
            r#"
            UPDATE call_sessions
            SET status = 'abandoned', ended_at = $2
            WHERE id = $1 AND status IN ('created', 'active')
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match updated {
            Some(row) => Ok(CallSession::from(row)),
            None => {
                let current = self
                    .fetch_session(id)
                    .await?
                    .ok_or_else(|| DomainError::NotFound(format!("call session {}", id)))?;
                if current.status == SessionStatus::Abandoned {
                    Ok(current)
                } else {
                    Err(DomainError::InvalidTransition(format!(
                        "session {} already {}",
                        id,
                        current.status.as_str()
                    )))
                }
            }
        }
    }

    async fn subscribe(&self, id: RequestId) -> Result<broadcast::Receiver<CallRequest>> {
        if self.fetch_request(id).await?.is_none() {
            return Err(DomainError::NotFound(format!("call request {}", id)));
        }

        let mut channels = self.channels.lock().unwrap();
        let tx = channels
            .entry(id)
            .or_insert_with(|| broadcast::channel(32).0);
        Ok(tx.subscribe())
    }

    async fn expire_stale_requests(&self, ringing_window: chrono::Duration) -> Result<usize> {
        let threshold = Utc::now() - ringing_window;

        let expired = sqlx::query_as::<_, RequestRow>(
            r#"
            UPDATE call_requests
            SET status = 'expired'
            WHERE status = 'pending' AND created_at < $1
            RETURNING *
            "#,
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let count = expired.len();
        for row in expired {
            let request = CallRequest::from(row);
            debug!(request_id = %request.id, "expiry sweep expired request");
            self.publish(&request);
        }
        Ok(count)
    }

    async fn count_pending_requests(&self) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM call_requests WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(count.max(0) as usize)
    }
}
