//! Call session - the transport-level call once a request is accepted

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallType, Currency, ExpertId, SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Call session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Credentials minted, nobody has joined yet
    Created,
    /// At least one participant joined the transport
    Active,
    /// Closed normally with a billable duration
    Ended,
    /// Torn down without completing (join failure, caller gave up)
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(SessionStatus::Created),
            "active" => Some(SessionStatus::Active),
            "ended" => Some(SessionStatus::Ended),
            "abandoned" => Some(SessionStatus::Abandoned),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::Abandoned)
    }
}

/// Opaque transport credentials, minted once at session creation and never
/// reissued. A new call attempt gets a new session with fresh credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredentials {
    pub channel_name: String,
    pub transport_token: String,
    pub transport_participant_id: String,
}

/// The underlying transport-level call, with lifecycle independent of the
/// request that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    pub id: SessionId,
    pub credentials: SessionCredentials,
    pub caller_id: UserId,
    pub callee_id: ExpertId,
    pub call_type: CallType,
    pub estimated_cost: f64,
    pub currency: Currency,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub actual_duration_seconds: u64,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new(
        id: SessionId,
        credentials: SessionCredentials,
        caller_id: UserId,
        callee_id: ExpertId,
        call_type: CallType,
        estimated_cost: f64,
        currency: Currency,
    ) -> Self {
        Self {
            id,
            credentials,
            caller_id,
            callee_id,
            call_type,
            estimated_cost,
            currency,
            started_at: None,
            ended_at: None,
            actual_duration_seconds: 0,
            status: SessionStatus::Created,
            created_at: Utc::now(),
        }
    }

    /// First successful join activates the session; re-joins by the same
    /// participant replay as no-ops.
    pub fn activate(&mut self) -> Result<bool> {
        match self.status {
            SessionStatus::Created => {
                self.status = SessionStatus::Active;
                self.started_at = Some(Utc::now());
                Ok(true)
            }
            SessionStatus::Active => Ok(false),
            terminal => Err(DomainError::InvalidTransition(format!(
                "session {} cannot activate from {}",
                self.id,
                terminal.as_str()
            ))),
        }
    }

    /// Close an active session with its measured duration.
    pub fn close(&mut self, duration_seconds: u64) -> Result<bool> {
        match self.status {
            SessionStatus::Active => {
                self.status = SessionStatus::Ended;
                self.ended_at = Some(Utc::now());
                self.actual_duration_seconds = duration_seconds;
                Ok(true)
            }
            SessionStatus::Ended => Ok(false),
            other => Err(DomainError::InvalidTransition(format!(
                "session {} cannot close from {}",
                self.id,
                other.as_str()
            ))),
        }
    }

    /// Tear down a session that never completed. Compensating action: a
    /// session is never left `active` with no participants.
    pub fn abandon(&mut self) -> Result<bool> {
        match self.status {
            SessionStatus::Created | SessionStatus::Active => {
                self.status = SessionStatus::Abandoned;
                self.ended_at = Some(Utc::now());
                Ok(true)
            }
            SessionStatus::Abandoned => Ok(false),
            SessionStatus::Ended => Err(DomainError::InvalidTransition(format!(
                "session {} already ended",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created_session() -> CallSession {
        CallSession::new(
            SessionId::new(),
            SessionCredentials {
                channel_name: "wellness-abc123".to_string(),
                transport_token: "tok".to_string(),
                transport_participant_id: "p-1".to_string(),
            },
            UserId::new(),
            ExpertId::new(),
            CallType::Video,
            12.5,
            Currency::USD,
        )
    }

    #[test]
    fn test_activate_only_once() {
        let mut session = created_session();

        assert!(session.activate().unwrap());
        let first_started_at = session.started_at;

        // Re-join by the same participant does not re-trigger the transition
        assert!(!session.activate().unwrap());
        assert_eq!(session.started_at, first_started_at);
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[test]
    fn test_close_records_duration() {
        let mut session = created_session();
        session.activate().unwrap();

        assert!(session.close(754).unwrap());
        assert_eq!(session.status, SessionStatus::Ended);
        assert_eq!(session.actual_duration_seconds, 754);
        assert!(session.ended_at.is_some());
    }

    #[test]
    fn test_cannot_close_before_active() {
        let mut session = created_session();
        assert!(session.close(10).is_err());
    }

    #[test]
    fn test_abandon_from_created_and_active() {
        let mut session = created_session();
        assert!(session.abandon().unwrap());
        assert_eq!(session.status, SessionStatus::Abandoned);

        let mut session = created_session();
        session.activate().unwrap();
        assert!(session.abandon().unwrap());
        assert_eq!(session.status, SessionStatus::Abandoned);
    }

    #[test]
    fn test_cannot_activate_after_terminal() {
        let mut session = created_session();
        session.abandon().unwrap();
        assert!(session.activate().is_err());
    }
}
