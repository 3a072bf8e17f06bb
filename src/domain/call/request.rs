//! Call request - one party's proposal for a call, awaiting accept/decline

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallType, ExpertId, RequestId, SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Call request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Waiting for the callee to respond
    Pending,
    /// Callee accepted the call
    Accepted,
    /// Callee declined the call
    Declined,
    /// No response within the ringing window
    Expired,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Declined => "declined",
            RequestStatus::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "accepted" => Some(RequestStatus::Accepted),
            "declined" => Some(RequestStatus::Declined),
            "expired" => Some(RequestStatus::Expired),
            _ => None,
        }
    }

    /// Terminal statuses are immutable; a request is resolved exactly once.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    /// Check if a status transition is valid
    pub fn can_transition_to(&self, new_status: &RequestStatus) -> bool {
        use RequestStatus::*;

        matches!(
            (self, new_status),
            (Pending, Accepted) | (Pending, Declined) | (Pending, Expired)
        )
    }
}

/// A user's proposal for a call with an expert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    pub id: RequestId,
    /// Session minted alongside this request; joined only on acceptance
    pub session_id: SessionId,
    pub caller_id: UserId,
    pub callee_id: ExpertId,
    pub call_type: CallType,
    pub requested_duration_minutes: u32,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl CallRequest {
    pub fn new(
        session_id: SessionId,
        caller_id: UserId,
        callee_id: ExpertId,
        call_type: CallType,
        requested_duration_minutes: u32,
    ) -> Self {
        Self {
            id: RequestId::new(),
            session_id,
            caller_id,
            callee_id,
            call_type,
            requested_duration_minutes,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            responded_at: None,
        }
    }

    /// Apply a status transition, enforcing the resolved-exactly-once rule.
    ///
    /// Replaying the status the request already carries is accepted as a
    /// no-op; moving away from a terminal status is rejected.
    pub fn transition_to(&mut self, new_status: RequestStatus) -> Result<bool> {
        if self.status == new_status {
            return Ok(false);
        }

        if !self.status.can_transition_to(&new_status) {
            return Err(DomainError::InvalidTransition(format!(
                "call request {} cannot move from {} to {}",
                self.id,
                self.status.as_str(),
                new_status.as_str()
            )));
        }

        self.status = new_status;
        if matches!(new_status, RequestStatus::Accepted | RequestStatus::Declined) {
            self.responded_at = Some(Utc::now());
        }
        Ok(true)
    }

    /// Whether the ringing window has elapsed for a still-pending request
    pub fn is_stale(&self, ringing_window: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.status == RequestStatus::Pending && now - self.created_at > ringing_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_request() -> CallRequest {
        CallRequest::new(
            SessionId::new(),
            UserId::new(),
            ExpertId::new(),
            CallType::Audio,
            30,
        )
    }

    #[test]
    fn test_accept_once() {
        let mut request = pending_request();
        assert!(request.transition_to(RequestStatus::Accepted).unwrap());
        assert_eq!(request.status, RequestStatus::Accepted);
        assert!(request.responded_at.is_some());
    }

    #[test]
    fn test_terminal_replay_is_noop() {
        let mut request = pending_request();
        request.transition_to(RequestStatus::Declined).unwrap();

        let applied = request.transition_to(RequestStatus::Declined).unwrap();
        assert!(!applied);
        assert_eq!(request.status, RequestStatus::Declined);
    }

    #[test]
    fn test_conflicting_terminal_is_rejected() {
        let mut request = pending_request();
        request.transition_to(RequestStatus::Accepted).unwrap();

        let result = request.transition_to(RequestStatus::Declined);
        assert!(matches!(result, Err(DomainError::InvalidTransition(_))));
        assert_eq!(request.status, RequestStatus::Accepted);
    }

    #[test]
    fn test_expired_does_not_set_responded_at() {
        let mut request = pending_request();
        request.transition_to(RequestStatus::Expired).unwrap();
        assert!(request.responded_at.is_none());
    }

    #[test]
    fn test_staleness_window() {
        let request = pending_request();
        let now = request.created_at;

        assert!(!request.is_stale(chrono::Duration::seconds(30), now));
        assert!(request.is_stale(
            chrono::Duration::seconds(30),
            now + chrono::Duration::seconds(31)
        ));
    }
}
