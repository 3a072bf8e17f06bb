//! Notification collaborator port - fire-and-forget delivery

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    IncomingCall,
    CallAccepted,
    CallDeclined,
    CallEnded,
    AppointmentCancelled,
    RefundIssued,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::IncomingCall => "incoming_call",
            NotificationKind::CallAccepted => "call_accepted",
            NotificationKind::CallDeclined => "call_declined",
            NotificationKind::CallEnded => "call_ended",
            NotificationKind::AppointmentCancelled => "appointment_cancelled",
            NotificationKind::RefundIssued => "refund_issued",
        }
    }
}

/// Fire-and-forget notification delivery. Implementations log failures;
/// callers never block on the outcome.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: Uuid, kind: NotificationKind, payload: serde_json::Value);
}
