//! Payment collaborator port
//!
//! The wallet ledger is an external service. This subsystem only debits
//! call cost on teardown and refunds appointments on expert no-show; both
//! paths are fire-and-forget with background retry.

use crate::domain::shared::value_objects::{AppointmentId, Currency, SessionId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What a settlement refers to on the collaborator side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum PaymentReference {
    Session(SessionId),
    Appointment(AppointmentId),
}

/// Collaborator's answer to a refund request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundOutcome {
    Confirmed,
    Failed,
}

/// Wallet operations consumed from the payment collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Debit a user's wallet for a completed call session.
    async fn debit(
        &self,
        user_id: UserId,
        amount: f64,
        currency: &Currency,
    ) -> crate::domain::shared::result::Result<()>;

    /// Refund a session or appointment cost back to the user's wallet.
    async fn refund(
        &self,
        reference: PaymentReference,
        user_id: UserId,
        amount: f64,
        currency: &Currency,
    ) -> crate::domain::shared::result::Result<RefundOutcome>;
}
