//! Background settlement queue
//!
//! Debits and refunds are fire-and-forget from the caller's point of view:
//! call teardown and no-show cancellation never block on the payment
//! collaborator. Failed jobs are retried here with bounded attempts; a
//! job that exhausts its attempts is logged and dropped, never allowed to
//! wedge the queue.

use crate::domain::appointment::AppointmentRepository;
use crate::domain::notification::{NotificationKind, Notifier};
use crate::domain::payment::{PaymentGateway, PaymentReference, RefundOutcome};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AppointmentId, Currency, SessionId, UserId};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// A unit of work for the payment collaborator
#[derive(Debug, Clone)]
pub enum SettlementJob {
    /// Charge the caller for a completed call session
    Debit {
        user_id: UserId,
        session_id: SessionId,
        amount: f64,
        currency: Currency,
    },
    /// Return the full session cost after an expert no-show
    Refund {
        appointment_id: AppointmentId,
        user_id: UserId,
        amount: f64,
        currency: Currency,
    },
}

/// Retry policy for the settlement worker
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_secs(5),
        }
    }
}

/// Cloneable handle used by the coordinator and the no-show monitor
#[derive(Clone)]
pub struct SettlementQueue {
    tx: mpsc::UnboundedSender<SettlementJob>,
}

impl SettlementQueue {
    pub fn enqueue(&self, job: SettlementJob) {
        if self.tx.send(job).is_err() {
            // Worker gone during shutdown; nothing to do but record it
            error!("settlement worker is gone, dropping job");
        }
    }
}

/// Owns the receiving end of the queue and the collaborator handles
pub struct SettlementWorker {
    rx: mpsc::UnboundedReceiver<SettlementJob>,
    payments: Arc<dyn PaymentGateway>,
    appointments: Arc<dyn AppointmentRepository>,
    notifier: Arc<dyn Notifier>,
    config: SettlementConfig,
}

/// Build the queue/worker pair. Spawn `worker.run()` once at startup.
pub fn settlement_channel(
    payments: Arc<dyn PaymentGateway>,
    appointments: Arc<dyn AppointmentRepository>,
    notifier: Arc<dyn Notifier>,
    config: SettlementConfig,
) -> (SettlementQueue, SettlementWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        SettlementQueue { tx },
        SettlementWorker {
            rx,
            payments,
            appointments,
            notifier,
            config,
        },
    )
}

impl SettlementWorker {
    pub async fn run(mut self) {
        info!("settlement worker started");
        while let Some(job) = self.rx.recv().await {
            self.process(job).await;
        }
        info!("settlement worker stopped");
    }

    async fn process(&self, job: SettlementJob) {
        for attempt in 1..=self.config.max_attempts {
            match self.execute(&job).await {
                Ok(()) => {
                    metrics::counter!("settlement_jobs_completed").increment(1);
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "settlement attempt failed");
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    }
                }
            }
        }

        metrics::counter!("settlement_jobs_exhausted").increment(1);
        error!(?job, "settlement job exhausted its retry attempts");
    }

    async fn execute(&self, job: &SettlementJob) -> Result<()> {
        match job {
            SettlementJob::Debit {
                user_id,
                session_id,
                amount,
                currency,
            } => {
                self.payments
                    .debit(*user_id, *amount, currency)
                    .await
                    .map_err(|e| DomainError::SettlementFailed(e.to_string()))?;
                info!(%session_id, %user_id, amount, "call cost settled");
                Ok(())
            }
            SettlementJob::Refund {
                appointment_id,
                user_id,
                amount,
                currency,
            } => {
                let outcome = self
                    .payments
                    .refund(
                        PaymentReference::Appointment(*appointment_id),
                        *user_id,
                        *amount,
                        currency,
                    )
                    .await
                    .map_err(|e| DomainError::RefundFailed(e.to_string()))?;

                match outcome {
                    RefundOutcome::Confirmed => {
                        // Only a collaborator confirmation flips the flag
                        if let Err(e) = self.appointments.mark_refund_processed(*appointment_id).await
                        {
                            error!(%appointment_id, error = %e, "refund confirmed but flag write failed");
                        }
                        self.notifier
                            .notify(
                                user_id.as_uuid(),
                                NotificationKind::RefundIssued,
                                json!({
                                    "appointment_id": appointment_id,
                                    "amount": amount,
                                    "currency": currency.code(),
                                }),
                            )
                            .await;
                        info!(%appointment_id, amount, "no-show refund confirmed");
                        Ok(())
                    }
                    RefundOutcome::Failed => Err(DomainError::RefundFailed(format!(
                        "collaborator reported failure for appointment {}",
                        appointment_id
                    ))),
                }
            }
        }
    }
}
