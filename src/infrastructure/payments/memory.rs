//! In-memory wallet gateway for tests and `memory`-feature deployments

use crate::domain::payment::{PaymentGateway, PaymentReference, RefundOutcome};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{Currency, UserId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Recorded wallet operation
#[derive(Debug, Clone, PartialEq)]
pub enum WalletOp {
    Debit {
        user_id: UserId,
        amount: f64,
        currency: Currency,
    },
    Refund {
        reference: PaymentReference,
        user_id: UserId,
        amount: f64,
        currency: Currency,
    },
}

pub struct InMemoryPaymentGateway {
    operations: Mutex<Vec<WalletOp>>,
    refunds_fail: AtomicBool,
    debits_fail: AtomicBool,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self {
            operations: Mutex::new(Vec::new()),
            refunds_fail: AtomicBool::new(false),
            debits_fail: AtomicBool::new(false),
        }
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.refunds_fail.store(fail, Ordering::SeqCst);
    }

    pub fn fail_debits(&self, fail: bool) {
        self.debits_fail.store(fail, Ordering::SeqCst);
    }

    pub fn operations(&self) -> Vec<WalletOp> {
        self.operations.lock().unwrap().clone()
    }

    pub fn refund_count(&self) -> usize {
        self.operations
            .lock()
            .unwrap()
            .iter()
            .filter(|op| matches!(op, WalletOp::Refund { .. }))
            .count()
    }
}

impl Default for InMemoryPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn debit(&self, user_id: UserId, amount: f64, currency: &Currency) -> Result<()> {
        if self.debits_fail.load(Ordering::SeqCst) {
            return Err(DomainError::SettlementFailed(
                "wallet configured to reject debits".to_string(),
            ));
        }
        self.operations.lock().unwrap().push(WalletOp::Debit {
            user_id,
            amount,
            currency: currency.clone(),
        });
        Ok(())
    }

    async fn refund(
        &self,
        reference: PaymentReference,
        user_id: UserId,
        amount: f64,
        currency: &Currency,
    ) -> Result<RefundOutcome> {
        self.operations.lock().unwrap().push(WalletOp::Refund {
            reference,
            user_id,
            amount,
            currency: currency.clone(),
        });

        if self.refunds_fail.load(Ordering::SeqCst) {
            return Ok(RefundOutcome::Failed);
        }
        Ok(RefundOutcome::Confirmed)
    }
}
