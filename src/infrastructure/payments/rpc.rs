//! JSON-RPC client for the wallet collaborator

use crate::domain::payment::{PaymentGateway, PaymentReference, RefundOutcome};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{Currency, UserId};
use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct DebitReply {
    transaction_id: String,
}

#[derive(Debug, Deserialize)]
struct RefundReply {
    status: String,
}

/// Wallet service client. The wallet owns the money; this subsystem only
/// issues debit/refund commands and reads back confirmation.
pub struct RpcPaymentGateway {
    client: HttpClient,
}

impl RpcPaymentGateway {
    pub fn new(url: &str) -> Result<Self> {
        let client = HttpClientBuilder::default()
            .build(url)
            .map_err(|e| DomainError::Internal(format!("wallet client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PaymentGateway for RpcPaymentGateway {
    async fn debit(&self, user_id: UserId, amount: f64, currency: &Currency) -> Result<()> {
        let reply: DebitReply = self
            .client
            .request(
                "wallet_debit",
                rpc_params![user_id.as_uuid(), amount, currency.code()],
            )
            .await
            .map_err(|e| DomainError::SettlementFailed(e.to_string()))?;

        debug!(%user_id, transaction_id = %reply.transaction_id, "wallet debit accepted");
        Ok(())
    }

    async fn refund(
        &self,
        reference: PaymentReference,
        user_id: UserId,
        amount: f64,
        currency: &Currency,
    ) -> Result<RefundOutcome> {
        let reply: RefundReply = self
            .client
            .request(
                "wallet_refund",
                rpc_params![reference, user_id.as_uuid(), amount, currency.code()],
            )
            .await
            .map_err(|e| DomainError::RefundFailed(e.to_string()))?;

        Ok(match reply.status.as_str() {
            "confirmed" => RefundOutcome::Confirmed,
            _ => RefundOutcome::Failed,
        })
    }
}
