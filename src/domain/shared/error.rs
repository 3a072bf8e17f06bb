//! Domain errors

use thiserror::Error;

/// Domain result type
pub type Result<T> = std::result::Result<T, DomainError>;

#[derive(Error, Debug, Clone)]
pub enum DomainError {
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Transport join failed: {0}")]
    TransportJoinFailed(String),

    #[error("Settlement failed: {0}")]
    SettlementFailed(String),

    #[error("Refund failed: {0}")]
    RefundFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Non-fatal failures are handed to the background retry queue
    /// instead of aborting the calling flow.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DomainError::SettlementFailed(_) | DomainError::RefundFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DomainError::SettlementFailed("timeout".to_string()).is_retryable());
        assert!(DomainError::RefundFailed("gateway".to_string()).is_retryable());
        assert!(!DomainError::AuthRequired("no identity".to_string()).is_retryable());
        assert!(!DomainError::InvalidTransition("terminal".to_string()).is_retryable());
    }
}
