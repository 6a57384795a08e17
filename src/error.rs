//! Error types for the swap relayer

use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    StoreBackend(String),

    #[error("Invalid swap key: {0}")]
    InvalidKey(String),

    #[error("Invalid swap: {0}")]
    InvalidSwap(String),

    #[error("Record {key} not found")]
    NotFound { key: String },

    #[error("Record {key} already exists")]
    DuplicateKey { key: String },

    #[error("{0}")]
    GuardViolation(String),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: String, message: String },

    #[error("Signer error for chain {chain_id}: {message}")]
    Signer { chain_id: String, message: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Transaction {tx_hash} not found on chain {chain_id}")]
    TransactionNotFound { chain_id: String, tx_hash: String },

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is transient and may be retried locally
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::ChainConnection { .. }
                | RelayerError::Signer { .. }
                | RelayerError::Transaction(_)
                | RelayerError::TransactionNotFound { .. }
        )
    }

    /// Persistence failures must never be read as "record absent"
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            RelayerError::StoreUnavailable(_) | RelayerError::StoreBackend(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RelayerError::NotFound { .. })
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, RelayerError::DuplicateKey { .. })
    }

    /// Guard failure naming the status that blocked the operation
    pub fn guard(message: impl Into<String>) -> Self {
        RelayerError::GuardViolation(message.into())
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let err = RelayerError::ChainConnection {
            chain_id: "1".to_string(),
            message: "connection reset".to_string(),
        };
        assert!(err.is_retryable());

        let err = RelayerError::guard("swap status is NotSwapped");
        assert!(!err.is_retryable());

        let err = RelayerError::StoreBackend("pool timed out".to_string());
        assert!(err.is_store_unavailable());
        assert!(!err.is_not_found());
    }
}
