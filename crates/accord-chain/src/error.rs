//! Error types for ledger operations.

use std::time::Duration;

use alloy_primitives::{B256, U256};
use thiserror::Error;

use crate::preflight::FeeBreakdown;

/// Errors that can occur while talking to the consent contract.
#[derive(Error, Debug, Clone)]
pub enum ChainError {
    /// Call parameters were rejected before any transaction was built.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Preflight found the balance below fee plus estimated gas.
    #[error(
        "Insufficient balance: need {} wei, have {} wei (short by {shortfall} wei)",
        .breakdown.required_total,
        .breakdown.balance
    )]
    InsufficientBalance {
        /// Amount missing to cover the required total.
        shortfall: U256,
        /// Fee and gas numbers the decision was based on.
        breakdown: FeeBreakdown,
    },

    /// The transaction was mined but reverted.
    #[error(
        "Transaction {tx_hash} reverted: {}",
        .reason.as_deref().unwrap_or("no reason given")
    )]
    TransactionReverted {
        /// Hash of the reverted transaction.
        tx_hash: B256,
        /// Decoded `Error(string)` reason, when the contract supplied one.
        reason: Option<String>,
    },

    /// The receipt succeeded but the expected event could not be decoded.
    #[error("Event decoding failed for {tx_hash}: {reason}")]
    EventDecoding {
        /// Hash of the transaction whose logs were scanned.
        tx_hash: B256,
        /// What was wrong with the logs.
        reason: String,
    },

    /// RPC or network failure.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// No receipt arrived within the configured window.
    #[error("Timed out after {waited:?} waiting for receipt of {tx_hash}")]
    ReceiptTimeout {
        /// Hash of the broadcast transaction.
        tx_hash: B256,
        /// How long the client waited.
        waited: Duration,
    },

    /// The signing capability refused or failed.
    #[error("Signer error: {0}")]
    Signer(String),

    /// Malformed ABI data.
    #[error("ABI error: {0}")]
    Abi(String),

    /// Cryptographic error.
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] accord_crypto::CryptoError),
}

impl ChainError {
    /// Whether the caller may retry the operation as a new attempt.
    ///
    /// Only transport-level failures qualify. Reverts, validation and
    /// decoding failures are terminal for the attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::ReceiptTimeout { .. })
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ChainError::Rpc("connection reset".into()).is_retryable());
        assert!(ChainError::ReceiptTimeout {
            tx_hash: B256::ZERO,
            waited: Duration::from_secs(60),
        }
        .is_retryable());

        assert!(!ChainError::Validation("bad".into()).is_retryable());
        assert!(!ChainError::TransactionReverted {
            tx_hash: B256::ZERO,
            reason: None,
        }
        .is_retryable());
        assert!(!ChainError::EventDecoding {
            tx_hash: B256::ZERO,
            reason: "no logs".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_revert_display() {
        let err = ChainError::TransactionReverted {
            tx_hash: B256::ZERO,
            reason: Some("still locked".into()),
        };
        assert!(err.to_string().ends_with("reverted: still locked"));

        let err = ChainError::TransactionReverted {
            tx_hash: B256::ZERO,
            reason: None,
        };
        assert!(err.to_string().ends_with("no reason given"));
    }
}
