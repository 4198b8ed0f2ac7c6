//! Error types for high-level API operations.

use alloy_primitives::Address;
use thiserror::Error;

use crate::config::ConfigError;
use crate::consent::UnlockPhase;

/// Errors that can occur during high-level API operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Input rejected before any transaction was built.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The action is not allowed in the consent's current phase.
    #[error("Cannot {action} while the consent is {phase}")]
    InvalidTransition {
        /// Attempted action.
        action: &'static str,
        /// Phase the consent was in.
        phase: UnlockPhase,
    },

    /// The address that requested the unlock tried to approve it.
    #[error("The requesting address {0} cannot also approve the unlock")]
    SameParty(Address),

    /// The acting address is not one of the consent's parties.
    #[error("Address {0} is not a party to this consent")]
    NotAParty(Address),

    /// The consent only has a locally derived identifier.
    #[error("Consent {0} has an unverified on-chain id; reconcile it first")]
    Unverified(String),

    /// Another mutating operation on the same item is still running.
    #[error("Operation already in flight for {0}")]
    InFlight(String),

    /// Consent or request not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No end-to-end key could be established and degraded keys are disabled.
    #[error("Session key unavailable for consent {0}")]
    KeyUnavailable(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cryptographic error.
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] accord_crypto::CryptoError),

    /// Chain error.
    #[error("Chain error: {0}")]
    Chain(#[from] accord_chain::ChainError),

    /// Storage error.
    #[error("Storage error: {0}")]
    Store(#[from] accord_store::StoreError),
}

impl CoreError {
    /// Whether retrying the same call as a new attempt may succeed.
    ///
    /// True for network and receipt-timeout failures, and for calls turned
    /// away because another operation on the same item was running.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Chain(e) => e.is_retryable(),
            Self::InFlight(_) => true,
            _ => false,
        }
    }
}

impl From<sled::Error> for CoreError {
    fn from(e: sled::Error) -> Self {
        Self::Store(e.into())
    }
}

/// Result type for high-level API operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use accord_chain::{ChainError, B256};

    #[test]
    fn test_retryable() {
        assert!(CoreError::Chain(ChainError::Rpc("down".into())).is_retryable());
        assert!(CoreError::InFlight("consent".into()).is_retryable());

        assert!(!CoreError::Chain(ChainError::TransactionReverted {
            tx_hash: B256::ZERO,
            reason: None,
        })
        .is_retryable());
        assert!(!CoreError::Crypto(accord_crypto::CryptoError::AuthenticationFailed).is_retryable());
        assert!(!CoreError::SameParty(Address::ZERO).is_retryable());
    }

    #[test]
    fn test_transition_display() {
        let err = CoreError::InvalidTransition {
            action: "request unlock",
            phase: UnlockPhase::Locked,
        };
        assert_eq!(err.to_string(), "Cannot request unlock while the consent is locked");
    }
}
