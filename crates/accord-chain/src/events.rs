//! `ConsentCreated` event decoding.

use std::fmt;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::abi::{event_topic, read_address, CONSENT_CREATED_SIGNATURE};
use crate::types::{Log, TransactionReceipt};
use crate::{ChainError, Result};

/// Decoded `ConsentCreated(uint256 indexed, address indexed, address indexed)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentCreated {
    /// Identifier assigned by the contract.
    pub consent_id: U256,
    /// Creator of the consent.
    pub party1: Address,
    /// Counterparty.
    pub party2: Address,
}

impl ConsentCreated {
    /// Topic 0 of the event.
    pub fn topic() -> B256 {
        event_topic(CONSENT_CREATED_SIGNATURE)
    }

    /// Encode as a log emitted by `contract`.
    pub fn to_log(&self, contract: Address) -> Log {
        Log {
            address: contract,
            topics: vec![
                Self::topic(),
                B256::from(self.consent_id.to_be_bytes::<32>()),
                self.party1.into_word(),
                self.party2.into_word(),
            ],
            data: Vec::new(),
        }
    }

    /// Decode from a log. Returns `Ok(None)` for logs of other events.
    pub fn decode(log: &Log) -> Result<Option<Self>> {
        if log.topics.first() != Some(&Self::topic()) {
            return Ok(None);
        }
        if log.topics.len() != 4 {
            return Err(ChainError::Abi(format!(
                "ConsentCreated expects 4 topics, got {}",
                log.topics.len()
            )));
        }
        Ok(Some(Self {
            consent_id: U256::from_be_bytes(log.topics[1].0),
            party1: read_address(log.topics[2].as_slice())?,
            party2: read_address(log.topics[3].as_slice())?,
        }))
    }
}

/// Scan a receipt for the first well-formed `ConsentCreated` log emitted
/// by `contract`.
///
/// Malformed logs are skipped. The first decode error is returned only when
/// no log decodes.
pub fn find_consent_created(
    receipt: &TransactionReceipt,
    contract: Address,
) -> Result<Option<ConsentCreated>> {
    let mut first_error = None;
    for (index, log) in receipt.logs.iter().enumerate().filter(|(_, log)| log.address == contract) {
        match ConsentCreated::decode(log) {
            Ok(Some(event)) => return Ok(Some(event)),
            Ok(None) => {}
            Err(e) => {
                warn!(
                    anomaly = "consent_event_malformed",
                    tx_hash = %receipt.transaction_hash,
                    log_index = index,
                    error = %e,
                    "Skipping malformed ConsentCreated log"
                );
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

/// Derive a local stand-in identifier from a transaction hash.
///
/// Uses the first eight bytes of the hash. The result is never an on-chain
/// identifier and must not be submitted to the contract.
pub fn pseudo_consent_id(tx_hash: B256) -> U256 {
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&tx_hash[..8]);
    U256::from(u64::from_be_bytes(prefix))
}

/// Identifier of a consent as known locally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsentId {
    /// Decoded from the `ConsentCreated` event.
    Verified(U256),
    /// Derived from the transaction hash because the event was missing.
    Unverified {
        /// Locally derived stand-in value.
        pseudo_id: U256,
        /// Transaction the consent was created in.
        tx_hash: B256,
    },
}

impl ConsentId {
    /// Build the unverified form for `tx_hash`.
    pub fn unverified(tx_hash: B256) -> Self {
        Self::Unverified {
            pseudo_id: pseudo_consent_id(tx_hash),
            tx_hash,
        }
    }

    /// Numeric value, verified or not.
    pub fn value(&self) -> U256 {
        match self {
            Self::Verified(id) => *id,
            Self::Unverified { pseudo_id, .. } => *pseudo_id,
        }
    }

    /// On-chain identifier, if this one came from the event.
    pub fn verified(&self) -> Option<U256> {
        match self {
            Self::Verified(id) => Some(*id),
            Self::Unverified { .. } => None,
        }
    }

    /// Whether the identifier came from the event.
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }

    /// Stable string used as a storage key.
    ///
    /// Unverified ids are prefixed so they can never collide with a real one.
    pub fn key(&self) -> String {
        match self {
            Self::Verified(id) => id.to_string(),
            Self::Unverified { pseudo_id, .. } => format!("pseudo-{pseudo_id}"),
        }
    }
}

impl fmt::Display for ConsentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified(id) => write!(f, "{id}"),
            Self::Unverified { pseudo_id, tx_hash } => {
                write!(f, "{pseudo_id} (unverified, tx {tx_hash})")
            }
        }
    }
}
