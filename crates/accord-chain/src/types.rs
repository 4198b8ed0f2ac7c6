//! Transaction, receipt and call-parameter types.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use accord_crypto::EvidenceHashes;

use crate::abi::normalize_bytes32;
use crate::{ChainError, Result};

/// EVM chain selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(pub u64);

impl ChainId {
    /// Ethereum mainnet.
    pub const MAINNET: Self = Self(1);
    /// Ethereum Sepolia testnet.
    pub const SEPOLIA: Self = Self(11_155_111);
    /// Base mainnet.
    pub const BASE: Self = Self(8_453);
    /// Base Sepolia testnet.
    pub const BASE_SEPOLIA: Self = Self(84_532);
    /// Local development chain (anvil/hardhat).
    pub const LOCAL: Self = Self(31_337);
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a consent may be unlocked once the lock period is over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum UnlockMode {
    /// Single unlock, after which the consent stays open.
    OneShot = 0,
    /// Unlock stays valid for `unlock_window` seconds.
    Windowed = 1,
    /// Unlock becomes possible at a scheduled time.
    Scheduled = 2,
}

impl UnlockMode {
    /// ABI value of this mode.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for UnlockMode {
    type Error = ChainError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::OneShot),
            1 => Ok(Self::Windowed),
            2 => Ok(Self::Scheduled),
            other => Err(ChainError::Validation(format!("unknown unlock mode {other}"))),
        }
    }
}

/// Self-reported coercion level, 0 (none) to 2 (high).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct CoercionLevel(u8);

impl CoercionLevel {
    /// Highest accepted level.
    pub const MAX: u8 = 2;

    /// Validate and wrap a level.
    pub fn new(level: u8) -> Result<Self> {
        if level > Self::MAX {
            return Err(ChainError::Validation(format!(
                "coercion level must be 0..={}, got {level}",
                Self::MAX
            )));
        }
        Ok(Self(level))
    }

    /// Raw level.
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for CoercionLevel {
    type Error = ChainError;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CoercionLevel> for u8 {
    fn from(level: CoercionLevel) -> Self {
        level.0
    }
}

/// The five evidence hashes in contract argument order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentHashes {
    /// Voice recording hash.
    pub voice: B256,
    /// Face image hash.
    pub face: B256,
    /// Device public key hash.
    pub device: B256,
    /// Rounded location hash.
    pub geo: B256,
    /// Rounded UTC-hour hash.
    pub utc: B256,
}

impl ConsentHashes {
    /// Build from hex strings of any length, normalising each to 32 bytes.
    pub fn from_hex(voice: &str, face: &str, device: &str, geo: &str, utc: &str) -> Result<Self> {
        Ok(Self {
            voice: normalize_bytes32(voice)?,
            face: normalize_bytes32(face)?,
            device: normalize_bytes32(device)?,
            geo: normalize_bytes32(geo)?,
            utc: normalize_bytes32(utc)?,
        })
    }

    /// Hashes as an array: voice, face, device, geo, utc.
    pub fn as_array(&self) -> [B256; 5] {
        [self.voice, self.face, self.device, self.geo, self.utc]
    }
}

impl From<&EvidenceHashes> for ConsentHashes {
    fn from(evidence: &EvidenceHashes) -> Self {
        Self {
            voice: B256::from(evidence.voice.to_bytes()),
            face: B256::from(evidence.face.to_bytes()),
            device: B256::from(evidence.device.to_bytes()),
            geo: B256::from(evidence.geo.to_bytes()),
            utc: B256::from(evidence.utc.to_bytes()),
        }
    }
}

/// Arguments of `createConsent`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateConsentParams {
    /// Evidence hashes.
    pub hashes: ConsentHashes,
    /// Coercion level.
    pub coercion_level: CoercionLevel,
    /// The other party.
    pub counterparty: Address,
    /// Unlock mode.
    pub unlock_mode: UnlockMode,
    /// Unlock window in seconds (meaning depends on the mode).
    pub unlock_window: U256,
}

impl CreateConsentParams {
    /// Reject parameters the contract could never accept from `creator`.
    pub fn validate(&self, creator: Address) -> Result<()> {
        if self.counterparty == Address::ZERO {
            return Err(ChainError::Validation("counterparty is the zero address".into()));
        }
        if self.counterparty == creator {
            return Err(ChainError::Validation(
                "counterparty must differ from the creator".into(),
            ));
        }
        if self.unlock_mode == UnlockMode::Windowed && self.unlock_window.is_zero() {
            return Err(ChainError::Validation(
                "windowed unlock requires a non-zero window".into(),
            ));
        }
        Ok(())
    }
}

/// An unsigned transaction as handed to a [`Signer`](crate::Signer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    /// Sender (the signer's address).
    pub from: Address,
    /// Target contract.
    pub to: Address,
    /// ABI-encoded calldata.
    pub data: Vec<u8>,
    /// Wei attached to the call.
    pub value: U256,
    /// Gas limit.
    pub gas_limit: u64,
    /// Chain the transaction is valid on.
    pub chain_id: ChainId,
}

/// A log entry emitted during execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics; `topics[0]` is the event signature hash.
    pub topics: Vec<B256>,
    /// Non-indexed data.
    pub data: Vec<u8>,
}

/// Receipt of a mined transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// Transaction hash.
    pub transaction_hash: B256,
    /// Block the transaction was included in.
    pub block_number: u64,
    /// Timestamp of that block, Unix seconds.
    pub block_timestamp: u64,
    /// `true` when execution succeeded.
    pub status: bool,
    /// Gas actually consumed.
    pub gas_used: u64,
    /// Emitted logs.
    pub logs: Vec<Log>,
    /// Raw revert data, if the node returned it.
    pub revert_data: Option<Vec<u8>>,
}
