//! Configuration for the consent service.
//!
//! Settings are grouped into storage, ledger and messaging sections.
//!
//! # Example
//!
//! ```
//! use accord_core::config::ClientConfigBuilder;
//! use alloy_primitives::Address;
//! use std::time::Duration;
//!
//! let config = ClientConfigBuilder::new()
//!     .with_in_memory_storage()
//!     .with_contract_address(Address::repeat_byte(0xC0))
//!     .with_receipt_timeout(Duration::from_secs(30))
//!     .build_validated()
//!     .unwrap();
//! assert!(config.storage.in_memory);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use accord_chain::{ChainId, EventFallbackPolicy, LedgerOptions};
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Default creation fee, 0.001 ether.
const DEFAULT_FEE_WEI: u64 = 1_000_000_000_000_000;

/// Default receipt poll interval in milliseconds.
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Default receipt timeout in seconds.
const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 120;

/// Default maximum plaintext size of one message.
const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Main client configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Storage configuration.
    pub storage: StorageConfig,

    /// Ledger configuration.
    pub ledger: LedgerConfig,

    /// Messaging configuration.
    pub messaging: MessagingConfig,
}

impl ClientConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.storage.in_memory && self.storage.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.data_dir".into(),
                reason: "data directory cannot be empty when not using in-memory storage".into(),
            });
        }

        match self.ledger.contract_address {
            None => return Err(ConfigError::Missing("ledger.contract_address".into())),
            Some(address) if address == Address::ZERO => {
                return Err(ConfigError::InvalidValue {
                    field: "ledger.contract_address".into(),
                    reason: "contract address cannot be the zero address".into(),
                })
            }
            Some(_) => {}
        }

        if self.ledger.create_gas_estimate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ledger.create_gas_estimate".into(),
                reason: "gas estimate must be greater than zero".into(),
            });
        }

        if self.ledger.call_gas_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ledger.call_gas_limit".into(),
                reason: "gas limit must be greater than zero".into(),
            });
        }

        if self.ledger.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "ledger.poll_interval".into(),
                reason: "poll interval must be greater than zero".into(),
            });
        }

        if self.ledger.receipt_timeout <= self.ledger.poll_interval {
            return Err(ConfigError::InvalidValue {
                field: "ledger.receipt_timeout".into(),
                reason: "receipt timeout must be longer than the poll interval".into(),
            });
        }

        if self.messaging.max_message_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "messaging.max_message_bytes".into(),
                reason: "max message size must be greater than zero".into(),
            });
        }

        Ok(())
    }
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the local database.
    ///
    /// Defaults to the platform-specific data directory:
    /// - Linux: `~/.local/share/accord`
    /// - macOS: `~/Library/Application Support/accord`
    /// - Windows: `C:\Users\<User>\AppData\Roaming\accord`
    pub data_dir: PathBuf,

    /// Use a temporary in-memory database instead of disk.
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            in_memory: false,
        }
    }
}

/// Ledger configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Address of the consent contract. Required.
    pub contract_address: Option<Address>,

    /// Chain the contract lives on.
    pub chain_id: u64,

    /// Fee attached to `createConsent`, in wei.
    pub default_fee_wei: U256,

    /// Fixed gas estimate for `createConsent`, used by the preflight.
    pub create_gas_estimate: u64,

    /// Gas limit for the unlock calls.
    pub call_gas_limit: u64,

    /// Delay between receipt lookups.
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,

    /// How long to wait for a receipt before giving up.
    #[serde(with = "duration_serde")]
    pub receipt_timeout: Duration,

    /// What to do when a creation receipt carries no `ConsentCreated` event.
    pub event_fallback: EventFallbackPolicy,
}

impl LedgerConfig {
    /// Options for a [`accord_chain::LedgerClient`].
    pub fn options(&self) -> LedgerOptions {
        LedgerOptions {
            chain_id: ChainId(self.chain_id),
            create_gas_estimate: self.create_gas_estimate,
            call_gas_limit: self.call_gas_limit,
            poll_interval: self.poll_interval,
            receipt_timeout: self.receipt_timeout,
            fallback: self.event_fallback,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let options = LedgerOptions::default();
        Self {
            contract_address: None,
            chain_id: ChainId::BASE_SEPOLIA.0,
            default_fee_wei: U256::from(DEFAULT_FEE_WEI),
            create_gas_estimate: options.create_gas_estimate,
            call_gas_limit: options.call_gas_limit,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            receipt_timeout: Duration::from_secs(DEFAULT_RECEIPT_TIMEOUT_SECS),
            event_fallback: EventFallbackPolicy::PseudoId,
        }
    }
}

/// Messaging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Fall back to the degraded address-derived key when the counterparty's
    /// device key cannot be resolved.
    pub allow_degraded_keys: bool,

    /// Largest accepted plaintext, in bytes.
    pub max_message_bytes: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            allow_degraded_keys: true,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

/// Builder for constructing `ClientConfig` with custom values.
#[derive(Clone, Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    /// Build the final configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }

    /// Build and validate the configuration.
    pub fn build_validated(self) -> Result<ClientConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }

    // ===== Storage Configuration =====

    /// Set the data directory.
    pub fn with_data_dir(mut self, path: PathBuf) -> Self {
        self.config.storage.data_dir = path;
        self
    }

    /// Use in-memory storage.
    pub fn with_in_memory_storage(mut self) -> Self {
        self.config.storage.in_memory = true;
        self
    }

    /// Use disk storage (default).
    pub fn with_disk_storage(mut self) -> Self {
        self.config.storage.in_memory = false;
        self
    }

    // ===== Ledger Configuration =====

    /// Set the consent contract address.
    pub fn with_contract_address(mut self, address: Address) -> Self {
        self.config.ledger.contract_address = Some(address);
        self
    }

    /// Set the chain.
    pub fn with_chain_id(mut self, chain_id: ChainId) -> Self {
        self.config.ledger.chain_id = chain_id.0;
        self
    }

    /// Set the creation fee.
    pub fn with_default_fee(mut self, fee_wei: U256) -> Self {
        self.config.ledger.default_fee_wei = fee_wei;
        self
    }

    /// Set the fixed gas estimate for `createConsent`.
    pub fn with_create_gas_estimate(mut self, gas: u64) -> Self {
        self.config.ledger.create_gas_estimate = gas;
        self
    }

    /// Set the gas limit for the unlock calls.
    pub fn with_call_gas_limit(mut self, gas: u64) -> Self {
        self.config.ledger.call_gas_limit = gas;
        self
    }

    /// Set the receipt poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.ledger.poll_interval = interval;
        self
    }

    /// Set the receipt timeout.
    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.config.ledger.receipt_timeout = timeout;
        self
    }

    /// Set the missing-event policy.
    pub fn with_event_fallback(mut self, policy: EventFallbackPolicy) -> Self {
        self.config.ledger.event_fallback = policy;
        self
    }

    // ===== Messaging Configuration =====

    /// Allow degraded session keys (default).
    pub fn allow_degraded_keys(mut self) -> Self {
        self.config.messaging.allow_degraded_keys = true;
        self
    }

    /// Refuse to message without an end-to-end key.
    pub fn deny_degraded_keys(mut self) -> Self {
        self.config.messaging.allow_degraded_keys = false;
        self
    }

    /// Set the maximum message size.
    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.config.messaging.max_message_bytes = max;
        self
    }
}

/// Configuration error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// The field name.
        field: String,
        /// The reason it's invalid.
        reason: String,
    },

    /// Missing required configuration.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

/// Get the default data directory for the current platform.
fn default_data_dir() -> PathBuf {
    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("accord");
    }

    if let Some(home_dir) = dirs::home_dir() {
        return home_dir.join(".accord");
    }

    PathBuf::from(".accord")
}

/// Serde support for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct DurationRepr {
        secs: u64,
        nanos: u32,
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let repr = DurationRepr {
            secs: duration.as_secs(),
            nanos: duration.subsec_nanos(),
        };
        repr.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let repr = DurationRepr::deserialize(deserializer)?;
        Ok(Duration::new(repr.secs, repr.nanos))
    }
}
