//! # accord-core
//!
//! High-level API for Accord consents.
//!
//! Two parties record a consent on chain, wait out a fixed 24 hour lock
//! period, and unlock it only when one of them requests and the *other*
//! approves. Each consent also gets an encrypted chat log keyed by its
//! on-chain id.
//!
//! ## Quick Start
//!
//! ```ignore
//! use accord_core::{ClientConfig, ConsentService, ConsentTemplate, LocalIdentity, ServiceContext};
//!
//! let config = ClientConfig::builder()
//!     .with_contract_address(contract)
//!     .with_in_memory_storage()
//!     .build_validated()?;
//!
//! let service = ConsentService::open(config, identity, ctx)?;
//!
//! let consent = service.create_consent(bob, Some("bob".into()), &template).await?;
//! let share = service.share_consent(&consent.local_id).await?;
//! // hand `share` to the counterparty, who calls `import_consent(share)`
//!
//! service.send_message(&consent.local_id, b"hello").await?;
//! ```
//!
//! ## Unlock flow
//!
//! See [`UnlockPhase`]:
//!
//! - **Locked**: less than 24 hours since creation
//! - **Unlockable**: lock period over, no request yet
//! - **RequestPending**: one party requested, the other must approve
//! - **Unlocked**: approval confirmed on chain
//!
//! Local flags change only after the confirming transaction is mined. Use
//! [`ConsentService::reconcile_unlock`] to apply the counterparty's calls.
//!
//! ## Architecture
//!
//! - [`ConsentService`]: owns the [`AppState`] and coordinates everything
//! - [`accord_chain::LedgerClient`]: contract calls, preflight, receipts
//! - [`accord_store::MessageStore`]: sealed messages in sled
//! - [`HandleResolver`]: handle directory for device keys

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod consent;
pub mod error;
pub mod flight;
pub mod request;
pub mod resolver;
pub mod service;
pub mod state;
pub mod time;

#[cfg(test)]
mod proptests;

pub use config::{ClientConfig, ClientConfigBuilder, ConfigError, LedgerConfig, MessagingConfig, StorageConfig};
pub use consent::{Consent, ConsentOrigin, ConsentStatus, UnlockPhase, LOCK_PERIOD_MS};
pub use error::{CoreError, Result};
pub use flight::{FlightGuard, InFlight};
pub use request::{ConsentRequest, ConsentTemplate, EvidenceHex, TemplateKind, ValidatedConsentData};
pub use resolver::{HandleResolver, ResolvedHandle, StaticResolver};
pub use service::{ConsentService, ConsentShare, ServiceContext};
pub use state::{AppState, LocalIdentity};
pub use time::{block_time_ms, validate_timestamp, Clock, ManualClock, SystemClock};

// Re-export commonly used types
pub use accord_chain::{ConsentId, FeeBreakdown};
pub use accord_crypto::{ChatKey, KeyStrength};
pub use accord_store::DecryptedMessage;
