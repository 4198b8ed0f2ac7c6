//! # accord-chain
//!
//! Client side of the on-chain consent contract.
//!
//! This crate does not implement the contract. It encodes calls to it,
//! submits them through a [`Signer`], waits for receipts and decodes the
//! `ConsentCreated` event back into a consent identifier.
//!
//! ## Components
//!
//! - [`abi`]: selectors, argument words, revert reasons
//! - [`events`]: `ConsentCreated` log decoding and the pseudo-id fallback
//! - [`signer`]: the [`Signer`] capability with a local-key and an
//!   external-session implementation
//! - [`preflight`]: balance/fee check run before value-carrying calls
//! - [`ledger`]: [`LedgerClient`], which ties the above together
//! - [`mock`]: [`MockChain`], an in-memory chain for tests and development
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use accord_chain::{ExternalSessionSigner, LedgerClient, LedgerOptions, MockChain};
//! use alloy_primitives::{Address, U256};
//!
//! let contract = Address::repeat_byte(0xC0);
//! let chain = MockChain::new(contract);
//! let alice = Address::repeat_byte(0xA1);
//! chain.set_balance(alice, U256::from(10u64).pow(U256::from(18u64)));
//!
//! let client = LedgerClient::new(
//!     Arc::new(ExternalSessionSigner::new(Arc::new(chain.session(alice)))),
//!     Arc::new(chain.clone()),
//!     contract,
//!     LedgerOptions::default(),
//! );
//! assert_eq!(client.address(), alice);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod abi;
pub mod error;
pub mod events;
pub mod ledger;
pub mod mock;
pub mod preflight;
pub mod provider;
pub mod signer;
pub mod types;

#[cfg(test)]
mod proptests;

pub use abi::ContractCall;
pub use error::{ChainError, Result};
pub use events::{ConsentCreated, ConsentId};
pub use ledger::{
    ConfirmedCall, Confirmation, CreatedConsent, EventFallbackPolicy, LedgerClient, LedgerOptions,
};
pub use mock::{MockChain, MockFailure, MockKeyVault, MockWalletSession};
pub use preflight::FeeBreakdown;
pub use provider::ChainProvider;
pub use signer::{ExternalSessionSigner, KeyVault, LocalKeySigner, Signer, SignerKind, WalletSession};
pub use types::{
    ChainId, CoercionLevel, ConsentHashes, CreateConsentParams, Log, TransactionReceipt,
    TransactionRequest, UnlockMode,
};

pub use alloy_primitives::{Address, B256, U256};
