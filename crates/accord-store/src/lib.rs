//! # accord-store
//!
//! Local storage for consent messaging.
//!
//! Provides:
//! - [`MessageStore`]: encrypted, per-consent message log on sled
//! - [`StateRepository`]: load/save of the application-state snapshot
//!
//! ## Message store
//!
//! Bodies are sealed with the consent's session key before they are
//! written, and opened again on read. Rows that fail authentication are
//! skipped, never returned as garbage.
//!
//! ```
//! use accord_crypto::SymmetricKey;
//! use accord_store::MessageStore;
//! use alloy_primitives::Address;
//!
//! let store = MessageStore::temporary().unwrap();
//! let key = SymmetricKey::generate();
//! let alice = Address::repeat_byte(0xA1);
//!
//! store.append("42", alice, &key, b"hello").unwrap();
//! let messages = store.read("42", &key).unwrap();
//! assert_eq!(messages[0].text(), Some("hello"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod message_store;
pub mod state_repo;

#[cfg(test)]
mod proptests;

pub use error::{Result, StoreError};
pub use message_store::{DecryptedMessage, MessageId, MessageStore, StoredMessage};
pub use state_repo::{MemoryRepository, SledRepository, StateRepository};
