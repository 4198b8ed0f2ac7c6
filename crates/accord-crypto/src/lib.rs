//! # accord-crypto
//!
//! Cryptographic primitives for ACCORD consents and consent chats.
//!
//! This crate provides:
//! - **BLAKE3** content hashing for attestation evidence
//! - **XChaCha20-Poly1305** authenticated encryption
//! - Order-independent chat-key derivation from two device public keys
//!
//! ## Security
//!
//! All key material uses `zeroize` for secure memory cleanup.
//! Hash comparisons are constant-time via `subtle`.
//!
//! ## Example
//!
//! ```
//! use accord_crypto::{decrypt, derive_chat_key, encrypt};
//!
//! let alice_device = [0x01u8; 32];
//! let bob_device = [0x02u8; 32];
//!
//! // Both parties derive the same key, whatever the argument order.
//! let alice_key = derive_chat_key(&alice_device, &bob_device, "42");
//! let bob_key = derive_chat_key(&bob_device, &alice_device, "42");
//!
//! let sealed = encrypt(alice_key.key(), b"hello", None).unwrap();
//! let opened = decrypt(bob_key.key(), &sealed.ciphertext, &sealed.nonce).unwrap();
//! assert_eq!(opened, b"hello");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod evidence;
pub mod hash;
pub mod session;
pub mod symmetric;

#[cfg(test)]
mod proptests;

pub use error::{CryptoError, Result};
pub use evidence::{round_geo, round_utc_hour, EvidenceCapture, EvidenceHashes};
pub use hash::{hash, Hash256};
pub use session::{derive_chat_key, derive_fallback_key, ChatKey, KeyStrength};
pub use symmetric::{
    decrypt, encrypt, EncryptedData, Nonce, SymmetricKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE,
};
