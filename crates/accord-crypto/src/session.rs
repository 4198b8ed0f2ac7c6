//! Per-consent chat key derivation.
//!
//! Both parties of a consent derive the same symmetric key from their two
//! device public keys and the consent identifier:
//!
//! ```text
//! key = BLAKE3( min(pubA, pubB) || max(pubA, pubB) || utf8(consent_id) )
//! ```
//!
//! Sorting the keys byte-lexicographically makes the derivation symmetric,
//! so it does not matter which side calls it.
//!
//! When the counterparty's device key cannot be resolved, a substitute key
//! is derived from public data only (the two wallet addresses and the
//! consent id). That key offers no confidentiality against anyone who knows
//! those values, so it is returned as [`ChatKey::Degraded`] and callers can
//! tell it apart from a real end-to-end session.

use crate::hash::Hash256;
use crate::symmetric::SymmetricKey;

/// BLAKE3 derive-key context for the degraded fallback path.
const FALLBACK_CONTEXT: &str = "accord 2024 degraded chat key v1";

/// How much a [`ChatKey`] can be trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyStrength {
    /// Derived from both device public keys.
    EndToEnd,
    /// Derived from public identifiers only.
    Degraded,
}

impl KeyStrength {
    /// Label used in logs and telemetry.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndToEnd => "end_to_end",
            Self::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for KeyStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat session key together with how it was obtained.
#[derive(Clone, Debug)]
pub enum ChatKey {
    /// Genuine end-to-end key from both parties' device public keys.
    Established(SymmetricKey),
    /// Weak-session key derived from addresses and consent id.
    Degraded(SymmetricKey),
}

impl ChatKey {
    /// The symmetric key, regardless of strength.
    pub fn key(&self) -> &SymmetricKey {
        match self {
            Self::Established(key) | Self::Degraded(key) => key,
        }
    }

    /// Strength of this key.
    pub fn strength(&self) -> KeyStrength {
        match self {
            Self::Established(_) => KeyStrength::EndToEnd,
            Self::Degraded(_) => KeyStrength::Degraded,
        }
    }

    /// Whether this is the weak fallback key.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

/// Derive the chat key for a consent from two device public keys.
///
/// The result is identical for `(a, b)` and `(b, a)`.
pub fn derive_chat_key(pub_a: &[u8], pub_b: &[u8], consent_id: &str) -> ChatKey {
    let (first, second) = if pub_a <= pub_b {
        (pub_a, pub_b)
    } else {
        (pub_b, pub_a)
    };
    let digest = Hash256::hash_concat(&[first, second, consent_id.as_bytes()]);
    ChatKey::Established(SymmetricKey::from_array(digest.to_bytes()))
}

/// Derive the degraded substitute key from the two wallet addresses.
///
/// Addresses are sorted like device keys so both parties land on the same
/// key. The output is exactly 32 bytes of BLAKE3 derive-key output.
pub fn derive_fallback_key(address_a: &[u8], address_b: &[u8], consent_id: &str) -> ChatKey {
    let (first, second) = if address_a <= address_b {
        (address_a, address_b)
    } else {
        (address_b, address_a)
    };
    let mut material = Vec::with_capacity(first.len() + second.len() + consent_id.len());
    material.extend_from_slice(first);
    material.extend_from_slice(second);
    material.extend_from_slice(consent_id.as_bytes());

    ChatKey::Degraded(SymmetricKey::from_array(blake3::derive_key(
        FALLBACK_CONTEXT,
        &material,
    )))
}
