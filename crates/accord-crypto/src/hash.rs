//! BLAKE3 content hashing.
//!
//! Every piece of attestation evidence (voice, face, device key, rounded
//! location, rounded time) goes through the same function, [`hash`], and
//! ends up as a [`Hash256`] that is written on-chain as a `bytes32`.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::{CryptoError, Result};

/// A 256-bit (32-byte) BLAKE3 digest.
#[derive(Clone, Copy, Default, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

/// Hash arbitrary bytes to a 32-byte digest.
pub fn hash(data: &[u8]) -> Hash256 {
    Hash256::hash(data)
}

impl Hash256 {
    /// Hash size in bytes.
    pub const SIZE: usize = 32;

    /// Hash a single input.
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash several inputs as one contiguous byte string.
    ///
    /// Unlike length-prefixed hashing this is equivalent to hashing the
    /// concatenation, which is what chat-key derivation requires.
    pub fn hash_concat(inputs: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for input in inputs {
            hasher.update(input);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Wrap an existing 32-byte array.
    pub const fn from_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a Hash256 from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidHashLength {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    /// Get the hash as a byte array reference.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to owned byte array.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Format as lowercase hex without a `0x` prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64-character hex string, with or without `0x`.
    pub fn from_hex(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.len() != 64 {
            return Err(CryptoError::InvalidHashLength {
                expected: 64,
                actual: digits.len(),
            });
        }
        let bytes = hex::decode(digits).map_err(|e| CryptoError::InvalidHexFormat(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl ConstantTimeEq for Hash256 {
    fn ct_eq(&self, other: &Self) -> subtle::Choice {
        self.0.ct_eq(&other.0)
    }
}

impl PartialEq for Hash256 {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}

impl Eq for Hash256 {}

impl std::hash::Hash for Hash256 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl std::fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash256({})", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let h1 = hash(b"voice sample");
        let h2 = hash(b"voice sample");
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_hash_different_inputs() {
        assert_ne!(hash(b"hello"), hash(b"world"));
    }

    #[test]
    fn test_hash_matches_blake3() {
        let expected = *blake3::hash(b"abc").as_bytes();
        assert_eq!(hash(b"abc").to_bytes(), expected);
    }

    #[test]
    fn test_hash_concat_equals_hash_of_concatenation() {
        let joined = Hash256::hash_concat(&[b"hello", b"world"]);
        assert_eq!(joined, hash(b"helloworld"));
    }

    #[test]
    fn test_hex_roundtrip() {
        let h = hash(b"geo");
        let parsed = Hash256::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);

        let prefixed = Hash256::from_hex(&h.to_string()).unwrap();
        assert_eq!(h, prefixed);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(matches!(
            Hash256::from_hex("abcd"),
            Err(CryptoError::InvalidHashLength { expected: 64, actual: 4 })
        ));
        let not_hex = "zz".repeat(32);
        assert!(matches!(
            Hash256::from_hex(&not_hex),
            Err(CryptoError::InvalidHexFormat(_))
        ));
    }

    #[test]
    fn test_from_bytes_wrong_length() {
        assert!(matches!(
            Hash256::from_bytes(&[0u8; 31]),
            Err(CryptoError::InvalidHashLength { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn test_debug_is_truncated() {
        let debug = format!("{:?}", hash(b"x"));
        assert!(debug.starts_with("Hash256("));
        assert_eq!(debug.len(), "Hash256()".len() + 16);
    }
}
