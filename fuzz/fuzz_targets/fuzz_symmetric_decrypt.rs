//! Fuzz target for opening sealed message payloads.
//!
//! Arbitrary bytes parsed as `nonce || ciphertext` must be rejected with an
//! error, never a panic. A payload sealed under one key must never open
//! under a key derived from the fuzz input.

#![no_main]

use accord_crypto::{encrypt, EncryptedData, SymmetricKey};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(sealed) = EncryptedData::from_bytes(data) {
        let _ = sealed.open(&SymmetricKey::generate());
    }

    if data.len() >= 32 {
        let (key_bytes, plaintext) = data.split_at(32);
        let key = SymmetricKey::from_bytes(key_bytes).unwrap();
        let sealed = encrypt(&key, plaintext, None).unwrap();
        assert_eq!(sealed.open(&key).unwrap(), plaintext);

        let mut flipped = *key.as_bytes();
        flipped[0] ^= 0x01;
        assert!(sealed.open(&SymmetricKey::from_array(flipped)).is_err());
    }
});
