//! Property-based tests for the crypto primitives.
//!
//! Covers the properties the rest of the workspace relies on:
//!
//! - Chat-key derivation is symmetric in its key arguments
//! - Sealing then opening returns the plaintext
//! - Any single flipped bit in ciphertext, nonce or key makes opening fail

use proptest::prelude::*;

use crate::{decrypt, derive_chat_key, encrypt, Nonce, SymmetricKey, KEY_SIZE, NONCE_SIZE};

proptest! {
    #[test]
    fn chat_key_symmetric(
        pub_a in prop::collection::vec(any::<u8>(), 1..65),
        pub_b in prop::collection::vec(any::<u8>(), 1..65),
        consent_id in "[0-9]{1,20}"
    ) {
        let ab = derive_chat_key(&pub_a, &pub_b, &consent_id);
        let ba = derive_chat_key(&pub_b, &pub_a, &consent_id);
        prop_assert_eq!(ab.key().as_bytes(), ba.key().as_bytes());
    }

    #[test]
    fn encrypt_decrypt_roundtrip(plaintext: Vec<u8>, key_bytes: [u8; KEY_SIZE]) {
        let key = SymmetricKey::from_array(key_bytes);
        let sealed = encrypt(&key, &plaintext, None).unwrap();
        let opened = decrypt(&key, &sealed.ciphertext, &sealed.nonce).unwrap();
        prop_assert_eq!(plaintext, opened);
    }

    #[test]
    fn flipped_ciphertext_fails(
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8
    ) {
        let key = SymmetricKey::generate();
        let mut sealed = encrypt(&key, &plaintext, None).unwrap();

        let i = index.index(sealed.ciphertext.len());
        sealed.ciphertext[i] ^= 1 << bit;

        prop_assert!(decrypt(&key, &sealed.ciphertext, &sealed.nonce).is_err());
    }

    #[test]
    fn flipped_nonce_fails(
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        index in 0usize..NONCE_SIZE,
        bit in 0u8..8
    ) {
        let key = SymmetricKey::generate();
        let sealed = encrypt(&key, &plaintext, None).unwrap();

        let mut nonce_bytes = *sealed.nonce.as_bytes();
        nonce_bytes[index] ^= 1 << bit;
        let nonce = Nonce::from_bytes(&nonce_bytes).unwrap();

        prop_assert!(decrypt(&key, &sealed.ciphertext, &nonce).is_err());
    }

    #[test]
    fn flipped_key_fails(
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        key_bytes: [u8; KEY_SIZE],
        index in 0usize..KEY_SIZE,
        bit in 0u8..8
    ) {
        let key = SymmetricKey::from_array(key_bytes);
        let sealed = encrypt(&key, &plaintext, None).unwrap();

        let mut flipped = key_bytes;
        flipped[index] ^= 1 << bit;
        let other = SymmetricKey::from_array(flipped);

        prop_assert!(decrypt(&other, &sealed.ciphertext, &sealed.nonce).is_err());
    }
}
