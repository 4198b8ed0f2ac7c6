//! Fuzz target for revert data and bytes32 hex parsing.

#![no_main]

use accord_chain::abi::{decode_revert_reason, normalize_bytes32};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = decode_revert_reason(data);

    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(word) = normalize_bytes32(text) {
            assert_eq!(word.len(), 32);
        }
    }
});
