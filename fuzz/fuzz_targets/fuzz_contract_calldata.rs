//! Fuzz target for decoding consent contract calldata.
//!
//! Decoding arbitrary bytes must fail cleanly. Anything that does decode
//! must re-encode to the same call.

#![no_main]

use accord_chain::abi::{decode_call, encode_approve_unlock, encode_create_consent, encode_request_unlock};
use accord_chain::ContractCall;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(call) = decode_call(data) else {
        return;
    };
    let encoded = match &call {
        ContractCall::CreateConsent(params) => encode_create_consent(params),
        ContractCall::RequestUnlock(id) => encode_request_unlock(*id),
        ContractCall::ApproveUnlock(id) => encode_approve_unlock(*id),
    };
    assert_eq!(decode_call(&encoded).unwrap(), call);
});
