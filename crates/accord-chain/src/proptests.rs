//! Property-based tests for the ledger codec and preflight.

use alloy_primitives::{Address, U256};
use proptest::prelude::*;

use crate::abi::{decode_call, decode_revert_reason, encode_create_consent, encode_revert_reason, normalize_bytes32, ContractCall};
use crate::events::ConsentCreated;
use crate::preflight::FeeBreakdown;
use crate::types::{CoercionLevel, ConsentHashes, CreateConsentParams, UnlockMode};

fn arb_u256() -> impl Strategy<Value = U256> {
    any::<[u8; 32]>().prop_map(|bytes| U256::from_be_bytes(bytes))
}

fn arb_address() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(Address::from)
}

proptest! {
    #[test]
    fn preflight_rejects_iff_underfunded(
        balance in arb_u256(),
        fee in arb_u256(),
        gas_estimate: u64,
        gas_price in arb_u256()
    ) {
        let breakdown = FeeBreakdown::new(balance, fee, gas_estimate, gas_price);
        let required = U256::from(gas_estimate)
            .checked_mul(gas_price)
            .and_then(|gas| fee.checked_add(gas));
        let underfunded = required.map_or(true, |total| balance < total);
        prop_assert_eq!(breakdown.check().is_err(), underfunded);
        prop_assert_eq!(breakdown.overflow, required.is_none());
    }

    #[test]
    fn preflight_small_values_exact(
        balance: u64,
        fee: u32,
        gas_estimate: u32,
        gas_price: u32
    ) {
        let breakdown = FeeBreakdown::new(
            U256::from(balance),
            U256::from(fee),
            u64::from(gas_estimate),
            U256::from(gas_price),
        );
        let required = u128::from(fee) + u128::from(gas_estimate) * u128::from(gas_price);
        prop_assert_eq!(breakdown.check().is_ok(), u128::from(balance) >= required);
    }

    #[test]
    fn create_consent_calldata_decodes(
        words in any::<[[u8; 32]; 5]>(),
        level in 0u8..=2,
        counterparty in arb_address(),
        mode in 0u8..=2,
        window in arb_u256()
    ) {
        let params = CreateConsentParams {
            hashes: ConsentHashes {
                voice: words[0].into(),
                face: words[1].into(),
                device: words[2].into(),
                geo: words[3].into(),
                utc: words[4].into(),
            },
            coercion_level: CoercionLevel::new(level).unwrap(),
            counterparty,
            unlock_mode: UnlockMode::try_from(mode).unwrap(),
            unlock_window: window,
        };
        let decoded = decode_call(&encode_create_consent(&params)).unwrap();
        prop_assert_eq!(decoded, ContractCall::CreateConsent(params));
    }

    #[test]
    fn consent_created_log_decodes(
        id in arb_u256(),
        party1 in arb_address(),
        party2 in arb_address(),
        contract in arb_address()
    ) {
        let event = ConsentCreated { consent_id: id, party1, party2 };
        let decoded = ConsentCreated::decode(&event.to_log(contract)).unwrap();
        prop_assert_eq!(decoded, Some(event));
    }

    #[test]
    fn normalized_hex_is_always_32_bytes(digits in "[0-9a-f]{0,100}") {
        let word = normalize_bytes32(&digits).unwrap();
        let hex = hex::encode(word);
        if digits.len() >= 64 {
            prop_assert_eq!(hex, digits[..64].to_string());
        } else {
            prop_assert!(hex.ends_with(&digits));
        }
    }

    #[test]
    fn revert_reason_survives(reason in ".{0,80}") {
        prop_assert_eq!(decode_revert_reason(&encode_revert_reason(&reason)), Some(reason));
    }

    #[test]
    fn decode_call_never_panics(data: Vec<u8>) {
        let _ = decode_call(&data);
        let _ = decode_revert_reason(&data);
    }
}
