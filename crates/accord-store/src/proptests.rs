//! Property-based tests for message ordering.

use accord_crypto::SymmetricKey;
use alloy_primitives::Address;
use proptest::prelude::*;

use crate::MessageStore;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn reads_are_timestamp_ordered(timestamps in prop::collection::vec(-1_000_000i64..1_000_000, 1..40)) {
        let store = MessageStore::temporary().unwrap();
        let key = SymmetricKey::generate();
        let sender = Address::repeat_byte(0xA1);

        for (i, ts) in timestamps.iter().enumerate() {
            store.append_at("42", sender, &key, &(i as u32).to_be_bytes(), *ts).unwrap();
        }

        let messages = store.read("42", &key).unwrap();
        prop_assert_eq!(messages.len(), timestamps.len());
        for pair in messages.windows(2) {
            prop_assert!(pair[0].timestamp <= pair[1].timestamp);
            if pair[0].timestamp == pair[1].timestamp {
                // Ties keep insertion order.
                prop_assert!(pair[0].plaintext < pair[1].plaintext);
            }
        }
    }

    #[test]
    fn consent_ids_never_bleed(a in "[0-9a-z]{1,12}", b in "[0-9a-z]{1,12}") {
        prop_assume!(a != b);
        let store = MessageStore::temporary().unwrap();
        let key = SymmetricKey::generate();
        let sender = Address::repeat_byte(0xB2);

        store.append(&a, sender, &key, b"a").unwrap();
        store.append(&b, sender, &key, b"b").unwrap();
        store.append(&b, sender, &key, b"b").unwrap();

        prop_assert_eq!(store.count(&a).unwrap(), 1);
        prop_assert_eq!(store.count(&b).unwrap(), 2);
    }
}
