//! Property-based tests for the consent state machine.

use accord_chain::{CoercionLevel, ConsentHashes, ConsentId};
use alloy_primitives::{Address, B256, U256};
use proptest::prelude::*;

use crate::consent::{Consent, ConsentOrigin, UnlockPhase, LOCK_PERIOD_MS};
use crate::request::{TemplateKind, ValidatedConsentData};
use crate::CoreError;

fn address() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>()
        .prop_filter("non-zero", |b| b.iter().any(|&x| x != 0))
        .prop_map(Address::new)
}

fn consent(owner: Address, counterparty: Address, created_at: i64) -> Consent {
    Consent::new(
        ConsentOrigin {
            local_id: "prop".into(),
            consent_id: ConsentId::Verified(U256::from(1)),
            owner,
            creator: owner,
            creation_tx: B256::ZERO,
            created_at,
        },
        &ValidatedConsentData {
            kind: TemplateKind::OneShot,
            hashes: ConsentHashes::default(),
            coercion_level: CoercionLevel::default(),
            counterparty,
            counterparty_handle: None,
            unlock_window: U256::ZERO,
        },
    )
}

proptest! {
    #[test]
    fn locked_iff_before_lock_end(
        created_at in 1_704_067_200_000i64..4_000_000_000_000i64,
        offset in -10_000i64..(2 * LOCK_PERIOD_MS),
    ) {
        let c = consent(Address::repeat_byte(1), Address::repeat_byte(2), created_at);
        let now = created_at + offset;
        prop_assert_eq!(c.locked_until(), created_at + LOCK_PERIOD_MS);
        prop_assert_eq!(c.is_locked(now), now < created_at + LOCK_PERIOD_MS);
        prop_assert_eq!(c.check_request(c.owner, now).is_ok(), !c.is_locked(now));
    }

    #[test]
    fn requester_never_approves(a in address(), b in address(), a_requests in any::<bool>()) {
        prop_assume!(a != b);
        let mut c = consent(a, b, 1_717_200_000_000);
        let now = c.locked_until();
        let (requester, other) = if a_requests { (a, b) } else { (b, a) };

        c.record_request(requester, B256::ZERO, now).unwrap();
        prop_assert!(matches!(c.check_approve(requester, now), Err(CoreError::SameParty(_))));
        prop_assert!(matches!(
            c.record_approval(requester, B256::ZERO, now),
            Err(CoreError::SameParty(_))
        ));
        prop_assert!(!c.is_unlocked());

        c.record_approval(other, B256::ZERO, now).unwrap();
        prop_assert!(c.is_unlocked() && c.unlock_requested() && c.unlock_approved());
        prop_assert_eq!(c.phase(now), UnlockPhase::Unlocked);
    }

    #[test]
    fn outsiders_cannot_act(a in address(), b in address(), outsider in address()) {
        prop_assume!(a != b && outsider != a && outsider != b);
        let c = consent(a, b, 1_717_200_000_000);
        prop_assert!(
            matches!(c.check_request(outsider, c.locked_until()), Err(CoreError::NotAParty(_))),
            "outsider was allowed to request"
        );
    }
}
