//! End-to-end consent flow between two parties on an in-memory chain.
//!
//! Alice creates a consent with Bob, Bob imports it, both wait out the lock
//! period, Alice requests the unlock, Bob approves, and they exchange a
//! message over the consent's chat log.

use std::sync::Arc;
use std::time::Duration;

use accord_chain::{ChainError, ChainId, ExternalSessionSigner, MockChain, MockFailure, U256};
use accord_core::{
    AppState, ClientConfig, ConsentId, ConsentService, ConsentStatus, ConsentTemplate, CoreError,
    EvidenceHex, LocalIdentity, ManualClock, ServiceContext, StaticResolver, UnlockPhase,
    LOCK_PERIOD_MS,
};
use accord_crypto::{EvidenceCapture, EvidenceHashes};
use accord_store::{MemoryRepository, MessageStore};
use alloy_primitives::Address;
use chrono::{TimeZone, Utc};

const ALICE: Address = Address::new([0xA1; 20]);
const BOB: Address = Address::new([0xB2; 20]);
const CONTRACT: Address = Address::new([0xC0; 20]);

const T0: i64 = 1_717_200_000_000;

fn fee() -> U256 {
    U256::from(10u64).pow(U256::from(15u64))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Fixtures
// ============================================================================

struct World {
    chain: MockChain,
    clock: ManualClock,
    messages: Arc<MessageStore>,
    resolver: Arc<StaticResolver>,
}

impl World {
    fn new() -> Self {
        Self::with_resolver(
            StaticResolver::new()
                .with("alice", ALICE, Some(b"alice-device-key".to_vec()))
                .with("bob", BOB, Some(b"bob-device-key".to_vec())),
        )
    }

    fn with_resolver(resolver: StaticResolver) -> Self {
        init_tracing();
        let chain = MockChain::new(CONTRACT);
        let ether = U256::from(10u64).pow(U256::from(18u64));
        chain.set_balance(ALICE, ether);
        chain.set_balance(BOB, ether);
        chain.set_next_consent_id(U256::from(42u64));
        chain.set_timestamp((T0 / 1000) as u64);

        Self {
            chain,
            clock: ManualClock::new(T0),
            messages: Arc::new(MessageStore::temporary().unwrap()),
            resolver: Arc::new(resolver),
        }
    }

    fn context(&self, address: Address) -> ServiceContext {
        ServiceContext {
            signer: Arc::new(ExternalSessionSigner::new(Arc::new(self.chain.session(address)))),
            provider: Arc::new(self.chain.clone()),
            resolver: self.resolver.clone(),
            clock: Arc::new(self.clock.clone()),
        }
    }

    fn party(&self, address: Address, handle: &str) -> ConsentService {
        self.party_with(address, handle, config())
    }

    fn party_with(&self, address: Address, handle: &str, config: ClientConfig) -> ConsentService {
        let identity = LocalIdentity {
            address,
            handle: handle.into(),
            device_public_key: format!("{handle}-device-key").into_bytes(),
        };
        ConsentService::with_storage(
            config,
            identity,
            self.context(address),
            self.messages.clone(),
            Arc::new(MemoryRepository::<AppState>::new()),
        )
        .unwrap()
    }
}

fn config() -> ClientConfig {
    ClientConfig::builder()
        .with_contract_address(CONTRACT)
        .with_chain_id(ChainId::LOCAL)
        .with_in_memory_storage()
        .with_default_fee(fee())
        .with_poll_interval(Duration::from_millis(10))
        .with_receipt_timeout(Duration::from_secs(1))
        .build_validated()
        .unwrap()
}

fn template() -> ConsentTemplate {
    let capture = EvidenceCapture {
        voice: b"i agree".to_vec(),
        face: b"face-image".to_vec(),
        device_public_key: b"alice-device-key".to_vec(),
        latitude: 52.520_008,
        longitude: 13.404_954,
        captured_at: Utc.timestamp_millis_opt(T0).unwrap(),
    };
    ConsentTemplate::OneShot {
        evidence: EvidenceHex::from(&EvidenceHashes::from_capture(&capture).unwrap()),
        coercion_level: 0,
    }
}

// ============================================================================
// Scenario
// ============================================================================

#[tokio::test]
async fn test_two_party_unlock_and_chat() {
    let world = World::new();
    let alice = world.party(ALICE, "alice");
    let bob = world.party(BOB, "bob");

    // Creation with fee 10^15 yields consent 42.
    let a = alice
        .create_consent(BOB, Some("bob".into()), &template())
        .await
        .unwrap();
    assert_eq!(a.consent_id, ConsentId::Verified(U256::from(42u64)));
    assert_eq!(a.status, ConsentStatus::Active);
    assert_eq!(a.created_at, T0);
    assert_eq!(a.locked_until(), T0 + LOCK_PERIOD_MS);
    assert_eq!(world.chain.consent(U256::from(42u64)).unwrap().fee_paid, fee());
    assert_eq!(world.chain.balance_of(CONTRACT), fee());

    // Bob tracks the same consent from Alice's share.
    let share = alice.share_consent(&a.local_id).await.unwrap();
    let b = bob.import_consent(share.clone()).await.unwrap();
    assert_eq!(b.consent_id, a.consent_id);
    assert_eq!(b.status, ConsentStatus::Accepted);
    assert_eq!(b.counterparty, ALICE);
    assert_eq!(b.counterparty_handle.as_deref(), Some("alice"));
    assert_eq!(b.locked_until(), a.locked_until());
    assert_eq!(b.hashes, a.hashes);
    assert!(bob.import_consent(share).await.is_err());

    // One millisecond before the lock ends nothing reaches the chain.
    world.clock.set(a.locked_until() - 1);
    let submitted = world.chain.submitted().len();
    let err = alice.request_unlock(&a.local_id).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidTransition {
            phase: UnlockPhase::Locked,
            ..
        }
    ));
    assert_eq!(world.chain.submitted().len(), submitted);

    // At the boundary Alice may request.
    world.clock.set(a.locked_until());
    let a = alice.request_unlock(&a.local_id).await.unwrap();
    assert!(a.unlock_requested());
    assert!(!a.is_unlocked());
    assert_eq!(a.requested_by(), Some(ALICE));
    assert_eq!(a.phase(world.clock_now()), UnlockPhase::RequestPending);

    // Alice cannot approve her own request.
    assert!(matches!(
        alice.approve_unlock(&a.local_id).await,
        Err(CoreError::SameParty(addr)) if addr == ALICE
    ));

    // Bob has not seen the request yet.
    assert!(matches!(
        bob.approve_unlock(&b.local_id).await,
        Err(CoreError::InvalidTransition {
            phase: UnlockPhase::Unlockable,
            ..
        })
    ));

    let request_tx = a.request_tx().unwrap();
    let b = bob.reconcile_unlock(&b.local_id, request_tx).await.unwrap();
    assert_eq!(b.requested_by(), Some(ALICE));
    assert_eq!(b.phase(world.clock_now()), UnlockPhase::RequestPending);

    let b = bob.approve_unlock(&b.local_id).await.unwrap();
    assert!(b.is_unlocked());
    assert!(b.unlock_requested() && b.unlock_approved());
    assert!(world.chain.consent(U256::from(42u64)).unwrap().approved);

    let approval_tx = b.approval_tx().unwrap();
    let a = alice.reconcile_unlock(&a.local_id, approval_tx).await.unwrap();
    assert!(a.is_unlocked());
    // Applying the same transaction again changes nothing.
    assert_eq!(alice.reconcile_unlock(&a.local_id, approval_tx).await.unwrap(), a);

    // Chat over the consent.
    let key = alice.session_key(&a.local_id).await.unwrap();
    assert!(!key.is_degraded());

    alice.send_message(&a.local_id, b"hello").await.unwrap();
    let received = bob.messages(&b.local_id).await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].text(), Some("hello"));
    assert_eq!(received[0].sender, ALICE);
    assert_eq!(received[0].consent_id, "42");
    assert_eq!(bob.unread_count(&b.local_id).await.unwrap(), 1);
    assert_eq!(alice.unread_count(&a.local_id).await.unwrap(), 0);

    assert_eq!(alice.clear_messages(&a.local_id).await.unwrap(), 1);
    assert!(bob.messages(&b.local_id).await.unwrap().is_empty());
}

impl World {
    fn clock_now(&self) -> i64 {
        use accord_core::Clock;
        self.clock.now_ms()
    }
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test]
async fn test_insufficient_balance_never_submits() {
    let world = World::new();
    world.chain.set_balance(ALICE, fee());
    let alice = world.party(ALICE, "alice");

    let err = alice
        .create_consent(BOB, None, &template())
        .await
        .unwrap_err();
    match err {
        CoreError::Chain(ChainError::InsufficientBalance { shortfall, breakdown }) => {
            assert_eq!(breakdown.fee, fee());
            assert_eq!(shortfall, breakdown.required_total - fee());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(world.chain.submitted().is_empty());
    assert!(alice.consents().await.is_empty());
}

#[tokio::test]
async fn test_reverted_request_leaves_consent_untouched() {
    let world = World::new();
    let alice = world.party(ALICE, "alice");
    let a = alice.create_consent(BOB, None, &template()).await.unwrap();
    world.clock.set(a.locked_until());

    world.chain.fail_next(MockFailure::Revert("paused".into()));
    let err = alice.request_unlock(&a.local_id).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Chain(ChainError::TransactionReverted { reason: Some(ref r), .. }) if r == "paused"
    ));
    assert!(!err.is_retryable());

    let a = alice.consent(&a.local_id).await.unwrap();
    assert!(!a.unlock_requested());
    assert_eq!(a.request_tx(), None);

    // The next attempt goes through.
    assert!(alice.request_unlock(&a.local_id).await.unwrap().unlock_requested());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_unlock_rejected() {
    let world = World::new();
    let alice = world.party(ALICE, "alice");
    let a = alice.create_consent(BOB, None, &template()).await.unwrap();
    world.clock.set(a.locked_until());
    world.chain.set_receipt_delay(3);

    let (first, second) = tokio::join!(
        alice.request_unlock(&a.local_id),
        alice.request_unlock(&a.local_id)
    );
    assert!(first.unwrap().unlock_requested());
    let err = second.unwrap_err();
    assert!(matches!(err, CoreError::InFlight(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_missing_event_gives_unverified_consent() {
    let world = World::new();
    world.chain.set_emit_events(false);
    let alice = world.party(ALICE, "alice");

    let a = alice.create_consent(BOB, None, &template()).await.unwrap();
    assert!(!a.consent_id.is_verified());
    assert_eq!(a.status, ConsentStatus::Pending);

    world.clock.set(a.locked_until());
    assert!(matches!(
        alice.request_unlock(&a.local_id).await,
        Err(CoreError::Unverified(_))
    ));
    assert!(matches!(
        alice.send_message(&a.local_id, b"hi").await,
        Err(CoreError::Unverified(_))
    ));
    // The receipt still carries no event, so the id stays unverified.
    assert!(matches!(
        alice.reconcile_consent(&a.local_id).await,
        Err(CoreError::Chain(ChainError::EventDecoding { .. }))
    ));

    // Bob refuses to import a consent without a decodable event.
    let bob = world.party(BOB, "bob");
    let share = alice.share_consent(&a.local_id).await.unwrap();
    assert!(bob.import_consent(share).await.is_err());
}

#[tokio::test]
async fn test_import_rejects_foreign_consent() {
    let world = World::new();
    let alice = world.party(ALICE, "alice");
    let carol = Address::new([0xCC; 20]);
    let a = alice.create_consent(carol, None, &template()).await.unwrap();

    let bob = world.party(BOB, "bob");
    let share = alice.share_consent(&a.local_id).await.unwrap();
    assert!(matches!(
        bob.import_consent(share).await,
        Err(CoreError::NotAParty(addr)) if addr == BOB
    ));
}

#[tokio::test]
async fn test_import_rejects_future_timestamp() {
    let world = World::new();
    let alice = world.party(ALICE, "alice");
    let a = alice.create_consent(BOB, None, &template()).await.unwrap();

    let bob = world.party(BOB, "bob");
    let mut share = alice.share_consent(&a.local_id).await.unwrap();
    share.created_at = T0 + LOCK_PERIOD_MS;
    assert!(matches!(
        bob.import_consent(share).await,
        Err(CoreError::Validation(_))
    ));
}

#[tokio::test]
async fn test_import_rejects_backdated_share() {
    let world = World::new();
    let alice = world.party(ALICE, "alice");
    let a = alice.create_consent(BOB, None, &template()).await.unwrap();

    // A share claiming creation at 2024-01-01 would put the lock long past.
    let bob = world.party(BOB, "bob");
    let honest = alice.share_consent(&a.local_id).await.unwrap();
    let mut backdated = honest.clone();
    backdated.created_at = 1_704_067_200_000;
    assert!(matches!(
        bob.import_consent(backdated).await,
        Err(CoreError::Validation(_))
    ));

    // The lock follows the creation block, so Bob is still locked at T0.
    let b = bob.import_consent(honest).await.unwrap();
    assert_eq!(b.created_at, T0);
    assert_eq!(b.locked_until(), a.locked_until());
    let submitted = world.chain.submitted().len();
    assert!(matches!(
        bob.request_unlock(&b.local_id).await,
        Err(CoreError::InvalidTransition {
            phase: UnlockPhase::Locked,
            ..
        })
    ));
    assert_eq!(world.chain.submitted().len(), submitted);
}

#[tokio::test]
async fn test_created_at_follows_block_time() {
    let world = World::new();
    // The local clock runs two minutes ahead of the chain.
    world.clock.set(T0 + 120_000);
    let alice = world.party(ALICE, "alice");
    let a = alice.create_consent(BOB, None, &template()).await.unwrap();
    assert_eq!(a.created_at, T0);

    let bob = world.party(BOB, "bob");
    let share = alice.share_consent(&a.local_id).await.unwrap();
    let b = bob.import_consent(share).await.unwrap();
    assert_eq!(b.locked_until(), T0 + LOCK_PERIOD_MS);
}

// ============================================================================
// Requests
// ============================================================================

fn request_from_alice(id: &str) -> accord_core::ConsentRequest {
    accord_core::ConsentRequest {
        id: id.into(),
        from_handle: "alice".into(),
        from_address: ALICE,
        template: template(),
        requested_at: T0,
    }
}

#[tokio::test]
async fn test_accept_request_creates_consent() {
    let world = World::new();
    let bob = world.party(BOB, "bob");

    bob.submit_request(request_from_alice("req-1")).await.unwrap();
    assert!(bob.submit_request(request_from_alice("req-1")).await.is_err());
    assert_eq!(bob.pending_requests().await.len(), 1);

    let consent = bob.accept_request("req-1").await.unwrap();
    assert_eq!(consent.creator, BOB);
    assert_eq!(consent.counterparty, ALICE);
    assert_eq!(consent.counterparty_handle.as_deref(), Some("alice"));
    assert_eq!(consent.consent_id, ConsentId::Verified(U256::from(42u64)));
    assert!(bob.pending_requests().await.is_empty());

    let alice = world.party(ALICE, "alice");
    let share = bob.share_consent(&consent.local_id).await.unwrap();
    let imported = alice.import_consent(share).await.unwrap();
    assert_eq!(imported.creator, BOB);
    assert_eq!(imported.counterparty_handle.as_deref(), Some("bob"));
}

#[tokio::test]
async fn test_failed_accept_keeps_request() {
    let world = World::new();
    world.chain.set_balance(BOB, U256::ZERO);
    let bob = world.party(BOB, "bob");

    bob.submit_request(request_from_alice("req-1")).await.unwrap();
    assert!(bob.accept_request("req-1").await.is_err());
    assert_eq!(bob.pending_requests().await.len(), 1);

    let rejected = bob.reject_request("req-1").await.unwrap();
    assert_eq!(rejected.id, "req-1");
    assert!(bob.pending_requests().await.is_empty());
    assert!(matches!(
        bob.reject_request("req-1").await,
        Err(CoreError::NotFound(_))
    ));
}

// ============================================================================
// Keys and messages
// ============================================================================

#[tokio::test]
async fn test_degraded_key_still_interoperates() {
    let world = World::with_resolver(StaticResolver::new());
    let alice = world.party(ALICE, "alice");
    let bob = world.party(BOB, "bob");

    let a = alice.create_consent(BOB, None, &template()).await.unwrap();
    let share = alice.share_consent(&a.local_id).await.unwrap();
    let b = bob.import_consent(share).await.unwrap();

    let key = alice.session_key(&a.local_id).await.unwrap();
    assert!(key.is_degraded());

    bob.send_message(&b.local_id, b"weak but working").await.unwrap();
    let received = alice.messages(&a.local_id).await.unwrap();
    assert_eq!(received[0].text(), Some("weak but working"));
    assert_eq!(received[0].sender, BOB);
}

#[tokio::test]
async fn test_strict_keys_refuse_degraded_session() {
    let world = World::with_resolver(StaticResolver::new());
    let strict = ClientConfig::builder()
        .with_contract_address(CONTRACT)
        .with_chain_id(ChainId::LOCAL)
        .with_in_memory_storage()
        .with_default_fee(fee())
        .with_poll_interval(Duration::from_millis(10))
        .with_receipt_timeout(Duration::from_secs(1))
        .deny_degraded_keys()
        .build_validated()
        .unwrap();
    let alice = world.party_with(ALICE, "alice", strict);
    let a = alice.create_consent(BOB, None, &template()).await.unwrap();

    assert!(matches!(
        alice.send_message(&a.local_id, b"hi").await,
        Err(CoreError::KeyUnavailable(_))
    ));
}

#[tokio::test]
async fn test_message_size_limit() {
    let world = World::new();
    let alice = world.party(ALICE, "alice");
    let a = alice.create_consent(BOB, None, &template()).await.unwrap();

    let limit = alice.config().messaging.max_message_bytes;
    assert!(alice.send_message(&a.local_id, &vec![0u8; limit]).await.is_ok());
    assert!(matches!(
        alice.send_message(&a.local_id, &vec![0u8; limit + 1]).await,
        Err(CoreError::Validation(_))
    ));
}

#[tokio::test]
async fn test_messages_in_timestamp_order() {
    let world = World::new();
    let alice = world.party(ALICE, "alice");
    let a = alice.create_consent(BOB, None, &template()).await.unwrap();

    for i in 0..5u8 {
        world.clock.advance(1_000);
        alice.send_message(&a.local_id, &[i]).await.unwrap();
    }
    let messages = alice.messages(&a.local_id).await.unwrap();
    assert_eq!(messages.len(), 5);
    assert!(messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(messages[4].plaintext, vec![4]);
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_state_survives_reopen() {
    let world = World::new();
    let dir = tempfile::tempdir().unwrap();
    let on_disk = || {
        ClientConfig::builder()
            .with_contract_address(CONTRACT)
            .with_chain_id(ChainId::LOCAL)
            .with_data_dir(dir.path().to_path_buf())
            .with_disk_storage()
            .with_default_fee(fee())
            .with_poll_interval(Duration::from_millis(10))
            .with_receipt_timeout(Duration::from_secs(1))
            .build_validated()
            .unwrap()
    };
    let identity = LocalIdentity {
        address: ALICE,
        handle: "alice".into(),
        device_public_key: b"alice-device-key".to_vec(),
    };

    let local_id = {
        let alice = ConsentService::open(on_disk(), identity.clone(), world.context(ALICE)).unwrap();
        let a = alice.create_consent(BOB, None, &template()).await.unwrap();
        alice.send_message(&a.local_id, b"kept").await.unwrap();
        a.local_id
    };

    let alice = ConsentService::open(on_disk(), identity, world.context(ALICE)).unwrap();
    let consent = alice.consent(&local_id).await.unwrap();
    assert_eq!(consent.consent_id, ConsentId::Verified(U256::from(42u64)));
    assert_eq!(alice.messages(&local_id).await.unwrap()[0].text(), Some("kept"));
}

#[tokio::test]
async fn test_signer_must_match_identity() {
    let world = World::new();
    let identity = LocalIdentity {
        address: ALICE,
        handle: "alice".into(),
        device_public_key: Vec::new(),
    };
    let result = ConsentService::open(config(), identity, world.context(BOB));
    assert!(matches!(result, Err(CoreError::Validation(_))));
}
