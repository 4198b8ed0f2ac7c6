//! The consent service.
//!
//! [`ConsentService`] is the entry point for applications. It owns the
//! [`AppState`], persists it through a [`StateRepository`] after every
//! confirmed change, drives the [`LedgerClient`], and seals chat messages
//! into the [`MessageStore`].
//!
//! # Confirmation discipline
//!
//! Every mutating call checks the consent first, sends the transaction, and
//! only writes local state once the receipt is confirmed. A reverted or
//! timed-out transaction leaves the state exactly as it was.
//!
//! # Concurrency
//!
//! State sits behind a [`tokio::sync::RwLock`] that is never held while a
//! transaction is pending. Overlapping mutating calls for the same consent or
//! request are turned away by the [`InFlight`] registry.

use std::fmt;
use std::sync::Arc;

use accord_chain::{
    ChainError, ChainProvider, ConsentId, ContractCall, FeeBreakdown, LedgerClient, Signer,
};
use accord_crypto::{derive_chat_key, derive_fallback_key, ChatKey};
use accord_store::{
    DecryptedMessage, MessageStore, SledRepository, StateRepository, StoreError, StoredMessage,
};
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ConfigError};
use crate::consent::{Consent, ConsentOrigin};
use crate::flight::InFlight;
use crate::request::{ConsentRequest, ConsentTemplate, ValidatedConsentData};
use crate::resolver::HandleResolver;
use crate::state::{AppState, LocalIdentity};
use crate::time::{block_time_ms, validate_timestamp, Clock, MAX_CLOCK_SKEW_MS};
use crate::{CoreError, Result};

// ============================================================================
// Collaborators
// ============================================================================

/// External capabilities the service is built on.
#[derive(Clone)]
pub struct ServiceContext {
    /// Transaction signer for the local identity.
    pub signer: Arc<dyn Signer>,
    /// Node access.
    pub provider: Arc<dyn ChainProvider>,
    /// Handle directory.
    pub resolver: Arc<dyn HandleResolver>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

/// What the creator hands the counterparty so it can track the consent.
///
/// Everything else is read back from the chain on import.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentShare {
    /// Creation transaction.
    pub creation_tx: B256,
    /// Creator's creation time, Unix milliseconds.
    ///
    /// Informational: import takes the creation block's time and rejects
    /// shares that disagree with it.
    pub created_at: i64,
    /// Creator's handle.
    pub handle: Option<String>,
}

// ============================================================================
// Service
// ============================================================================

/// Consent lifecycle and messaging for one local identity.
pub struct ConsentService {
    config: ClientConfig,
    address: Address,
    ledger: LedgerClient,
    state: RwLock<AppState>,
    repository: Arc<dyn StateRepository<AppState>>,
    messages: Arc<MessageStore>,
    resolver: Arc<dyn HandleResolver>,
    clock: Arc<dyn Clock>,
    flights: InFlight,
}

impl ConsentService {
    /// Open the service with sled storage as configured.
    ///
    /// State and messages share one database: a temporary one when
    /// `storage.in_memory` is set, otherwise one under `storage.data_dir`.
    pub fn open(config: ClientConfig, identity: LocalIdentity, ctx: ServiceContext) -> Result<Self> {
        config.validate()?;

        let db = if config.storage.in_memory {
            sled::Config::new().temporary(true).open()?
        } else {
            std::fs::create_dir_all(&config.storage.data_dir).map_err(StoreError::from)?;
            sled::open(&config.storage.data_dir)?
        };

        let messages = Arc::new(MessageStore::new(&db)?);
        let repository: Arc<dyn StateRepository<AppState>> = Arc::new(SledRepository::new(&db)?);
        Self::with_storage(config, identity, ctx, messages, repository)
    }

    /// Build the service on explicit storage.
    ///
    /// A previously saved state is loaded when it belongs to the same
    /// address; the identity profile is refreshed from `identity`.
    pub fn with_storage(
        config: ClientConfig,
        identity: LocalIdentity,
        ctx: ServiceContext,
        messages: Arc<MessageStore>,
        repository: Arc<dyn StateRepository<AppState>>,
    ) -> Result<Self> {
        config.validate()?;
        let contract = config
            .ledger
            .contract_address
            .ok_or_else(|| ConfigError::Missing("ledger.contract_address".into()))?;

        if ctx.signer.address() != identity.address {
            return Err(CoreError::Validation(format!(
                "signer address {} does not match identity {}",
                ctx.signer.address(),
                identity.address
            )));
        }

        let state = match repository.load()? {
            Some(saved) if saved.identity.address != identity.address => {
                return Err(CoreError::Validation(format!(
                    "saved state belongs to {}, not {}",
                    saved.identity.address, identity.address
                )));
            }
            Some(mut saved) => {
                saved.identity = identity;
                saved
            }
            None => AppState::new(identity),
        };

        info!(
            address = %state.identity.address,
            consents = state.consents.len(),
            requests = state.requests.len(),
            signer = %ctx.signer.kind(),
            "Consent service ready"
        );

        Ok(Self {
            address: state.identity.address,
            ledger: LedgerClient::new(ctx.signer, ctx.provider, contract, config.ledger.options()),
            config,
            state: RwLock::new(state),
            repository,
            messages,
            resolver: ctx.resolver,
            clock: ctx.clock,
            flights: InFlight::new(),
        })
    }

    /// Local wallet address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Local identity profile.
    pub async fn identity(&self) -> LocalIdentity {
        self.state.read().await.identity.clone()
    }

    /// Fail unless the node serves the configured chain.
    pub async fn verify_chain(&self) -> Result<()> {
        Ok(self.ledger.verify_chain().await?)
    }

    /// Balance preflight for creating a consent with the default fee.
    pub async fn fee_quote(&self) -> Result<FeeBreakdown> {
        Ok(self
            .ledger
            .preflight_create(self.config.ledger.default_fee_wei)
            .await?)
    }

    fn persist(&self, state: &AppState) -> Result<()> {
        self.repository.save(state)?;
        Ok(())
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Record a consent request received from another party.
    pub async fn submit_request(&self, request: ConsentRequest) -> Result<()> {
        let now = self.clock.now_ms();
        validate_timestamp(request.requested_at, now)?;
        request.validate(self.address, now)?;

        let mut state = self.state.write().await;
        if state.requests.contains_key(&request.id) {
            return Err(CoreError::Validation(format!(
                "request {} already received",
                request.id
            )));
        }
        info!(request_id = %request.id, from = %request.from_address, kind = %request.template.kind(), "Consent request received");
        state.requests.insert(request.id.clone(), request);
        self.persist(&state)
    }

    /// Requests waiting for a decision, oldest first.
    pub async fn pending_requests(&self) -> Vec<ConsentRequest> {
        let mut requests: Vec<_> = self.state.read().await.requests.values().cloned().collect();
        requests.sort_by_key(|r| r.requested_at);
        requests
    }

    /// Discard a request.
    pub async fn reject_request(&self, request_id: &str) -> Result<ConsentRequest> {
        let _guard = self.flights.acquire(request_key(request_id))?;
        let mut state = self.state.write().await;
        let request = state
            .requests
            .remove(request_id)
            .ok_or_else(|| CoreError::NotFound(format!("request {request_id}")))?;
        self.persist(&state)?;
        info!(request_id, "Consent request rejected");
        Ok(request)
    }

    /// Accept a request by creating the consent on chain.
    ///
    /// The request is dropped only once the consent is confirmed; on any
    /// failure it stays pending.
    pub async fn accept_request(&self, request_id: &str) -> Result<Consent> {
        let _guard = self.flights.acquire(request_key(request_id))?;
        let request = self
            .state
            .read()
            .await
            .requests
            .get(request_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("request {request_id}")))?;

        let data = request.validate(self.address, self.clock.now_ms())?;
        let consent = self.create_on_chain(&data).await?;

        let mut state = self.state.write().await;
        state.requests.remove(request_id);
        state.consents.insert(consent.local_id.clone(), consent.clone());
        self.persist(&state)?;
        info!(request_id, local_id = %consent.local_id, consent_id = %consent.consent_id, "Consent request accepted");
        Ok(consent)
    }

    // ========================================================================
    // Consents
    // ========================================================================

    /// All tracked consents, oldest first.
    pub async fn consents(&self) -> Vec<Consent> {
        let mut consents: Vec<_> = self.state.read().await.consents.values().cloned().collect();
        consents.sort_by_key(|c| c.created_at);
        consents
    }

    /// Look up a consent by local id.
    pub async fn consent(&self, local_id: &str) -> Result<Consent> {
        self.state
            .read()
            .await
            .consents
            .get(local_id)
            .cloned()
            .ok_or_else(|| not_found(local_id))
    }

    /// Create a consent with `counterparty` directly.
    pub async fn create_consent(
        &self,
        counterparty: Address,
        counterparty_handle: Option<String>,
        template: &ConsentTemplate,
    ) -> Result<Consent> {
        let _guard = self.flights.acquire(format!("create:{counterparty}"))?;
        let data = template.validate(
            self.address,
            counterparty,
            counterparty_handle,
            self.clock.now_ms(),
        )?;
        let consent = self.create_on_chain(&data).await?;

        let mut state = self.state.write().await;
        state.consents.insert(consent.local_id.clone(), consent.clone());
        self.persist(&state)?;
        Ok(consent)
    }

    /// Create a consent with the user behind `handle`.
    pub async fn create_consent_for_handle(
        &self,
        handle: &str,
        template: &ConsentTemplate,
    ) -> Result<Consent> {
        let entry = self
            .resolver
            .resolve(handle)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("handle {handle}")))?;
        self.create_consent(entry.address, Some(handle.to_string()), template)
            .await
    }

    async fn create_on_chain(&self, data: &ValidatedConsentData) -> Result<Consent> {
        let created = self
            .ledger
            .create_consent(&data.params(), self.config.ledger.default_fee_wei)
            .await?;

        let consent = Consent::new(
            ConsentOrigin {
                local_id: new_local_id(),
                consent_id: created.consent_id,
                owner: self.address,
                creator: self.address,
                creation_tx: created.tx_hash,
                created_at: block_time_ms(created.block_timestamp),
            },
            data,
        );
        info!(
            local_id = %consent.local_id,
            consent_id = %consent.consent_id,
            status = %consent.status,
            locked_until = consent.locked_until(),
            "Consent tracked"
        );
        Ok(consent)
    }

    /// What the counterparty needs to import a consent.
    pub async fn share_consent(&self, local_id: &str) -> Result<ConsentShare> {
        let state = self.state.read().await;
        let consent = state.consents.get(local_id).ok_or_else(|| not_found(local_id))?;
        Ok(ConsentShare {
            creation_tx: consent.creation_tx,
            created_at: consent.created_at,
            handle: Some(state.identity.handle.clone()),
        })
    }

    /// Track a consent the counterparty created with us.
    ///
    /// The creation transaction is read back from the chain: it must be a
    /// successful `createConsent` naming the local address, and its
    /// `ConsentCreated` event must decode. The lock starts at the creation
    /// block's time, never at the time claimed in the share.
    pub async fn import_consent(&self, share: ConsentShare) -> Result<Consent> {
        let _guard = self.flights.acquire(format!("import:{}", share.creation_tx))?;
        if self.state.read().await.has_creation_tx(share.creation_tx) {
            return Err(CoreError::Validation(format!(
                "consent from {} is already tracked",
                share.creation_tx
            )));
        }

        let call = self.ledger.lookup_call(share.creation_tx).await?;
        let ContractCall::CreateConsent(params) = call.call else {
            return Err(CoreError::Validation(format!(
                "{} is not a createConsent transaction",
                share.creation_tx
            )));
        };
        if params.counterparty != self.address {
            return Err(CoreError::NotAParty(self.address));
        }
        let created_at = block_time_ms(call.confirmation.block_timestamp);
        validate_timestamp(created_at, self.clock.now_ms())?;
        if share.created_at.abs_diff(created_at) > MAX_CLOCK_SKEW_MS.unsigned_abs() {
            warn!(
                anomaly = "share_timestamp_mismatch",
                tx_hash = %share.creation_tx,
                claimed = share.created_at,
                block_time = created_at,
                "Shared creation time disagrees with the creation block"
            );
            return Err(CoreError::Validation(format!(
                "shared creation time {} differs from block time {created_at}",
                share.created_at
            )));
        }
        let event = call.created.ok_or_else(|| {
            CoreError::Chain(ChainError::EventDecoding {
                tx_hash: share.creation_tx,
                reason: "no ConsentCreated log from the contract".into(),
            })
        })?;
        if event.party1 != call.from || event.party2 != self.address {
            warn!(
                anomaly = "consent_parties_mismatch",
                tx_hash = %share.creation_tx,
                party1 = %event.party1,
                party2 = %event.party2,
                "ConsentCreated parties differ from the creation call"
            );
            return Err(CoreError::Validation(
                "ConsentCreated parties differ from the creation call".into(),
            ));
        }

        let data = ValidatedConsentData::from_params(&params, call.from, share.handle);
        let consent = Consent::new(
            ConsentOrigin {
                local_id: new_local_id(),
                consent_id: ConsentId::Verified(event.consent_id),
                owner: self.address,
                creator: call.from,
                creation_tx: share.creation_tx,
                created_at,
            },
            &data,
        );

        let mut state = self.state.write().await;
        state.consents.insert(consent.local_id.clone(), consent.clone());
        self.persist(&state)?;
        info!(local_id = %consent.local_id, consent_id = %consent.consent_id, creator = %call.from, "Consent imported");
        Ok(consent)
    }

    /// Replace an unverified id by reading the creation event again.
    pub async fn reconcile_consent(&self, local_id: &str) -> Result<Consent> {
        let _guard = self.flights.acquire(local_id)?;
        let consent = self.consent(local_id).await?;
        if consent.consent_id.is_verified() {
            return Ok(consent);
        }

        let call = self.ledger.lookup_call(consent.creation_tx).await?;
        let event = call.created.ok_or_else(|| {
            CoreError::Chain(ChainError::EventDecoding {
                tx_hash: consent.creation_tx,
                reason: "no ConsentCreated log from the contract".into(),
            })
        })?;

        let mut state = self.state.write().await;
        let consent = state.consents.get_mut(local_id).ok_or_else(|| not_found(local_id))?;
        let previous = consent.consent_id;
        consent.verify(event.consent_id);
        let updated = consent.clone();
        self.persist(&state)?;
        info!(local_id, %previous, consent_id = %updated.consent_id, "Consent id verified");
        Ok(updated)
    }

    /// Decline a consent locally.
    pub async fn reject_consent(&self, local_id: &str) -> Result<Consent> {
        let _guard = self.flights.acquire(local_id)?;
        let mut state = self.state.write().await;
        let consent = state.consents.get_mut(local_id).ok_or_else(|| not_found(local_id))?;
        consent.reject()?;
        let updated = consent.clone();
        self.persist(&state)?;
        info!(local_id, "Consent rejected");
        Ok(updated)
    }

    // ========================================================================
    // Unlock
    // ========================================================================

    /// Request the unlock of a consent.
    ///
    /// Refused while locked, after a request, for unverified ids and for
    /// rejected consents. The request flag is set only after the
    /// transaction is confirmed.
    pub async fn request_unlock(&self, local_id: &str) -> Result<Consent> {
        let _guard = self.flights.acquire(local_id)?;
        let now = self.clock.now_ms();
        let consent_id = self.consent(local_id).await?.check_request(self.address, now)?;

        let confirmation = self.ledger.request_unlock(consent_id).await?;

        let mut state = self.state.write().await;
        let consent = state.consents.get_mut(local_id).ok_or_else(|| not_found(local_id))?;
        consent.record_request(self.address, confirmation.tx_hash, now)?;
        let updated = consent.clone();
        self.persist(&state)?;
        info!(local_id, %consent_id, tx_hash = %confirmation.tx_hash, "Unlock requested");
        Ok(updated)
    }

    /// Approve the counterparty's pending unlock request.
    ///
    /// The requesting address cannot approve. The consent is marked unlocked
    /// only after the transaction is confirmed.
    pub async fn approve_unlock(&self, local_id: &str) -> Result<Consent> {
        let _guard = self.flights.acquire(local_id)?;
        let now = self.clock.now_ms();
        let consent_id = self.consent(local_id).await?.check_approve(self.address, now)?;

        let confirmation = self.ledger.approve_unlock(consent_id).await?;

        let mut state = self.state.write().await;
        let consent = state.consents.get_mut(local_id).ok_or_else(|| not_found(local_id))?;
        consent.record_approval(self.address, confirmation.tx_hash, now)?;
        let updated = consent.clone();
        self.persist(&state)?;
        info!(local_id, %consent_id, tx_hash = %confirmation.tx_hash, "Unlock approved");
        Ok(updated)
    }

    /// Apply an unlock call the counterparty made, given its transaction.
    ///
    /// The transaction must be a confirmed `requestUnlock` or
    /// `approveUnlock` for this consent. Applying the same transaction twice
    /// is a no-op.
    pub async fn reconcile_unlock(&self, local_id: &str, tx_hash: B256) -> Result<Consent> {
        let _guard = self.flights.acquire(local_id)?;
        let call = self.ledger.lookup_call(tx_hash).await?;
        let now = self.clock.now_ms();

        let mut state = self.state.write().await;
        let consent = state.consents.get_mut(local_id).ok_or_else(|| not_found(local_id))?;
        let consent_id = consent
            .consent_id
            .verified()
            .ok_or_else(|| CoreError::Unverified(local_id.to_string()))?;

        match call.call {
            ContractCall::RequestUnlock(id) if id == consent_id => {
                if consent.request_tx() == Some(tx_hash) {
                    return Ok(consent.clone());
                }
                consent.record_request(call.from, tx_hash, now)?;
            }
            ContractCall::ApproveUnlock(id) if id == consent_id => {
                if consent.approval_tx() == Some(tx_hash) {
                    return Ok(consent.clone());
                }
                consent.record_approval(call.from, tx_hash, now)?;
            }
            _ => {
                return Err(CoreError::Validation(format!(
                    "{tx_hash} is not an unlock call for consent {consent_id}"
                )))
            }
        }

        let updated = consent.clone();
        self.persist(&state)?;
        info!(local_id, %consent_id, %tx_hash, from = %call.from, phase = %updated.phase(now), "Unlock reconciled");
        Ok(updated)
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    /// Chat key for a consent.
    ///
    /// Uses both device public keys when the counterparty's can be
    /// resolved. Otherwise falls back to [`ChatKey::Degraded`] with a
    /// warning, or fails with [`CoreError::KeyUnavailable`] when degraded
    /// keys are disabled.
    pub async fn session_key(&self, local_id: &str) -> Result<ChatKey> {
        let (consent, own_key) = {
            let state = self.state.read().await;
            let consent = state.consents.get(local_id).ok_or_else(|| not_found(local_id))?;
            (consent.clone(), state.identity.device_public_key.clone())
        };
        if !consent.consent_id.is_verified() {
            return Err(CoreError::Unverified(local_id.to_string()));
        }
        let key_id = consent.key();

        match self.counterparty_device_key(&consent).await {
            Some(peer_key) if !own_key.is_empty() => Ok(derive_chat_key(&own_key, &peer_key, &key_id)),
            _ if !self.config.messaging.allow_degraded_keys => {
                Err(CoreError::KeyUnavailable(local_id.to_string()))
            }
            _ => {
                warn!(
                    anomaly = "degraded_session_key",
                    local_id,
                    consent_id = %key_id,
                    counterparty = %consent.counterparty,
                    "Counterparty device key unavailable, using degraded chat key"
                );
                Ok(derive_fallback_key(
                    consent.owner.as_slice(),
                    consent.counterparty.as_slice(),
                    &key_id,
                ))
            }
        }
    }

    async fn counterparty_device_key(&self, consent: &Consent) -> Option<Vec<u8>> {
        if let Some(handle) = consent.counterparty_handle.as_deref() {
            match self.resolver.resolve(handle).await {
                Ok(Some(entry)) if entry.address == consent.counterparty => {
                    if entry.device_public_key.is_some() {
                        return entry.device_public_key;
                    }
                }
                Ok(Some(entry)) => warn!(
                    anomaly = "handle_address_mismatch",
                    handle,
                    resolved = %entry.address,
                    counterparty = %consent.counterparty,
                    "Handle resolves to a different address"
                ),
                Ok(None) => debug!(handle, "Handle not in directory"),
                Err(e) => warn!(handle, error = %e, "Handle lookup failed"),
            }
        }

        match self.resolver.device_public_key(consent.counterparty).await {
            Ok(key) => key,
            Err(e) => {
                warn!(counterparty = %consent.counterparty, error = %e, "Device key lookup failed");
                None
            }
        }
    }

    /// Seal and store a message from the local identity.
    pub async fn send_message(&self, local_id: &str, plaintext: &[u8]) -> Result<StoredMessage> {
        let max = self.config.messaging.max_message_bytes;
        if plaintext.len() > max {
            return Err(CoreError::Validation(format!(
                "message is {} bytes, limit is {max}",
                plaintext.len()
            )));
        }

        let key = self.session_key(local_id).await?;
        let consent = self.consent(local_id).await?;
        let message = self.messages.append_at(
            &consent.key(),
            self.address,
            key.key(),
            plaintext,
            self.clock.now_ms(),
        )?;
        debug!(local_id, message_id = %message.id, strength = %key.strength(), "Message sent");
        Ok(message)
    }

    /// Decrypted messages of a consent, oldest first.
    ///
    /// Rows that fail authentication are skipped.
    pub async fn messages(&self, local_id: &str) -> Result<Vec<DecryptedMessage>> {
        let key = self.session_key(local_id).await?;
        let consent = self.consent(local_id).await?;
        Ok(self.messages.read(&consent.key(), key.key())?)
    }

    /// Messages of a consent not sent by the local identity.
    pub async fn unread_count(&self, local_id: &str) -> Result<usize> {
        let consent = self.consent(local_id).await?;
        Ok(self.messages.unread_count(&consent.key(), self.address)?)
    }

    /// Irreversibly delete every message of a consent.
    pub async fn clear_messages(&self, local_id: &str) -> Result<usize> {
        let _guard = self.flights.acquire(local_id)?;
        let consent = self.consent(local_id).await?;
        let removed = self.messages.clear(&consent.key())?;
        info!(local_id, removed, "Messages cleared");
        Ok(removed)
    }
}

impl fmt::Debug for ConsentService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsentService")
            .field("address", &self.address)
            .field("contract", &self.ledger.contract())
            .field("state", &"[RwLock<AppState>]")
            .finish()
    }
}

fn request_key(request_id: &str) -> String {
    format!("request:{request_id}")
}

fn not_found(local_id: &str) -> CoreError {
    CoreError::NotFound(format!("consent {local_id}"))
}

fn new_local_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}
