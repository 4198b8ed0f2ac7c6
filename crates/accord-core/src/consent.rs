//! Consent record and unlock state machine.
//!
//! ```text
//! Locked --(now >= locked_until)--> Unlockable --request--> RequestPending --approve--> Unlocked
//! ```
//!
//! `Locked -> Unlockable` happens on its own as time passes. The other two
//! transitions are driven by confirmed transactions: callers run
//! [`Consent::check_request`] / [`Consent::check_approve`] before sending
//! anything, and [`Consent::record_request`] / [`Consent::record_approval`]
//! only with the hash of a transaction that was mined successfully. A failed
//! or unconfirmed transaction therefore leaves the consent untouched.

use accord_chain::{CoercionLevel, ConsentHashes, ConsentId, UnlockMode};
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::request::{TemplateKind, ValidatedConsentData};
use crate::{CoreError, Result};

/// Fixed lock period after creation (24 hours).
pub const LOCK_PERIOD_MS: i64 = 24 * 60 * 60 * 1000;

/// Lifecycle status of a consent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsentStatus {
    /// Created on chain but the id is not verified from the event yet.
    Pending,
    /// Created by the local party and verified.
    Active,
    /// Created by the counterparty and verified on import.
    Accepted,
    /// Declined locally; no further unlock actions.
    Rejected,
}

impl ConsentStatus {
    /// Stable identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a consent is in the unlock flow at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnlockPhase {
    /// Inside the lock period.
    Locked,
    /// Lock period over, nobody asked to unlock yet.
    Unlockable,
    /// One party requested the unlock, waiting for the other.
    RequestPending,
    /// Both parties agreed and the approval is confirmed.
    Unlocked,
}

impl std::fmt::Display for UnlockPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Locked => "locked",
            Self::Unlockable => "unlockable",
            Self::RequestPending => "waiting for approval",
            Self::Unlocked => "unlocked",
        })
    }
}

/// How a consent came to be tracked locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsentOrigin {
    /// Local identifier.
    pub local_id: String,
    /// On-chain identifier.
    pub consent_id: ConsentId,
    /// Local identity's address.
    pub owner: Address,
    /// Address that sent `createConsent`.
    pub creator: Address,
    /// Creation transaction.
    pub creation_tx: B256,
    /// Creation time, Unix milliseconds.
    pub created_at: i64,
}

/// A consent between the local party and one counterparty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    /// Local identifier.
    pub local_id: String,
    /// On-chain identifier.
    pub consent_id: ConsentId,
    /// Local identity's address.
    pub owner: Address,
    /// Address that sent `createConsent`.
    pub creator: Address,
    /// The other party.
    pub counterparty: Address,
    /// The other party's handle, if known.
    pub counterparty_handle: Option<String>,
    /// Template identifier.
    pub template: TemplateKind,
    /// Creation time, Unix milliseconds.
    pub created_at: i64,
    /// Evidence hashes committed on chain.
    pub hashes: ConsentHashes,
    /// Coercion level committed on chain.
    pub coercion_level: CoercionLevel,
    /// Unlock window or scheduled time, per template.
    pub unlock_window: U256,
    /// Lifecycle status.
    pub status: ConsentStatus,
    /// Creation transaction.
    pub creation_tx: B256,
    locked_until: i64,
    unlock_requested: bool,
    unlock_approved: bool,
    is_unlocked: bool,
    requested_by: Option<Address>,
    request_tx: Option<B256>,
    approval_tx: Option<B256>,
}

impl Consent {
    /// Build a freshly created or imported consent.
    ///
    /// `locked_until` is fixed here and never changes afterwards.
    pub fn new(origin: ConsentOrigin, data: &ValidatedConsentData) -> Self {
        let mut consent = Self {
            local_id: origin.local_id,
            consent_id: origin.consent_id,
            owner: origin.owner,
            creator: origin.creator,
            counterparty: data.counterparty,
            counterparty_handle: data.counterparty_handle.clone(),
            template: data.kind,
            created_at: origin.created_at,
            hashes: data.hashes,
            coercion_level: data.coercion_level,
            unlock_window: data.unlock_window,
            status: ConsentStatus::Pending,
            creation_tx: origin.creation_tx,
            locked_until: origin.created_at.saturating_add(LOCK_PERIOD_MS),
            unlock_requested: false,
            unlock_approved: false,
            is_unlocked: false,
            requested_by: None,
            request_tx: None,
            approval_tx: None,
        };
        consent.status = consent.settled_status();
        consent
    }

    fn settled_status(&self) -> ConsentStatus {
        if !self.consent_id.is_verified() {
            ConsentStatus::Pending
        } else if self.creator == self.owner {
            ConsentStatus::Active
        } else {
            ConsentStatus::Accepted
        }
    }

    /// Store key for this consent's messages.
    pub fn key(&self) -> String {
        self.consent_id.key()
    }

    /// Contract unlock mode.
    pub fn unlock_mode(&self) -> UnlockMode {
        self.template.unlock_mode()
    }

    /// End of the lock period, Unix milliseconds.
    pub fn locked_until(&self) -> i64 {
        self.locked_until
    }

    /// Whether an unlock request is confirmed.
    pub fn unlock_requested(&self) -> bool {
        self.unlock_requested
    }

    /// Whether an unlock approval is confirmed.
    pub fn unlock_approved(&self) -> bool {
        self.unlock_approved
    }

    /// Whether the consent is unlocked.
    pub fn is_unlocked(&self) -> bool {
        self.is_unlocked
    }

    /// Address that requested the unlock.
    pub fn requested_by(&self) -> Option<Address> {
        self.requested_by
    }

    /// Transaction that confirmed the request.
    pub fn request_tx(&self) -> Option<B256> {
        self.request_tx
    }

    /// Transaction that confirmed the approval.
    pub fn approval_tx(&self) -> Option<B256> {
        self.approval_tx
    }

    /// True iff `now_ms` is before the end of the lock period.
    pub fn is_locked(&self, now_ms: i64) -> bool {
        now_ms < self.locked_until
    }

    /// Milliseconds left in the lock period.
    pub fn lock_remaining_ms(&self, now_ms: i64) -> i64 {
        self.locked_until.saturating_sub(now_ms).max(0)
    }

    /// Whether `address` is one of the two parties.
    pub fn is_party(&self, address: Address) -> bool {
        address == self.owner || address == self.counterparty
    }

    /// Unlock phase at `now_ms`.
    pub fn phase(&self, now_ms: i64) -> UnlockPhase {
        if self.is_unlocked {
            UnlockPhase::Unlocked
        } else if self.is_locked(now_ms) {
            UnlockPhase::Locked
        } else if self.unlock_requested {
            UnlockPhase::RequestPending
        } else {
            UnlockPhase::Unlockable
        }
    }

    fn check_actionable(&self, actor: Address) -> Result<U256> {
        if self.status == ConsentStatus::Rejected {
            return Err(CoreError::Validation(format!(
                "consent {} was rejected",
                self.local_id
            )));
        }
        let id = self
            .consent_id
            .verified()
            .ok_or_else(|| CoreError::Unverified(self.local_id.clone()))?;
        if !self.is_party(actor) {
            return Err(CoreError::NotAParty(actor));
        }
        Ok(id)
    }

    /// Check that `actor` may request the unlock at `now_ms`.
    ///
    /// Returns the verified on-chain id to call the contract with.
    pub fn check_request(&self, actor: Address, now_ms: i64) -> Result<U256> {
        let id = self.check_actionable(actor)?;
        match self.phase(now_ms) {
            UnlockPhase::Unlockable => Ok(id),
            phase => Err(CoreError::InvalidTransition {
                action: "request unlock",
                phase,
            }),
        }
    }

    /// Check that `actor` may approve the pending unlock at `now_ms`.
    ///
    /// Returns the verified on-chain id to call the contract with.
    pub fn check_approve(&self, actor: Address, now_ms: i64) -> Result<U256> {
        let id = self.check_actionable(actor)?;
        match self.phase(now_ms) {
            UnlockPhase::RequestPending => {}
            phase => {
                return Err(CoreError::InvalidTransition {
                    action: "approve unlock",
                    phase,
                })
            }
        }
        if self.requested_by == Some(actor) {
            return Err(CoreError::SameParty(actor));
        }
        Ok(id)
    }

    /// Apply a confirmed `requestUnlock` sent by `actor`.
    pub fn record_request(&mut self, actor: Address, tx_hash: B256, now_ms: i64) -> Result<()> {
        self.check_request(actor, now_ms)?;
        self.unlock_requested = true;
        self.requested_by = Some(actor);
        self.request_tx = Some(tx_hash);
        Ok(())
    }

    /// Apply a confirmed `approveUnlock` sent by `actor`.
    pub fn record_approval(&mut self, actor: Address, tx_hash: B256, now_ms: i64) -> Result<()> {
        self.check_approve(actor, now_ms)?;
        self.unlock_approved = true;
        self.is_unlocked = true;
        self.approval_tx = Some(tx_hash);
        Ok(())
    }

    /// Replace an unverified id with the one decoded from the chain.
    pub fn verify(&mut self, consent_id: U256) {
        self.consent_id = ConsentId::Verified(consent_id);
        if self.status == ConsentStatus::Pending {
            self.status = self.settled_status();
        }
    }

    /// Decline the consent locally.
    pub fn reject(&mut self) -> Result<()> {
        if self.is_unlocked {
            return Err(CoreError::InvalidTransition {
                action: "reject",
                phase: UnlockPhase::Unlocked,
            });
        }
        self.status = ConsentStatus::Rejected;
        Ok(())
    }
}
