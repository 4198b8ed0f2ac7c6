//! Application state owned by the consent service.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::consent::Consent;
use crate::request::ConsentRequest;

/// The local user's profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    /// Wallet address used for signing.
    pub address: Address,
    /// Public handle.
    pub handle: String,
    /// Device public key used for chat key agreement.
    pub device_public_key: Vec<u8>,
}

/// Everything the service persists between runs.
///
/// Messages live in the message store, not here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppState {
    /// Local profile.
    pub identity: LocalIdentity,
    /// Tracked consents by local id.
    pub consents: BTreeMap<String, Consent>,
    /// Incoming requests by request id.
    pub requests: BTreeMap<String, ConsentRequest>,
}

impl AppState {
    /// Empty state for `identity`.
    pub fn new(identity: LocalIdentity) -> Self {
        Self {
            identity,
            consents: BTreeMap::new(),
            requests: BTreeMap::new(),
        }
    }

    /// Consent tracked under the on-chain key `key`.
    pub fn consent_by_key(&self, key: &str) -> Option<&Consent> {
        self.consents.values().find(|c| c.key() == key)
    }

    /// Whether a consent created by `creation_tx` is already tracked.
    pub fn has_creation_tx(&self, creation_tx: alloy_primitives::B256) -> bool {
        self.consents.values().any(|c| c.creation_tx == creation_tx)
    }
}
