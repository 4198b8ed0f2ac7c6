//! Handle directory lookups.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use alloy_primitives::Address;
use async_trait::async_trait;

use crate::Result;

/// A directory entry for one user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedHandle {
    /// Wallet address.
    pub address: Address,
    /// Device public key, if the user published one.
    pub device_public_key: Option<Vec<u8>>,
}

/// Resolves handles to wallet addresses and device public keys.
///
/// `Ok(None)` means the directory has no entry; errors are transport
/// failures.
#[async_trait]
pub trait HandleResolver: Send + Sync {
    /// Look up `handle`.
    async fn resolve(&self, handle: &str) -> Result<Option<ResolvedHandle>>;

    /// Device public key published for `address`.
    async fn device_public_key(&self, address: Address) -> Result<Option<Vec<u8>>>;
}

/// In-memory directory.
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: Mutex<HashMap<String, ResolvedHandle>>,
}

impl StaticResolver {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry.
    pub fn insert(&self, handle: impl Into<String>, address: Address, device_public_key: Option<Vec<u8>>) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).insert(
            normalize(&handle.into()),
            ResolvedHandle {
                address,
                device_public_key,
            },
        );
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(self, handle: impl Into<String>, address: Address, device_public_key: Option<Vec<u8>>) -> Self {
        self.insert(handle, address, device_public_key);
        self
    }
}

fn normalize(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}

#[async_trait]
impl HandleResolver for StaticResolver {
    async fn resolve(&self, handle: &str) -> Result<Option<ResolvedHandle>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize(handle))
            .cloned())
    }

    async fn device_public_key(&self, address: Address) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|entry| entry.address == address)
            .and_then(|entry| entry.device_public_key.clone()))
    }
}
