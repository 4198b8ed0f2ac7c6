//! Single-flight guard for mutating operations.
//!
//! A transaction cannot be retracted once broadcast, so two overlapping
//! unlock calls for the same consent must never both reach the signer.
//! [`InFlight::acquire`] hands out a [`FlightGuard`] per key; a second
//! caller for a held key is turned away with [`CoreError::InFlight`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::{CoreError, Result};

/// Registry of keys with an operation running.
#[derive(Clone, Debug, Default)]
pub struct InFlight {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` busy until the returned guard is dropped.
    pub fn acquire(&self, key: impl Into<String>) -> Result<FlightGuard> {
        let key = key.into();
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        if !keys.insert(key.clone()) {
            return Err(CoreError::InFlight(key));
        }
        Ok(FlightGuard {
            keys: Arc::clone(&self.keys),
            key,
        })
    }

    /// Whether `key` is currently held.
    pub fn is_busy(&self, key: &str) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

/// Releases its key on drop.
#[derive(Debug)]
pub struct FlightGuard {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl FlightGuard {
    /// The held key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
