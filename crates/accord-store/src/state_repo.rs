//! Persistence for application state.
//!
//! A [`StateRepository`] loads and saves one serializable snapshot. The
//! sled implementation keeps it as a single bincode value; the in-memory
//! one serializes too, so both reject the same unserializable state.

use std::marker::PhantomData;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Result, StoreError};

/// Tree name for application state.
const STATE_TREE: &str = "app_state";

/// Key of the snapshot inside [`STATE_TREE`].
const SNAPSHOT_KEY: &[u8] = b"snapshot";

/// Load/save access to a state snapshot of type `T`.
pub trait StateRepository<T>: Send + Sync {
    /// Load the last saved snapshot, if any.
    fn load(&self) -> Result<Option<T>>;

    /// Replace the saved snapshot.
    fn save(&self, state: &T) -> Result<()>;
}

fn encode<T: Serialize>(state: &T) -> Result<Vec<u8>> {
    bincode::serialize(state)
        .map_err(|e| StoreError::Serialization(format!("Failed to serialize state: {}", e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| StoreError::Serialization(format!("Failed to deserialize state: {}", e)))
}

/// Snapshot stored in a sled tree.
pub struct SledRepository<T> {
    tree: sled::Tree,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SledRepository<T> {
    /// Open the state tree of `db`.
    pub fn new(db: &sled::Db) -> Result<Self> {
        let tree = db
            .open_tree(STATE_TREE)
            .map_err(|e| StoreError::Database(format!("Failed to open state tree: {}", e)))?;
        Ok(Self {
            tree,
            _marker: PhantomData,
        })
    }
}

impl<T: Serialize + DeserializeOwned> StateRepository<T> for SledRepository<T> {
    fn load(&self) -> Result<Option<T>> {
        self.tree
            .get(SNAPSHOT_KEY)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn save(&self, state: &T) -> Result<()> {
        self.tree.insert(SNAPSHOT_KEY, encode(state)?)?;
        self.tree.flush()?;
        Ok(())
    }
}

/// Snapshot held in memory.
pub struct MemoryRepository<T> {
    snapshot: Mutex<Option<Vec<u8>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> MemoryRepository<T> {
    /// Empty repository.
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(None),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> StateRepository<T> for MemoryRepository<T> {
    fn load(&self) -> Result<Option<T>> {
        let snapshot = self
            .snapshot
            .lock()
            .map_err(|_| StoreError::Database("state lock poisoned".into()))?;
        snapshot.as_deref().map(decode).transpose()
    }

    fn save(&self, state: &T) -> Result<()> {
        let bytes = encode(state)?;
        *self
            .snapshot
            .lock()
            .map_err(|_| StoreError::Database("state lock poisoned".into()))? = Some(bytes);
        Ok(())
    }
}
