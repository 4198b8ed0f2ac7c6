//! Encrypted per-consent message store.
//!
//! Messages are sealed with the consent's session key before they touch
//! disk. Two sled trees hold them:
//!
//! - `messages`: message id → bincode [`StoredMessage`]
//! - `messages_by_consent`: ordering key → message id
//!
//! The ordering key is
//!
//! ```text
//! u32 BE len(consent_id) || consent_id || timestamp (sign-flipped u64 BE) || sequence u64 BE
//! ```
//!
//! so a prefix scan over one consent yields its messages in ascending
//! timestamp order, with equal timestamps kept in insertion order by the
//! sled-generated sequence. Row and index entry are written in one sled
//! transaction.
//!
//! Messages are immutable. The only deletion is [`MessageStore::clear`],
//! which removes every message of a consent and cannot be undone.

use std::path::Path;

use accord_crypto::{decrypt, encrypt, CryptoError, Nonce, SymmetricKey};
use alloy_primitives::Address;
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use tracing::{debug, warn};

use crate::{Result, StoreError};

/// Tree name for message rows.
const MESSAGES_TREE: &str = "messages";

/// Tree name for the per-consent ordering index.
const INDEX_TREE: &str = "messages_by_consent";

/// Unique identifier for a message.
///
/// Generated from OS randomness.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub [u8; 16]);

impl MessageId {
    /// Generate a new random message ID.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create a MessageId from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 16 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 16] = bytes.try_into().map_err(|_| {
            StoreError::Corruption(format!(
                "Invalid MessageId length: expected 16, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes of this ID.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Format as hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageId({}...)", &self.to_hex()[..8])
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A sealed message as persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Unique message identifier.
    pub id: MessageId,
    /// Consent the message belongs to.
    pub consent_id: String,
    /// Sending wallet address.
    pub sender: Address,
    /// Ciphertext including the authentication tag.
    pub encrypted_data: Vec<u8>,
    /// Nonce the message was sealed with.
    pub nonce: Nonce,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
}

/// A message opened with the session key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptedMessage {
    /// Unique message identifier.
    pub id: MessageId,
    /// Consent the message belongs to.
    pub consent_id: String,
    /// Sending wallet address.
    pub sender: Address,
    /// Plaintext body.
    pub plaintext: Vec<u8>,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
}

impl DecryptedMessage {
    /// Body as UTF-8 text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.plaintext).ok()
    }
}

/// Order-preserving encoding of a signed timestamp.
fn timestamp_key(timestamp: i64) -> [u8; 8] {
    ((timestamp as u64) ^ (1 << 63)).to_be_bytes()
}

/// Index prefix shared by every entry of one consent.
fn consent_prefix(consent_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(4 + consent_id.len());
    prefix.extend_from_slice(&(consent_id.len() as u32).to_be_bytes());
    prefix.extend_from_slice(consent_id.as_bytes());
    prefix
}

fn index_key(consent_id: &str, timestamp: i64, sequence: u64) -> Vec<u8> {
    let mut key = consent_prefix(consent_id);
    key.extend_from_slice(&timestamp_key(timestamp));
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

fn map_transaction_error(e: TransactionError<StoreError>) -> StoreError {
    match e {
        TransactionError::Abort(inner) => inner,
        TransactionError::Storage(storage) => StoreError::from(storage),
    }
}

/// Persistent, encrypted, per-consent message log.
pub struct MessageStore {
    db: sled::Db,
    messages: sled::Tree,
    index: sled::Tree,
}

impl MessageStore {
    /// Create a message store using the given database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database trees cannot be opened.
    pub fn new(db: &sled::Db) -> Result<Self> {
        let messages = db
            .open_tree(MESSAGES_TREE)
            .map_err(|e| StoreError::Database(format!("Failed to open messages tree: {}", e)))?;

        let index = db
            .open_tree(INDEX_TREE)
            .map_err(|e| StoreError::Database(format!("Failed to open index tree: {}", e)))?;

        Ok(Self {
            db: db.clone(),
            messages,
            index,
        })
    }

    /// Open (or create) a store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let db = sled::open(path)?;
        Self::new(&db)
    }

    /// In-memory store that is discarded on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::new(&db)
    }

    /// Seal `plaintext` under `key` and append it, stamped with the current time.
    pub fn append(
        &self,
        consent_id: &str,
        sender: Address,
        key: &SymmetricKey,
        plaintext: &[u8],
    ) -> Result<StoredMessage> {
        self.append_at(consent_id, sender, key, plaintext, Utc::now().timestamp_millis())
    }

    /// Seal `plaintext` under `key` and append it with an explicit timestamp.
    ///
    /// A fresh random nonce is drawn for every message.
    pub fn append_at(
        &self,
        consent_id: &str,
        sender: Address,
        key: &SymmetricKey,
        plaintext: &[u8],
        timestamp: i64,
    ) -> Result<StoredMessage> {
        let sealed = encrypt(key, plaintext, None)?;
        let message = StoredMessage {
            id: MessageId::generate(),
            consent_id: consent_id.to_string(),
            sender,
            encrypted_data: sealed.ciphertext,
            nonce: sealed.nonce,
            timestamp,
        };

        let row = bincode::serialize(&message).map_err(|e| {
            StoreError::Serialization(format!("Failed to serialize message: {}", e))
        })?;
        let sequence = self.db.generate_id()?;
        let key = index_key(consent_id, timestamp, sequence);
        let id = message.id.as_bytes();

        (&self.messages, &self.index)
            .transaction(|(messages, index)| {
                messages.insert(&id[..], row.as_slice())?;
                index.insert(key.as_slice(), &id[..])?;
                Ok::<_, ConflictableTransactionError<StoreError>>(())
            })
            .map_err(map_transaction_error)?;

        debug!(consent_id, message_id = %message.id, timestamp, "Message appended");
        Ok(message)
    }

    /// All sealed rows of a consent, oldest first.
    pub fn rows(&self, consent_id: &str) -> Result<Vec<StoredMessage>> {
        let mut rows = Vec::new();

        for entry in self.index.scan_prefix(consent_prefix(consent_id)) {
            let (entry_key, id) = entry
                .map_err(|e| StoreError::Database(format!("Failed to iterate index: {}", e)))?;

            let row = match self.messages.get(&id)? {
                Some(row) => row,
                None => {
                    warn!(
                        anomaly = "message_index_dangling",
                        consent_id,
                        entry_key = ?entry_key,
                        "Index entry without a message row"
                    );
                    continue;
                }
            };

            match bincode::deserialize::<StoredMessage>(&row) {
                Ok(message) => rows.push(message),
                Err(e) => warn!(
                    anomaly = "message_row_corrupt",
                    consent_id,
                    error = %e,
                    "Skipping undecodable message row"
                ),
            }
        }

        Ok(rows)
    }

    /// Open every message of a consent with `key`, oldest first.
    ///
    /// Rows that fail authentication are skipped and logged; they never
    /// surface as corrupted plaintext.
    pub fn read(&self, consent_id: &str, key: &SymmetricKey) -> Result<Vec<DecryptedMessage>> {
        let mut opened = Vec::new();

        for message in self.rows(consent_id)? {
            match decrypt(key, &message.encrypted_data, &message.nonce) {
                Ok(plaintext) => opened.push(DecryptedMessage {
                    id: message.id,
                    consent_id: message.consent_id,
                    sender: message.sender,
                    plaintext,
                    timestamp: message.timestamp,
                }),
                Err(CryptoError::AuthenticationFailed) => warn!(
                    anomaly = "message_auth_failed",
                    consent_id,
                    message_id = %message.id,
                    "Skipping message that failed authentication"
                ),
                Err(e) => return Err(e.into()),
            }
        }

        Ok(opened)
    }

    /// Number of messages in a consent not sent by `self_address`.
    pub fn unread_count(&self, consent_id: &str, self_address: Address) -> Result<usize> {
        Ok(self
            .rows(consent_id)?
            .iter()
            .filter(|m| m.sender != self_address)
            .count())
    }

    /// Number of messages stored for a consent.
    pub fn count(&self, consent_id: &str) -> Result<usize> {
        Ok(self.index.scan_prefix(consent_prefix(consent_id)).count())
    }

    /// Irreversibly delete every message of a consent.
    ///
    /// Returns how many messages were removed.
    pub fn clear(&self, consent_id: &str) -> Result<usize> {
        let mut entries = Vec::new();
        for entry in self.index.scan_prefix(consent_prefix(consent_id)) {
            let (key, id) = entry
                .map_err(|e| StoreError::Database(format!("Failed to iterate index: {}", e)))?;
            entries.push((key, id));
        }

        (&self.messages, &self.index)
            .transaction(|(messages, index)| {
                for (key, id) in &entries {
                    messages.remove(id.clone())?;
                    index.remove(key.clone())?;
                }
                Ok::<_, ConflictableTransactionError<StoreError>>(())
            })
            .map_err(map_transaction_error)?;

        debug!(consent_id, removed = entries.len(), "Messages cleared");
        Ok(entries.len())
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
