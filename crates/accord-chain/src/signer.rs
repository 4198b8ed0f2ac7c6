//! Transaction signing capability.
//!
//! The ledger client never sees key material. It hands an unsigned
//! [`TransactionRequest`] to a [`Signer`] and gets a transaction hash back.
//! Two policies exist:
//!
//! - [`LocalKeySigner`]: the key lives in a device [`KeyVault`]; the vault
//!   signs, the provider broadcasts the raw bytes.
//! - [`ExternalSessionSigner`]: a connected wallet ([`WalletSession`]) signs
//!   and broadcasts on its own.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use tracing::debug;

use crate::provider::ChainProvider;
use crate::types::TransactionRequest;
use crate::Result;

/// Which signing policy a [`Signer`] implements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignerKind {
    /// Device-held key behind a vault.
    LocalKey,
    /// External wallet session.
    ExternalSession,
}

impl fmt::Display for SignerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalKey => write!(f, "local-key"),
            Self::ExternalSession => write!(f, "external-session"),
        }
    }
}

/// Something that can get a transaction signed and broadcast.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Address transactions are sent from.
    fn address(&self) -> Address;

    /// Signing policy.
    fn kind(&self) -> SignerKind;

    /// Sign and broadcast `tx`, returning its hash.
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256>;

    /// Sign an arbitrary message.
    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Device key store. Signs on request and never exports the key.
#[async_trait]
pub trait KeyVault: Send + Sync {
    /// Address of the held key.
    fn address(&self) -> Address;

    /// Produce a signed, broadcastable raw transaction.
    async fn sign_transaction(
        &self,
        tx: &TransactionRequest,
        nonce: u64,
        gas_price: U256,
    ) -> Result<Vec<u8>>;

    /// Sign an arbitrary message.
    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// A connected external wallet that signs and broadcasts by itself.
#[async_trait]
pub trait WalletSession: Send + Sync {
    /// Account the session is connected with.
    fn account(&self) -> Address;

    /// Ask the wallet to sign and send `tx`; resolves to the transaction hash.
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256>;

    /// Ask the wallet for a personal-message signature.
    async fn personal_sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Signs with a [`KeyVault`] and broadcasts through a [`ChainProvider`].
pub struct LocalKeySigner {
    vault: Arc<dyn KeyVault>,
    provider: Arc<dyn ChainProvider>,
}

impl LocalKeySigner {
    /// Create a signer over `vault`, broadcasting via `provider`.
    pub fn new(vault: Arc<dyn KeyVault>, provider: Arc<dyn ChainProvider>) -> Self {
        Self { vault, provider }
    }
}

impl fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("address", &self.vault.address())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Signer for LocalKeySigner {
    fn address(&self) -> Address {
        self.vault.address()
    }

    fn kind(&self) -> SignerKind {
        SignerKind::LocalKey
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256> {
        let nonce = self.provider.transaction_count(tx.from).await?;
        let gas_price = self.provider.gas_price().await?;
        let raw = self.vault.sign_transaction(&tx, nonce, gas_price).await?;
        let tx_hash = self.provider.send_raw_transaction(&raw).await?;
        debug!(%tx_hash, nonce, "Broadcast locally signed transaction");
        Ok(tx_hash)
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.vault.sign_message(message).await
    }
}

/// Delegates to a connected [`WalletSession`].
pub struct ExternalSessionSigner {
    session: Arc<dyn WalletSession>,
}

impl ExternalSessionSigner {
    /// Wrap a wallet session.
    pub fn new(session: Arc<dyn WalletSession>) -> Self {
        Self { session }
    }
}

impl fmt::Debug for ExternalSessionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalSessionSigner")
            .field("account", &self.session.account())
            .finish()
    }
}

#[async_trait]
impl Signer for ExternalSessionSigner {
    fn address(&self) -> Address {
        self.session.account()
    }

    fn kind(&self) -> SignerKind {
        SignerKind::ExternalSession
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256> {
        let tx_hash = self.session.send_transaction(tx).await?;
        debug!(%tx_hash, "Wallet session returned transaction hash");
        Ok(tx_hash)
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.session.personal_sign(message).await
    }
}
