//! Read and broadcast access to an EVM node.

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::types::{ChainId, TransactionReceipt, TransactionRequest};
use crate::Result;

/// Node access used by the ledger client and the local-key signer.
///
/// Implementations map transport failures to [`ChainError::Rpc`](crate::ChainError::Rpc).
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Chain the node is connected to.
    async fn chain_id(&self) -> Result<ChainId>;

    /// Balance of `address` in wei.
    async fn balance(&self, address: Address) -> Result<U256>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> Result<U256>;

    /// Next nonce for `address`.
    async fn transaction_count(&self, address: Address) -> Result<u64>;

    /// Broadcast a signed transaction and return its hash.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256>;

    /// The transaction behind `tx_hash`, if the node knows it.
    async fn transaction(&self, tx_hash: B256) -> Result<Option<TransactionRequest>>;

    /// Receipt for `tx_hash`, or `None` while it is still pending.
    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TransactionReceipt>>;
}
