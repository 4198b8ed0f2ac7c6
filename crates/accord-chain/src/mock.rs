//! In-memory consent chain.
//!
//! [`MockChain`] implements [`ChainProvider`] and executes the consent
//! contract's three calls against in-memory state, so the ledger client and
//! everything above it can be driven end to end without a node. It is
//! always compiled so downstream crates can use it in their own tests.
//!
//! Every submitted transaction is mined immediately into its own block,
//! stamped with the chain's current time ([`MockChain::set_timestamp`],
//! [`MockChain::advance_time`]). Failures and delays are injected explicitly:
//!
//! - [`MockChain::fail_next`] makes the next submission revert or error
//! - [`MockChain::set_emit_events`] suppresses `ConsentCreated` logs
//! - [`MockChain::set_receipt_delay`] hides receipts for a number of polls
//! - [`MockChain::set_receipt_errors`] fails a number of receipt lookups

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alloy_primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::abi::{decode_call, encode_revert_reason, ContractCall};
use crate::events::ConsentCreated;
use crate::provider::ChainProvider;
use crate::signer::{KeyVault, WalletSession};
use crate::types::{ChainId, Log, TransactionReceipt, TransactionRequest};
use crate::{ChainError, Result};

/// Gas charged per mined transaction, capped by the transaction's limit.
pub const MOCK_GAS_USED: u64 = 60_000;

/// Default gas price, 1 gwei.
pub const MOCK_GAS_PRICE: u64 = 1_000_000_000;

/// Block time before any adjustment, 2024-01-01T00:00:00Z in Unix seconds.
pub const MOCK_GENESIS_TIMESTAMP: u64 = 1_704_067_200;

/// An injected failure for the next submitted transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockFailure {
    /// Mine the transaction but revert with this reason.
    Revert(String),
    /// Refuse the submission with an RPC error.
    Rpc(String),
}

/// Contract-side record of a consent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockConsent {
    /// Creator.
    pub party1: Address,
    /// Counterparty.
    pub party2: Address,
    /// Value attached to the creation call.
    pub fee_paid: U256,
    /// Who requested the unlock, if anyone.
    pub requested_by: Option<Address>,
    /// Whether the unlock was approved.
    pub approved: bool,
}

/// Wire form of a transaction signed by [`MockKeyVault`].
#[derive(Serialize, Deserialize)]
struct RawTransaction {
    tx: TransactionRequest,
    nonce: u64,
    gas_price: U256,
    signature: Vec<u8>,
}

struct MockState {
    chain_id: ChainId,
    gas_price: U256,
    block_number: u64,
    timestamp: u64,
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    receipts: HashMap<B256, TransactionReceipt>,
    transactions: HashMap<B256, TransactionRequest>,
    hidden_polls: HashMap<B256, u32>,
    receipt_delay: u32,
    receipt_errors: u32,
    next_consent_id: U256,
    consents: HashMap<U256, MockConsent>,
    pending_failure: Option<MockFailure>,
    emit_events: bool,
    submitted: Vec<TransactionRequest>,
}

/// Cheaply cloneable handle to a shared in-memory chain.
#[derive(Clone)]
pub struct MockChain {
    contract: Address,
    state: Arc<Mutex<MockState>>,
}

impl MockChain {
    /// Create a chain hosting the consent contract at `contract`.
    pub fn new(contract: Address) -> Self {
        Self {
            contract,
            state: Arc::new(Mutex::new(MockState {
                chain_id: ChainId::LOCAL,
                gas_price: U256::from(MOCK_GAS_PRICE),
                block_number: 0,
                timestamp: MOCK_GENESIS_TIMESTAMP,
                balances: HashMap::new(),
                nonces: HashMap::new(),
                receipts: HashMap::new(),
                transactions: HashMap::new(),
                hidden_polls: HashMap::new(),
                receipt_delay: 0,
                receipt_errors: 0,
                next_consent_id: U256::from(1u64),
                consents: HashMap::new(),
                pending_failure: None,
                emit_events: true,
                submitted: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Contract address.
    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Set the balance of `address`.
    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state().balances.insert(address, balance);
    }

    /// Current balance of `address`.
    pub fn balance_of(&self, address: Address) -> U256 {
        self.state().balances.get(&address).copied().unwrap_or_default()
    }

    /// Set the gas price.
    pub fn set_gas_price(&self, gas_price: U256) {
        self.state().gas_price = gas_price;
    }

    /// Set the timestamp of the blocks mined from now on, Unix seconds.
    pub fn set_timestamp(&self, secs: u64) {
        self.state().timestamp = secs;
    }

    /// Move the chain clock forward.
    pub fn advance_time(&self, secs: u64) {
        let mut state = self.state();
        state.timestamp = state.timestamp.saturating_add(secs);
    }

    /// Set the identifier the next created consent receives.
    pub fn set_next_consent_id(&self, id: U256) {
        self.state().next_consent_id = id;
    }

    /// Make the next submission fail.
    pub fn fail_next(&self, failure: MockFailure) {
        self.state().pending_failure = Some(failure);
    }

    /// Toggle emission of `ConsentCreated` logs.
    pub fn set_emit_events(&self, emit: bool) {
        self.state().emit_events = emit;
    }

    /// Hide each new receipt for `polls` lookups.
    pub fn set_receipt_delay(&self, polls: u32) {
        self.state().receipt_delay = polls;
    }

    /// Fail the next `count` receipt lookups with an RPC error.
    pub fn set_receipt_errors(&self, count: u32) {
        self.state().receipt_errors = count;
    }

    /// Contract-side record of consent `id`.
    pub fn consent(&self, id: U256) -> Option<MockConsent> {
        self.state().consents.get(&id).cloned()
    }

    /// Every transaction accepted for mining, in order.
    pub fn submitted(&self) -> Vec<TransactionRequest> {
        self.state().submitted.clone()
    }

    /// A wallet session connected as `account`.
    pub fn session(&self, account: Address) -> MockWalletSession {
        MockWalletSession {
            chain: self.clone(),
            account,
        }
    }

    /// A key vault holding the key of `address`.
    pub fn vault(&self, address: Address) -> MockKeyVault {
        MockKeyVault { address }
    }

    /// Accept `tx` and mine it into a new block.
    fn submit(&self, tx: TransactionRequest) -> Result<B256> {
        let mut state = self.state();

        if let Some(MockFailure::Rpc(message)) = state.pending_failure.clone() {
            state.pending_failure = None;
            return Err(ChainError::Rpc(message));
        }

        let gas_used = tx.gas_limit.min(MOCK_GAS_USED);
        let cost = tx
            .value
            .saturating_add(U256::from(gas_used).saturating_mul(state.gas_price));
        let balance = state.balances.get(&tx.from).copied().unwrap_or_default();
        if balance < cost {
            return Err(ChainError::Rpc(format!(
                "insufficient funds for gas * price + value: have {balance} want {cost}"
            )));
        }

        let nonce = state.nonces.entry(tx.from).or_insert(0);
        let tx_nonce = *nonce;
        *nonce += 1;

        let mut preimage = tx.from.to_vec();
        preimage.extend_from_slice(&tx_nonce.to_be_bytes());
        preimage.extend_from_slice(&tx.data);
        let tx_hash = keccak256(&preimage);

        state.block_number += 1;
        let block_number = state.block_number;
        let block_timestamp = state.timestamp;

        let outcome = match state.pending_failure.take() {
            Some(MockFailure::Revert(reason)) => Err(reason),
            _ => execute(&mut state, self.contract, &tx),
        };

        // Gas is paid either way; value only moves on success.
        let gas_cost = U256::from(gas_used).saturating_mul(state.gas_price);
        let charged = match &outcome {
            Ok(_) => cost,
            Err(_) => gas_cost,
        };
        state.balances.insert(tx.from, balance.saturating_sub(charged));
        if outcome.is_ok() && !tx.value.is_zero() {
            let credited = state.balances.entry(tx.to).or_default();
            *credited = credited.saturating_add(tx.value);
        }

        let receipt = match outcome {
            Ok(logs) => TransactionReceipt {
                transaction_hash: tx_hash,
                block_number,
                block_timestamp,
                status: true,
                gas_used,
                logs,
                revert_data: None,
            },
            Err(reason) => TransactionReceipt {
                transaction_hash: tx_hash,
                block_number,
                block_timestamp,
                status: false,
                gas_used,
                logs: Vec::new(),
                revert_data: Some(encode_revert_reason(&reason)),
            },
        };

        let delay = state.receipt_delay;
        if delay > 0 {
            state.hidden_polls.insert(tx_hash, delay);
        }
        state.receipts.insert(tx_hash, receipt);
        state.transactions.insert(tx_hash, tx.clone());
        state.submitted.push(tx);
        Ok(tx_hash)
    }
}

/// Run a call against the contract state. `Err` carries a revert reason.
fn execute(
    state: &mut MockState,
    contract: Address,
    tx: &TransactionRequest,
) -> std::result::Result<Vec<Log>, String> {
    if tx.to != contract {
        return Ok(Vec::new());
    }

    let call = decode_call(&tx.data).map_err(|e| e.to_string())?;
    match call {
        ContractCall::CreateConsent(params) => {
            if params.counterparty == tx.from {
                return Err("counterparty cannot be sender".into());
            }
            if params.counterparty == Address::ZERO {
                return Err("invalid counterparty".into());
            }
            let consent_id = state.next_consent_id;
            state.next_consent_id = consent_id.saturating_add(U256::from(1u64));
            state.consents.insert(
                consent_id,
                MockConsent {
                    party1: tx.from,
                    party2: params.counterparty,
                    fee_paid: tx.value,
                    requested_by: None,
                    approved: false,
                },
            );

            if !state.emit_events {
                return Ok(Vec::new());
            }
            let event = ConsentCreated {
                consent_id,
                party1: tx.from,
                party2: params.counterparty,
            };
            Ok(vec![event.to_log(contract)])
        }
        ContractCall::RequestUnlock(id) => {
            let consent = state.consents.get_mut(&id).ok_or("unknown consent")?;
            if tx.from != consent.party1 && tx.from != consent.party2 {
                return Err("not a party".into());
            }
            if consent.requested_by.is_some() {
                return Err("unlock already requested".into());
            }
            consent.requested_by = Some(tx.from);
            Ok(Vec::new())
        }
        ContractCall::ApproveUnlock(id) => {
            let consent = state.consents.get_mut(&id).ok_or("unknown consent")?;
            if tx.from != consent.party1 && tx.from != consent.party2 {
                return Err("not a party".into());
            }
            match consent.requested_by {
                None => Err("no pending request".into()),
                Some(requester) if requester == tx.from => Err("requester cannot approve".into()),
                Some(_) if consent.approved => Err("already approved".into()),
                Some(_) => {
                    consent.approved = true;
                    Ok(Vec::new())
                }
            }
        }
    }
}

#[async_trait]
impl ChainProvider for MockChain {
    async fn chain_id(&self) -> Result<ChainId> {
        Ok(self.state().chain_id)
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        Ok(self.balance_of(address))
    }

    async fn gas_price(&self) -> Result<U256> {
        Ok(self.state().gas_price)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        Ok(self.state().nonces.get(&address).copied().unwrap_or(0))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256> {
        let decoded: RawTransaction = bincode::deserialize(raw)
            .map_err(|e| ChainError::Rpc(format!("invalid raw transaction: {e}")))?;
        if decoded.signature != mock_signature(decoded.tx.from, &decoded.tx.data) {
            return Err(ChainError::Rpc("invalid signature".into()));
        }
        let expected = self.transaction_count(decoded.tx.from).await?;
        if decoded.nonce != expected {
            return Err(ChainError::Rpc(format!(
                "nonce mismatch: expected {expected}, got {}",
                decoded.nonce
            )));
        }
        self.submit(decoded.tx)
    }

    async fn transaction(&self, tx_hash: B256) -> Result<Option<TransactionRequest>> {
        Ok(self.state().transactions.get(&tx_hash).cloned())
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TransactionReceipt>> {
        let mut state = self.state();
        if state.receipt_errors > 0 {
            state.receipt_errors -= 1;
            return Err(ChainError::Rpc("receipt lookup failed".into()));
        }
        if let Some(remaining) = state.hidden_polls.get_mut(&tx_hash) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(None);
            }
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }
}

fn mock_signature(signer: Address, payload: &[u8]) -> Vec<u8> {
    let mut preimage = signer.to_vec();
    preimage.extend_from_slice(payload);
    keccak256(&preimage).to_vec()
}

/// Key vault for a [`MockChain`] account.
#[derive(Clone, Debug)]
pub struct MockKeyVault {
    address: Address,
}

#[async_trait]
impl KeyVault for MockKeyVault {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_transaction(
        &self,
        tx: &TransactionRequest,
        nonce: u64,
        gas_price: U256,
    ) -> Result<Vec<u8>> {
        if tx.from != self.address {
            return Err(ChainError::Signer(format!(
                "vault holds {} but transaction is from {}",
                self.address, tx.from
            )));
        }
        let raw = RawTransaction {
            tx: tx.clone(),
            nonce,
            gas_price,
            signature: mock_signature(self.address, &tx.data),
        };
        bincode::serialize(&raw).map_err(|e| ChainError::Signer(e.to_string()))
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(mock_signature(self.address, message))
    }
}

/// Wallet session connected to a [`MockChain`] account.
#[derive(Clone)]
pub struct MockWalletSession {
    chain: MockChain,
    account: Address,
}

#[async_trait]
impl WalletSession for MockWalletSession {
    fn account(&self) -> Address {
        self.account
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256> {
        if tx.from != self.account {
            return Err(ChainError::Signer(format!(
                "session is connected as {} but transaction is from {}",
                self.account, tx.from
            )));
        }
        self.chain.submit(tx)
    }

    async fn personal_sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(mock_signature(self.account, message))
    }
}
