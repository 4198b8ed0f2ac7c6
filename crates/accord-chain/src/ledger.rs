//! Ledger client for the consent contract.
//!
//! Every write follows the same path: build calldata, hand the transaction
//! to the [`Signer`], poll for the receipt, then turn a reverted receipt into
//! [`ChainError::TransactionReverted`]. Creation additionally runs the
//! balance preflight first and decodes `ConsentCreated` afterwards.
//!
//! A broadcast transaction cannot be retracted. When waiting times out the
//! caller gets [`ChainError::ReceiptTimeout`] and the transaction may still
//! land later.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::abi::{self, decode_call, decode_revert_reason, ContractCall};
use crate::events::{find_consent_created, ConsentCreated, ConsentId};
use crate::preflight::{preflight, FeeBreakdown};
use crate::provider::ChainProvider;
use crate::signer::Signer;
use crate::types::{ChainId, CreateConsentParams, TransactionReceipt, TransactionRequest};
use crate::{ChainError, Result};

/// Default fixed gas estimate for `createConsent`.
pub const DEFAULT_CREATE_GAS_ESTIMATE: u64 = 300_000;

/// Default gas limit for the unlock calls.
pub const DEFAULT_CALL_GAS_LIMIT: u64 = 120_000;

/// What to do when a successful creation receipt carries no decodable
/// `ConsentCreated` event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFallbackPolicy {
    /// Derive an unverified id from the transaction hash and log an anomaly.
    #[default]
    PseudoId,
    /// Fail with [`ChainError::EventDecoding`].
    Reject,
}

/// Tunables for [`LedgerClient`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerOptions {
    /// Chain transactions are built for.
    pub chain_id: ChainId,
    /// Fixed gas estimate used by the preflight and as the creation gas limit.
    pub create_gas_estimate: u64,
    /// Gas limit for `requestUnlock` and `approveUnlock`.
    pub call_gas_limit: u64,
    /// Delay between receipt lookups.
    pub poll_interval: Duration,
    /// Give up waiting for a receipt after this long.
    pub receipt_timeout: Duration,
    /// Missing-event behaviour.
    pub fallback: EventFallbackPolicy,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            chain_id: ChainId::LOCAL,
            create_gas_estimate: DEFAULT_CREATE_GAS_ESTIMATE,
            call_gas_limit: DEFAULT_CALL_GAS_LIMIT,
            poll_interval: Duration::from_secs(2),
            receipt_timeout: Duration::from_secs(120),
            fallback: EventFallbackPolicy::default(),
        }
    }
}

/// Outcome of a confirmed `createConsent`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedConsent {
    /// Identifier, verified from the event or derived by the fallback.
    pub consent_id: ConsentId,
    /// Creation transaction.
    pub tx_hash: B256,
    /// Block the transaction landed in.
    pub block_number: u64,
    /// Timestamp of that block, Unix seconds.
    pub block_timestamp: u64,
    /// `(party1, party2)` from the event; `None` on the fallback path.
    pub parties: Option<(Address, Address)>,
    /// Preflight numbers the submission was based on.
    pub fees: FeeBreakdown,
}

/// A confirmed non-payable call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    /// Transaction hash.
    pub tx_hash: B256,
    /// Block the transaction landed in.
    pub block_number: u64,
    /// Timestamp of that block, Unix seconds.
    pub block_timestamp: u64,
    /// Gas consumed.
    pub gas_used: u64,
}

impl From<&TransactionReceipt> for Confirmation {
    fn from(receipt: &TransactionReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            block_timestamp: receipt.block_timestamp,
            gas_used: receipt.gas_used,
        }
    }
}

/// A confirmed call to the consent contract, looked up by hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmedCall {
    /// Sender of the transaction.
    pub from: Address,
    /// Decoded call.
    pub call: ContractCall,
    /// `ConsentCreated` emitted by the call, if any.
    pub created: Option<ConsentCreated>,
    /// Inclusion details.
    pub confirmation: Confirmation,
}

/// Client for one consent contract, acting as one signer.
pub struct LedgerClient {
    signer: Arc<dyn Signer>,
    provider: Arc<dyn ChainProvider>,
    contract: Address,
    options: LedgerOptions,
}

impl LedgerClient {
    /// Create a client.
    pub fn new(
        signer: Arc<dyn Signer>,
        provider: Arc<dyn ChainProvider>,
        contract: Address,
        options: LedgerOptions,
    ) -> Self {
        Self {
            signer,
            provider,
            contract,
            options,
        }
    }

    /// Address transactions are sent from.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Contract address.
    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Client options.
    pub fn options(&self) -> &LedgerOptions {
        &self.options
    }

    /// Confirm the provider is on the configured chain.
    pub async fn verify_chain(&self) -> Result<()> {
        let actual = self.provider.chain_id().await?;
        if actual != self.options.chain_id {
            return Err(ChainError::Validation(format!(
                "provider is on chain {actual}, expected {}",
                self.options.chain_id
            )));
        }
        Ok(())
    }

    /// Run the creation preflight without submitting anything.
    pub async fn preflight_create(&self, fee: U256) -> Result<FeeBreakdown> {
        preflight(
            self.provider.as_ref(),
            self.address(),
            fee,
            self.options.create_gas_estimate,
        )
        .await
    }

    /// Create a consent, attaching `fee` wei.
    ///
    /// Fails with [`ChainError::InsufficientBalance`] before the signer is
    /// involved when the account cannot cover `fee` plus estimated gas.
    pub async fn create_consent(
        &self,
        params: &CreateConsentParams,
        fee: U256,
    ) -> Result<CreatedConsent> {
        let from = self.address();
        params.validate(from)?;
        let fees = self.preflight_create(fee).await?;

        let tx = TransactionRequest {
            from,
            to: self.contract,
            data: abi::encode_create_consent(params),
            value: fee,
            gas_limit: self.options.create_gas_estimate,
            chain_id: self.options.chain_id,
        };
        let tx_hash = self.signer.send_transaction(tx).await?;
        info!(%tx_hash, counterparty = %params.counterparty, %fee, "Submitted createConsent");

        let receipt = self.confirm(tx_hash).await?;

        let decoded = find_consent_created(&receipt, self.contract);
        let consent_id = match decoded {
            Ok(Some(event)) => {
                if event.party1 != from || event.party2 != params.counterparty {
                    warn!(
                        anomaly = "consent_parties_mismatch",
                        %tx_hash,
                        party1 = %event.party1,
                        party2 = %event.party2,
                        "ConsentCreated parties differ from the submitted call"
                    );
                }
                info!(consent_id = %event.consent_id, %tx_hash, "Consent created");
                return Ok(CreatedConsent {
                    consent_id: ConsentId::Verified(event.consent_id),
                    tx_hash,
                    block_number: receipt.block_number,
                    block_timestamp: receipt.block_timestamp,
                    parties: Some((event.party1, event.party2)),
                    fees,
                });
            }
            Ok(None) => self.fallback(tx_hash, "no ConsentCreated log from the contract".into())?,
            Err(e) => self.fallback(tx_hash, e.to_string())?,
        };

        Ok(CreatedConsent {
            consent_id,
            tx_hash,
            block_number: receipt.block_number,
            block_timestamp: receipt.block_timestamp,
            parties: None,
            fees,
        })
    }

    fn fallback(&self, tx_hash: B256, reason: String) -> Result<ConsentId> {
        match self.options.fallback {
            EventFallbackPolicy::PseudoId => {
                let id = ConsentId::unverified(tx_hash);
                warn!(
                    anomaly = "consent_event_missing",
                    %tx_hash,
                    pseudo_id = %id.value(),
                    %reason,
                    "Using an unverified consent id derived from the transaction hash"
                );
                Ok(id)
            }
            EventFallbackPolicy::Reject => {
                error!(anomaly = "consent_event_missing", %tx_hash, %reason, "ConsentCreated not decodable");
                Err(ChainError::EventDecoding { tx_hash, reason })
            }
        }
    }

    /// Request the unlock of `consent_id`.
    pub async fn request_unlock(&self, consent_id: U256) -> Result<Confirmation> {
        let data = abi::encode_request_unlock(consent_id);
        let confirmation = self.call(data).await?;
        info!(%consent_id, tx_hash = %confirmation.tx_hash, "Unlock requested");
        Ok(confirmation)
    }

    /// Approve a pending unlock of `consent_id`.
    pub async fn approve_unlock(&self, consent_id: U256) -> Result<Confirmation> {
        let data = abi::encode_approve_unlock(consent_id);
        let confirmation = self.call(data).await?;
        info!(%consent_id, tx_hash = %confirmation.tx_hash, "Unlock approved");
        Ok(confirmation)
    }

    async fn call(&self, data: Vec<u8>) -> Result<Confirmation> {
        let tx = TransactionRequest {
            from: self.address(),
            to: self.contract,
            data,
            value: U256::ZERO,
            gas_limit: self.options.call_gas_limit,
            chain_id: self.options.chain_id,
        };
        let tx_hash = self.signer.send_transaction(tx).await?;
        let receipt = self.confirm(tx_hash).await?;
        Ok(Confirmation::from(&receipt))
    }

    /// Wait for the receipt and reject reverted transactions.
    async fn confirm(&self, tx_hash: B256) -> Result<TransactionReceipt> {
        let receipt = self.wait_for_receipt(tx_hash).await?;
        if !receipt.status {
            let reason = receipt.revert_data.as_deref().and_then(decode_revert_reason);
            warn!(%tx_hash, reason = reason.as_deref().unwrap_or(""), "Transaction reverted");
            return Err(ChainError::TransactionReverted { tx_hash, reason });
        }
        Ok(receipt)
    }

    /// Poll until the receipt of `tx_hash` is available.
    ///
    /// Lookup errors are logged and polling continues; only the overall
    /// timeout ends the wait.
    pub async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TransactionReceipt> {
        let waited = self.options.receipt_timeout;
        let poll = async {
            loop {
                match self.provider.transaction_receipt(tx_hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => debug!(%tx_hash, "Receipt not available yet"),
                    Err(e) => warn!(%tx_hash, error = %e, "Receipt lookup failed, retrying"),
                }
                tokio::time::sleep(self.options.poll_interval).await;
            }
        };

        tokio::time::timeout(waited, poll)
            .await
            .map_err(|_| ChainError::ReceiptTimeout { tx_hash, waited })
    }

    /// Look up a transaction someone else sent to the contract.
    ///
    /// Succeeds only for transactions that were mined successfully and
    /// target this contract. Used to reconcile local state with calls made
    /// by the counterparty.
    pub async fn lookup_call(&self, tx_hash: B256) -> Result<ConfirmedCall> {
        let tx = self
            .provider
            .transaction(tx_hash)
            .await?
            .ok_or_else(|| ChainError::Validation(format!("unknown transaction {tx_hash}")))?;
        if tx.to != self.contract {
            return Err(ChainError::Validation(format!(
                "transaction {tx_hash} targets {}, not the consent contract",
                tx.to
            )));
        }

        let receipt = self
            .provider
            .transaction_receipt(tx_hash)
            .await?
            .ok_or_else(|| ChainError::Validation(format!("transaction {tx_hash} is not mined yet")))?;
        if !receipt.status {
            let reason = receipt.revert_data.as_deref().and_then(decode_revert_reason);
            return Err(ChainError::TransactionReverted { tx_hash, reason });
        }

        let call = decode_call(&tx.data)?;
        let created = find_consent_created(&receipt, self.contract)?;
        debug!(%tx_hash, from = %tx.from, "Looked up contract call");

        Ok(ConfirmedCall {
            from: tx.from,
            call,
            created,
            confirmation: Confirmation::from(&receipt),
        })
    }
}
