//! Balance and fee preflight.
//!
//! Run before every value-carrying call so an underfunded account fails
//! locally, before the signer is ever asked to approve anything. The check
//! is advisory: balance and gas price can move between the check and the
//! broadcast, and a broadcast failure for balance reasons is still surfaced
//! as a normal error.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::provider::ChainProvider;
use crate::{ChainError, Result};

/// Numbers a preflight decision was based on, all in wei.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Balance of the sending account.
    pub balance: U256,
    /// Contract fee attached as call value.
    pub fee: U256,
    /// Fixed gas estimate for the call.
    pub gas_estimate: u64,
    /// Gas price at the time of the check.
    pub gas_price: U256,
    /// `gas_estimate * gas_price`, saturating.
    pub gas_cost: U256,
    /// `fee + gas_cost`, saturating.
    pub required_total: U256,
    /// The true total does not fit in 256 bits and can never be covered.
    pub overflow: bool,
}

impl FeeBreakdown {
    /// Compute the breakdown.
    ///
    /// Displayed amounts saturate to `U256::MAX`; an overflowing total is
    /// flagged and always rejected.
    pub fn new(balance: U256, fee: U256, gas_estimate: u64, gas_price: U256) -> Self {
        let gas_cost = U256::from(gas_estimate).checked_mul(gas_price);
        let required_total = gas_cost.and_then(|gas| fee.checked_add(gas));
        Self {
            balance,
            fee,
            gas_estimate,
            gas_price,
            gas_cost: gas_cost.unwrap_or(U256::MAX),
            required_total: required_total.unwrap_or(U256::MAX),
            overflow: required_total.is_none(),
        }
    }

    /// Amount missing, zero when the balance suffices.
    ///
    /// On overflow this is a lower bound of at least one wei.
    pub fn shortfall(&self) -> U256 {
        if self.overflow {
            (U256::MAX - self.balance).saturating_add(U256::from(1u64))
        } else {
            self.required_total.saturating_sub(self.balance)
        }
    }

    /// Whether the balance covers the required total.
    pub fn is_sufficient(&self) -> bool {
        !self.overflow && self.balance >= self.required_total
    }

    /// Turn the breakdown into a decision.
    pub fn check(self) -> Result<Self> {
        if self.is_sufficient() {
            Ok(self)
        } else {
            Err(ChainError::InsufficientBalance {
                shortfall: self.shortfall(),
                breakdown: self,
            })
        }
    }
}

/// Fetch balance and gas price for `address` and check them against
/// `fee + gas_estimate * gas_price`.
pub async fn preflight(
    provider: &dyn ChainProvider,
    address: Address,
    fee: U256,
    gas_estimate: u64,
) -> Result<FeeBreakdown> {
    let balance = provider.balance(address).await?;
    let gas_price = provider.gas_price().await?;
    let breakdown = FeeBreakdown::new(balance, fee, gas_estimate, gas_price);

    debug!(
        %address,
        balance = %breakdown.balance,
        required = %breakdown.required_total,
        "Preflight"
    );

    breakdown.check()
}
