//! Clock abstraction and timestamp validation.
//!
//! All consent times are Unix milliseconds. The service reads time through
//! a [`Clock`] so the lock boundary can be tested exactly.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::{CoreError, Result};

/// Maximum allowed clock skew for timestamps received from the
/// counterparty (5 minutes).
pub const MAX_CLOCK_SKEW_MS: i64 = 5 * 60 * 1000;

/// Minimum valid timestamp (2024-01-01 00:00:00 UTC).
pub const MIN_VALID_TIMESTAMP_MS: i64 = 1_704_067_200_000;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current Unix time in milliseconds.
    fn now_ms(&self) -> i64;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(MIN_VALID_TIMESTAMP_MS)
    }
}

/// Manually driven clock for tests and simulations.
///
/// Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Clock starting at `now_ms`.
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now_ms)),
        }
    }

    /// Jump to `now_ms`.
    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    /// Move forward by `delta_ms`.
    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Convert a block timestamp in Unix seconds to consent milliseconds.
pub fn block_time_ms(block_timestamp: u64) -> i64 {
    i64::try_from(block_timestamp)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000)
}

/// Validate a timestamp supplied by the counterparty against `reference_ms`.
///
/// Rejects timestamps before protocol inception and timestamps further in
/// the future than [`MAX_CLOCK_SKEW_MS`].
pub fn validate_timestamp(timestamp_ms: i64, reference_ms: i64) -> Result<()> {
    if timestamp_ms < MIN_VALID_TIMESTAMP_MS {
        return Err(CoreError::Validation(format!(
            "timestamp {timestamp_ms} is before {MIN_VALID_TIMESTAMP_MS}"
        )));
    }
    if timestamp_ms > reference_ms.saturating_add(MAX_CLOCK_SKEW_MS) {
        return Err(CoreError::Validation(format!(
            "timestamp {timestamp_ms} is in the future (now {reference_ms})"
        )));
    }
    Ok(())
}
