//! Store-backed row locks
//!
//! The lock of a row is the cell (`_sanddirty`, `_TID`) in the overlay table.
//! Its existence means an operation is mid-flight on that row; its value is
//! the holder's [`TransactionId`].
//!
//! # Protocol
//!
//! ```text
//! acquire: check_and_put(lock absent, put lock = tid)      retried with a fixed sleep
//! release: check_and_delete(lock == tid, delete lock)      never removes another holder's lock
//! ```
//!
//! Writes that do not need the lock themselves (plain puts, deletes, row
//! mutations) still must not land while an operation holds it. They go through
//! [`mutate_when_unlocked`], a check-and-mutate guarded by lock absence that is
//! retried with the same budget.

use std::time::Duration;

use tracing::{debug, warn};

use overlay_core::layout::{DIRTY_FAMILY, LOCK_QUALIFIER};
use overlay_core::{to_string_binary, Check, Delete, Error, Put, Result, RowMutations, Store};

use crate::sleeper::Sleeper;
use crate::txn_id::TransactionId;

/// Retry budget for row lock acquisition
///
/// # Example
/// ```ignore
/// let config = LockConfig::new()
///     .with_max_attempts(50)
///     .with_retry_interval(Duration::from_millis(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// Compare-and-swap attempts before giving up (at least 1)
    pub max_attempts: u32,
    /// Sleep between attempts
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_attempts: 300,
            retry_interval: Duration::from_millis(1),
        }
    }
}

impl LockConfig {
    /// Create a LockConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the sleep between attempts
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

fn lock_check(row: &[u8]) -> Check {
    Check::absent(row, DIRTY_FAMILY, LOCK_QUALIFIER)
}

/// Run `attempt` until it reports success or the budget is spent
fn retry_until<F>(row: &[u8], config: &LockConfig, sleeper: &dyn Sleeper, mut attempt: F) -> Result<u32>
where
    F: FnMut() -> Result<bool>,
{
    let budget = config.attempts();
    for n in 1..=budget {
        if attempt()? {
            return Ok(n);
        }
        if n < budget {
            sleeper.sleep(config.retry_interval);
        }
    }
    warn!(
        target: "overlay::lock",
        row = %to_string_binary(row),
        attempts = budget,
        "Row lock budget exhausted"
    );
    Err(Error::RowLockTimeout {
        row: to_string_binary(row),
        attempts: budget,
    })
}

/// Acquire the lock of `row` for `transaction_id`
///
/// # Errors
///
/// Returns [`Error::RowLockTimeout`] when every attempt found the lock held,
/// or the store error of a failed attempt.
pub fn acquire_row_lock<'s>(
    store: &'s dyn Store,
    row: &[u8],
    transaction_id: &TransactionId,
    config: &LockConfig,
    sleeper: &dyn Sleeper,
) -> Result<RowLockGuard<'s>> {
    let check = lock_check(row);
    let put = Put::new(row).add(DIRTY_FAMILY, LOCK_QUALIFIER, transaction_id.as_bytes());
    let attempts = retry_until(row, config, sleeper, || store.check_and_put(&check, &put))?;
    debug!(
        target: "overlay::lock",
        row = %to_string_binary(row),
        txn = %transaction_id,
        attempts,
        "Row lock acquired"
    );
    Ok(RowLockGuard {
        store,
        row: row.to_vec(),
        transaction_id: *transaction_id,
        released: false,
    })
}

/// Release the lock of `row` if and only if `transaction_id` holds it
///
/// Returns whether the lock was removed. A lock held by someone else, or no
/// lock at all, is left untouched and logged as a warning.
///
/// # Errors
///
/// Returns the store error if the compare-and-delete call fails.
pub fn release_row_lock(store: &dyn Store, row: &[u8], transaction_id: &TransactionId) -> Result<bool> {
    let check = Check::equals(row, DIRTY_FAMILY, LOCK_QUALIFIER, transaction_id.as_bytes());
    let delete = Delete::new(row).add_column(DIRTY_FAMILY, LOCK_QUALIFIER);
    let released = store.check_and_delete(&check, &delete)?;
    if released {
        debug!(
            target: "overlay::lock",
            row = %to_string_binary(row),
            txn = %transaction_id,
            "Row lock released"
        );
    } else {
        warn!(
            target: "overlay::lock",
            row = %to_string_binary(row),
            txn = %transaction_id,
            "Row lock not held by this transaction at release"
        );
    }
    Ok(released)
}

/// Apply `mutations` atomically once no operation holds the row lock
///
/// # Errors
///
/// Returns [`Error::RowLockTimeout`] when the lock stayed held for the whole
/// budget, or the store error of a failed attempt.
pub fn mutate_when_unlocked(
    store: &dyn Store,
    mutations: &RowMutations,
    config: &LockConfig,
    sleeper: &dyn Sleeper,
) -> Result<()> {
    let check = lock_check(&mutations.row);
    retry_until(&mutations.row, config, sleeper, || {
        store.check_and_mutate(&check, mutations)
    })?;
    Ok(())
}

/// Held row lock
///
/// Call [`RowLockGuard::release`] to release and observe the outcome. If the
/// guard is dropped without it (early return, panic), the lock is released on a
/// best-effort basis.
pub struct RowLockGuard<'s> {
    store: &'s dyn Store,
    row: Vec<u8>,
    transaction_id: TransactionId,
    released: bool,
}

impl std::fmt::Debug for RowLockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowLockGuard")
            .field("store", &self.store.name())
            .field("row", &to_string_binary(&self.row))
            .field("transaction_id", &self.transaction_id)
            .field("released", &self.released)
            .finish()
    }
}

impl RowLockGuard<'_> {
    /// Row this lock protects
    pub fn row(&self) -> &[u8] {
        &self.row
    }

    /// Holder id
    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    /// Release the lock now
    ///
    /// # Errors
    ///
    /// See [`release_row_lock`].
    pub fn release(mut self) -> Result<bool> {
        self.released = true;
        release_row_lock(self.store, &self.row, &self.transaction_id)
    }
}

impl Drop for RowLockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = release_row_lock(self.store, &self.row, &self.transaction_id) {
            warn!(
                target: "overlay::lock",
                row = %to_string_binary(&self.row),
                error = %e,
                "Failed to release row lock on drop"
            );
        }
    }
}
