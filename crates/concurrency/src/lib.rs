//! Concurrency layer for overlaydb
//!
//! This crate gives an overlay table single-writer-per-row semantics using only
//! primitives the store offers (compare-and-swap put/delete, atomic row
//! mutations):
//! - TransactionId: truncated SHA-256 attempt identifier
//! - Row lock: CAS-guarded sentinel cell with bounded, sleep-injected retry
//! - Protocol: resolve missing columns from the original into staging cells,
//!   run the operation, always clean up
//!
//! Nothing here holds an in-process lock; the store is the only coordination
//! medium, so callers may be unrelated threads or processes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lock;
pub mod protocol;
pub mod sleeper;
pub mod txn_id;

pub use lock::{acquire_row_lock, mutate_when_unlocked, release_row_lock, LockConfig, RowLockGuard};
pub use protocol::{
    run_row_locked, OperationKind, OperationOutcome, OperationStrategy, ResolvedRow, StagingMap,
};
pub use sleeper::{Sleeper, ThreadSleeper, VirtualSleeper};
pub use txn_id::{TransactionId, TRANSACTION_ID_LEN};
