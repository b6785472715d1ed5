//! Store and cluster abstractions
//!
//! This module defines the two interfaces the overlay engine consumes:
//!
//! - [`Store`]: one table of a column-family sorted store. Every call that
//!   changes state is atomic for its row; scans are byte-lexicographic by row.
//! - [`ClusterAdmin`]: table, family, replication and snapshot administration,
//!   used by overlay creation and the push workflow.
//!
//! Thread safety: implementations are shared between threads behind `Arc`, so
//! both traits require `Send + Sync`.

use std::sync::Arc;

use crate::error::Result;
use crate::request::{Append, Check, Delete, Get, Increment, Put, RowMutations, Scan};
use crate::types::RowResult;

/// Forward-only cursor over scan results
///
/// Yields non-empty rows in ascending row order. After an `Err` item the cursor
/// should be abandoned.
pub type RowCursor<'a> = Box<dyn Iterator<Item = Result<RowResult>> + Send + 'a>;

/// One table of a column-family sorted store
pub trait Store: Send + Sync {
    /// Table name, used in logs and errors
    fn name(&self) -> &str;

    /// Read the latest cell of every column of one row that passes the filter
    ///
    /// An absent row yields an empty [`RowResult`].
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or names an unknown family.
    fn get(&self, get: &Get) -> Result<RowResult>;

    /// Read several rows; results correspond to `gets` by position
    ///
    /// # Errors
    ///
    /// Returns the first failing read's error.
    fn get_batch(&self, gets: &[Get]) -> Result<Vec<RowResult>> {
        gets.iter().map(|g| self.get(g)).collect()
    }

    /// Open a forward cursor over `[scan.start_row, scan.stop_row)`
    ///
    /// # Errors
    ///
    /// Returns an error if the scan cannot be opened.
    fn scan(&self, scan: &Scan) -> Result<RowCursor<'_>>;

    /// Write cells into one row
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or names an unknown family.
    fn put(&self, put: &Put) -> Result<()>;

    /// Write several puts; each is atomic for its own row only
    ///
    /// # Errors
    ///
    /// Returns the first failing put's error. Earlier puts stay applied.
    fn put_batch(&self, puts: &[Put]) -> Result<()> {
        for put in puts {
            self.put(put)?;
        }
        Ok(())
    }

    /// Remove columns, families or a whole row
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete(&self, delete: &Delete) -> Result<()>;

    /// Apply puts and deletes to one row atomically, in order
    ///
    /// # Errors
    ///
    /// Returns an error if any mutation targets another row or fails; nothing
    /// is applied in that case.
    fn mutate_row(&self, mutations: &RowMutations) -> Result<()>;

    /// Apply `mutations` only if the current value of the checked column
    /// satisfies `check`, atomically
    ///
    /// Returns whether the mutations were applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the check and mutations target different rows or
    /// the write fails.
    fn check_and_mutate(&self, check: &Check, mutations: &RowMutations) -> Result<bool>;

    /// Compare-and-swap put
    ///
    /// # Errors
    ///
    /// See [`Store::check_and_mutate`].
    fn check_and_put(&self, check: &Check, put: &Put) -> Result<bool> {
        let mutations = RowMutations::new(put.row.clone()).put(put.clone());
        self.check_and_mutate(check, &mutations)
    }

    /// Compare-and-swap delete
    ///
    /// # Errors
    ///
    /// See [`Store::check_and_mutate`].
    fn check_and_delete(&self, check: &Check, delete: &Delete) -> Result<bool> {
        let mutations = RowMutations::new(delete.row.clone()).delete(delete.clone());
        self.check_and_mutate(check, &mutations)
    }

    /// Atomically add to 8-byte big-endian counters; returns the new values
    ///
    /// # Errors
    ///
    /// Returns an error if an existing value is not 8 bytes long.
    fn increment(&self, increment: &Increment) -> Result<RowResult>;

    /// Atomically append bytes to columns; returns the new values
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn append(&self, append: &Append) -> Result<RowResult>;
}

/// Table, family, replication and snapshot administration
///
/// Replication is modelled as a link from a source table to a target table.
/// Edits applied to the source are shipped to the target while the link is
/// resumed and the target has registered the source as an upstream.
pub trait ClusterAdmin: Send + Sync {
    /// Handle to an existing table
    ///
    /// # Errors
    ///
    /// Returns an admin error if the table does not exist.
    fn open_table(&self, table: &str) -> Result<Arc<dyn Store>>;

    /// True if the table exists
    fn table_exists(&self, table: &str) -> Result<bool>;

    /// Create a table with the given families
    fn create_table(&self, table: &str, families: &[Vec<u8>]) -> Result<()>;

    /// Create an empty table with the same families as `template`
    fn create_table_like(&self, table: &str, template: &str) -> Result<()>;

    /// Drop a table and its data
    fn delete_table(&self, table: &str) -> Result<()>;

    /// Families of a table, sorted
    fn families(&self, table: &str) -> Result<Vec<Vec<u8>>>;

    /// Add a family to a table
    fn add_family(&self, table: &str, family: &[u8]) -> Result<()>;

    /// Drop a family and all its cells
    fn remove_family(&self, table: &str, family: &[u8]) -> Result<()>;

    /// Link `source` to `target`, optionally starting paused
    fn add_replica(&self, source: &str, target: &str, paused: bool) -> Result<()>;

    /// Remove the link from `source` to `target`
    fn remove_replica(&self, source: &str, target: &str) -> Result<()>;

    /// Let `target` accept edits shipped from `source`
    fn add_upstream(&self, target: &str, source: &str) -> Result<()>;

    /// Stop `target` accepting edits from `source`
    fn remove_upstream(&self, target: &str, source: &str) -> Result<()>;

    /// Pause every link leaving `source`
    fn pause_replication(&self, source: &str) -> Result<()>;

    /// Resume every link leaving `source`
    fn resume_replication(&self, source: &str) -> Result<()>;

    /// Take a named point-in-time snapshot of a table
    fn create_snapshot(&self, table: &str, snapshot: &str) -> Result<()>;

    /// Drop a named snapshot
    fn remove_snapshot(&self, snapshot: &str) -> Result<()>;

    /// Bytes of edits from `source` not yet applied at their targets
    fn replication_backlog(&self, source: &str) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // ====================================================================
    // Compile-time contract tests (object safety, Send+Sync)
    // ====================================================================

    #[test]
    fn store_is_object_safe_and_send_sync() {
        fn accepts_store(_: &dyn Store) {}
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        let _ = accepts_store as fn(&dyn Store);
        assert_send::<Arc<dyn Store>>();
        assert_sync::<Arc<dyn Store>>();
    }

    #[test]
    fn cluster_admin_is_object_safe_and_send_sync() {
        fn accepts_admin(_: &dyn ClusterAdmin) {}
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        let _ = accepts_admin as fn(&dyn ClusterAdmin);
        assert_send::<Arc<dyn ClusterAdmin>>();
        assert_sync::<Arc<dyn ClusterAdmin>>();
    }
}
