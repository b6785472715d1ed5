//! User-facing handle over one overlay
//!
//! Reads merge the overlay with the original. Writes land only in the overlay
//! and are refused unless the overlay is `Enabled`.
//!
//! | Operation | Path |
//! |-----------|------|
//! | get / get_batch / exists / scan | merge engine |
//! | put / put_batch / delete / delete_batch / mutate_row | one check-and-mutate guarded by row lock absence |
//! | increment / append / check_and_put / check_and_delete | row-locked protocol |
//!
//! The handle holds no in-process lock; concurrent handles over the same
//! overlay, in this process or another, coordinate through the row lock cell.

use std::collections::BTreeSet;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use tracing::debug;

use overlay_concurrency::{
    mutate_when_unlocked, run_row_locked, LockConfig, OperationOutcome, OperationStrategy,
    Sleeper, TransactionId,
};
use overlay_core::layout::is_reserved_family;
use overlay_core::{
    to_string_binary, Append, Check, ColumnCoordinate, ColumnCoordinateSet, Delete, DeleteTarget,
    Error, Get, Increment, Mutation, Put, Result, RowMutations, RowResult, Scan, Store,
};

use crate::merge::{merged_get, merged_get_batch};
use crate::metadata::{OverlayMetadata, OverlayState};
use crate::scanner::MergedScanner;
use crate::strategies::{
    delete_mutations, put_mutations, row_mutations, AppendStrategy, CheckAndDeleteStrategy,
    CheckAndPutStrategy, IncrementStrategy,
};

/// Read/write handle over one overlay and its original
pub struct OverlayTable {
    name: String,
    metadata: OverlayMetadata,
    overlay: Arc<dyn Store>,
    original: Arc<dyn Store>,
    lock_config: LockConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for OverlayTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayTable")
            .field("name", &self.name)
            .field("metadata", &self.metadata)
            .field("lock_config", &self.lock_config)
            .finish()
    }
}

impl OverlayTable {
    /// Bind a handle to already opened stores
    ///
    /// `metadata` is the record read when the overlay was opened; its state
    /// decides whether writes are accepted for the life of the handle.
    pub fn new(
        name: impl Into<String>,
        metadata: OverlayMetadata,
        overlay: Arc<dyn Store>,
        original: Arc<dyn Store>,
        lock_config: LockConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            name: name.into(),
            metadata,
            overlay,
            original,
            lock_config,
            sleeper,
        }
    }

    /// Overlay table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the shadowed table
    pub fn original_name(&self) -> &str {
        &self.metadata.original
    }

    /// Lifecycle state recorded when the handle was opened
    pub fn state(&self) -> OverlayState {
        self.metadata.state
    }

    /// The overlay store itself (raw, unmerged)
    pub fn overlay_store(&self) -> &dyn Store {
        self.overlay.as_ref()
    }

    /// The original store (raw)
    pub fn original_store(&self) -> &dyn Store {
        self.original.as_ref()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Merged point read
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] if the request names a reserved
    /// family, or the error of a failing store read.
    pub fn get(&self, get: &Get) -> Result<RowResult> {
        reject_reserved(get.filter.families())?;
        merged_get(self.overlay.as_ref(), self.original.as_ref(), get)
    }

    /// Merged batch read; results correspond to `gets` by position
    pub fn get_batch(&self, gets: &[Get]) -> Result<Vec<RowResult>> {
        for get in gets {
            reject_reserved(get.filter.families())?;
        }
        merged_get_batch(self.overlay.as_ref(), self.original.as_ref(), gets)
    }

    /// True if the merged read returns at least one cell
    pub fn exists(&self, get: &Get) -> Result<bool> {
        Ok(!self.get(get)?.is_empty())
    }

    /// [`OverlayTable::exists`] for several reads
    pub fn exists_batch(&self, gets: &[Get]) -> Result<Vec<bool>> {
        Ok(self
            .get_batch(gets)?
            .iter()
            .map(|r| !r.is_empty())
            .collect())
    }

    /// Merged forward scan of `[scan.start_row, scan.stop_row)`
    pub fn scan(&self, scan: &Scan) -> Result<MergedScanner<'_>> {
        reject_reserved(scan.filter.families())?;
        MergedScanner::open(self.overlay.as_ref(), self.original.as_ref(), scan)
    }

    // ========================================================================
    // Guarded writes
    // ========================================================================

    /// Write cells into the overlay, clearing their tombstones
    ///
    /// # Errors
    ///
    /// - [`Error::OverlayDisabled`] unless the overlay is `Enabled`
    /// - [`Error::InvalidOperation`] for an empty put or a reserved family
    /// - [`Error::RowLockTimeout`] if the row stayed locked for the budget
    pub fn put(&self, put: &Put) -> Result<()> {
        self.ensure_writable()?;
        validate_put(put)?;
        let mutations = row_mutations(&put.row, put_mutations(put));
        self.apply_guarded(&mutations, "put")
    }

    /// Apply puts one row at a time
    ///
    /// Each put is atomic for its own row; a failure stops the batch and
    /// earlier puts stay applied.
    pub fn put_batch(&self, puts: &[Put]) -> Result<()> {
        for put in puts {
            self.put(put)?;
        }
        Ok(())
    }

    /// Hide columns, families or a whole row from the merged view
    ///
    /// Family and row deletes are resolved against both stores first; see
    /// [`delete_mutations`].
    pub fn delete(&self, delete: &Delete) -> Result<()> {
        self.ensure_writable()?;
        reject_reserved(delete_families(delete))?;
        let translated = delete_mutations(
            self.overlay.as_ref(),
            self.original.as_ref(),
            delete,
            &BTreeSet::new(),
        )?;
        if translated.is_empty() {
            debug!(
                target: "overlay::table",
                overlay = %self.name,
                row = %to_string_binary(&delete.row),
                "Delete resolved to no visible columns"
            );
            return Ok(());
        }
        self.apply_guarded(&row_mutations(&delete.row, translated), "delete")
    }

    /// Apply deletes one row at a time
    pub fn delete_batch(&self, deletes: &[Delete]) -> Result<()> {
        for delete in deletes {
            self.delete(delete)?;
        }
        Ok(())
    }

    /// Apply puts and deletes to one row atomically, in order
    ///
    /// A delete later in the list also hides columns written by an earlier put
    /// of the same call.
    pub fn mutate_row(&self, mutations: &RowMutations) -> Result<()> {
        self.ensure_writable()?;
        let mut translated = Vec::new();
        let mut pending: BTreeSet<(Vec<u8>, Vec<u8>)> = BTreeSet::new();
        for mutation in &mutations.mutations {
            if mutation.row() != mutations.row.as_slice() {
                return Err(Error::InvalidOperation(format!(
                    "mutation for row {} inside row mutations for {}",
                    to_string_binary(mutation.row()),
                    to_string_binary(&mutations.row)
                )));
            }
            match mutation {
                Mutation::Put(put) => {
                    validate_put(put)?;
                    pending.extend(
                        put.cells
                            .iter()
                            .map(|c| (c.family.clone(), c.qualifier.clone())),
                    );
                    translated.extend(put_mutations(put));
                }
                Mutation::Delete(delete) => {
                    reject_reserved(delete_families(delete))?;
                    translated.extend(delete_mutations(
                        self.overlay.as_ref(),
                        self.original.as_ref(),
                        delete,
                        &pending,
                    )?);
                }
            }
        }
        if translated.is_empty() {
            return Ok(());
        }
        self.apply_guarded(&row_mutations(&mutations.row, translated), "mutate_row")
    }

    // ========================================================================
    // Row-locked operations
    // ========================================================================

    /// Atomically add to counters, starting from the merged value
    ///
    /// Returns the new values of the incremented columns.
    ///
    /// # Errors
    ///
    /// - [`Error::OverlayDisabled`] unless the overlay is `Enabled`
    /// - [`Error::RowLockTimeout`] if the lock budget is exhausted
    /// - a store error if a current value is not an 8-byte counter
    pub fn increment(&self, increment: &Increment) -> Result<RowResult> {
        self.ensure_writable()?;
        if increment.columns.is_empty() {
            return Err(Error::InvalidOperation("increment names no columns".to_string()));
        }
        reject_reserved(increment.columns.iter().map(|(f, _, _)| f.as_slice()))?;
        let transaction_id = TransactionId::for_description(&increment.to_string());
        let outcome = self.run_locked(
            &increment.row,
            &increment.footprint(),
            &transaction_id,
            &IncrementStrategy::new(increment),
        )?;
        mutated(outcome)
    }

    /// Increment one column and return its new value
    pub fn increment_column_value(
        &self,
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        amount: i64,
    ) -> Result<i64> {
        let family = family.into();
        let qualifier = qualifier.into();
        let increment = Increment::new(row).add(family.clone(), qualifier.clone(), amount);
        let result = self.increment(&increment)?;
        match result.value(&family, &qualifier) {
            Some(bytes) if bytes.len() == 8 => Ok(BigEndian::read_i64(bytes)),
            Some(bytes) => Err(Error::store(format!(
                "counter {}:{} holds {} bytes",
                to_string_binary(&family),
                to_string_binary(&qualifier),
                bytes.len()
            ))),
            None => Err(Error::store(format!(
                "increment of {}:{} returned no value",
                to_string_binary(&family),
                to_string_binary(&qualifier)
            ))),
        }
    }

    /// Atomically append bytes, starting from the merged value
    pub fn append(&self, append: &Append) -> Result<RowResult> {
        self.ensure_writable()?;
        if append.columns.is_empty() {
            return Err(Error::InvalidOperation("append names no columns".to_string()));
        }
        reject_reserved(append.columns.iter().map(|(f, _, _)| f.as_slice()))?;
        let transaction_id = TransactionId::for_description(&append.to_string());
        let outcome = self.run_locked(
            &append.row,
            &append.footprint(),
            &transaction_id,
            &AppendStrategy::new(append),
        )?;
        mutated(outcome)
    }

    /// Apply `put` if the merged value of the checked column matches
    ///
    /// Returns whether the put was applied.
    pub fn check_and_put(&self, check: &Check, put: &Put) -> Result<bool> {
        self.ensure_writable()?;
        validate_put(put)?;
        validate_check(check, &put.row)?;
        let mut columns = check_footprint(check);
        columns.add_all(&put.footprint());
        let transaction_id = TransactionId::for_footprint(&columns);
        let outcome = self.run_locked(
            &check.row,
            &check_footprint(check),
            &transaction_id,
            &CheckAndPutStrategy::new(check, put),
        )?;
        checked(outcome)
    }

    /// Apply `delete` if the merged value of the checked column matches
    ///
    /// Returns whether the delete was applied.
    pub fn check_and_delete(&self, check: &Check, delete: &Delete) -> Result<bool> {
        self.ensure_writable()?;
        reject_reserved(delete_families(delete))?;
        validate_check(check, &delete.row)?;
        let mut columns = check_footprint(check);
        for target in &delete.targets {
            match target {
                DeleteTarget::Column { family, qualifier } => {
                    columns.add_column(delete.row.clone(), family.clone(), qualifier.clone());
                }
                DeleteTarget::Family(family) => {
                    columns.add(ColumnCoordinate::placeholder(
                        delete.row.clone(),
                        family.clone(),
                        Vec::<u8>::new(),
                    ));
                }
            }
        }
        let transaction_id = TransactionId::for_footprint(&columns);
        let outcome = self.run_locked(
            &check.row,
            &check_footprint(check),
            &transaction_id,
            &CheckAndDeleteStrategy::new(check, delete, self.original.as_ref()),
        )?;
        checked(outcome)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_writable(&self) -> Result<()> {
        if self.metadata.state.is_writable() {
            Ok(())
        } else {
            Err(Error::OverlayDisabled {
                overlay: self.name.clone(),
                state: self.metadata.state.to_string(),
            })
        }
    }

    fn apply_guarded(&self, mutations: &RowMutations, op: &'static str) -> Result<()> {
        mutate_when_unlocked(
            self.overlay.as_ref(),
            mutations,
            &self.lock_config,
            self.sleeper.as_ref(),
        )?;
        debug!(
            target: "overlay::table",
            overlay = %self.name,
            row = %to_string_binary(&mutations.row),
            op,
            mutations = mutations.mutations.len(),
            "Applied guarded write"
        );
        Ok(())
    }

    fn run_locked<S: OperationStrategy>(
        &self,
        row: &[u8],
        footprint: &ColumnCoordinateSet,
        transaction_id: &TransactionId,
        strategy: &S,
    ) -> Result<OperationOutcome> {
        run_row_locked(
            self.overlay.as_ref(),
            self.original.as_ref(),
            row,
            footprint,
            transaction_id,
            strategy,
            &self.lock_config,
            self.sleeper.as_ref(),
        )
    }
}

fn mutated(outcome: OperationOutcome) -> Result<RowResult> {
    match outcome {
        OperationOutcome::Mutated(result) => Ok(result),
        OperationOutcome::Checked(_) => Err(Error::InvalidState(
            "mutation produced a check outcome".to_string(),
        )),
    }
}

fn checked(outcome: OperationOutcome) -> Result<bool> {
    match outcome {
        OperationOutcome::Checked(applied) => Ok(applied),
        OperationOutcome::Mutated(_) => Err(Error::InvalidState(
            "check-and-act produced a mutation outcome".to_string(),
        )),
    }
}

fn check_footprint(check: &Check) -> ColumnCoordinateSet {
    let mut set = ColumnCoordinateSet::new();
    set.add_column(check.row.clone(), check.family.clone(), check.qualifier.clone());
    set
}

fn reject_reserved<'a>(families: impl IntoIterator<Item = &'a [u8]>) -> Result<()> {
    for family in families {
        if is_reserved_family(family) {
            return Err(Error::InvalidOperation(format!(
                "family {} is reserved for overlay bookkeeping",
                to_string_binary(family)
            )));
        }
    }
    Ok(())
}

fn delete_families(delete: &Delete) -> impl Iterator<Item = &[u8]> {
    delete.targets.iter().map(|target| match target {
        DeleteTarget::Column { family, .. } => family.as_slice(),
        DeleteTarget::Family(family) => family.as_slice(),
    })
}

fn validate_put(put: &Put) -> Result<()> {
    if put.is_empty() {
        return Err(Error::InvalidOperation("put carries no cells".to_string()));
    }
    reject_reserved(put.cells.iter().map(|c| c.family.as_slice()))
}

fn validate_check(check: &Check, row: &[u8]) -> Result<()> {
    if check.row != row {
        return Err(Error::InvalidOperation(format!(
            "check on row {} guards a write to row {}",
            to_string_binary(&check.row),
            to_string_binary(row)
        )));
    }
    reject_reserved([check.family.as_slice()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_concurrency::VirtualSleeper;
    use overlay_core::layout::{tombstone_qualifier, META_FAMILY, TOMBSTONE_VALUE};
    use overlay_storage::MemoryStore;

    struct Fixture {
        overlay: Arc<MemoryStore>,
        original: Arc<MemoryStore>,
        table: OverlayTable,
    }

    fn fixture_in(state: OverlayState) -> Fixture {
        let overlay = Arc::new(MemoryStore::new("sand"));
        let original = Arc::new(MemoryStore::new("prod"));
        let metadata = OverlayMetadata {
            original: "prod".to_string(),
            state,
        };
        let table = OverlayTable::new(
            "sand",
            metadata,
            overlay.clone(),
            original.clone(),
            LockConfig::new().with_max_attempts(5),
            Arc::new(VirtualSleeper::new()),
        );
        Fixture {
            overlay,
            original,
            table,
        }
    }

    fn fixture() -> Fixture {
        fixture_in(OverlayState::Enabled)
    }

    fn value(table: &OverlayTable, row: &str, q: &str) -> Option<Vec<u8>> {
        table
            .get(&Get::new(row).add_column("cf", q))
            .unwrap()
            .value(b"cf", q.as_bytes())
            .map(<[u8]>::to_vec)
    }

    fn has_tombstone(store: &MemoryStore, row: &str, q: &str) -> bool {
        store
            .get(&Get::new(row).add_column(META_FAMILY, tombstone_qualifier(b"cf", q.as_bytes())))
            .unwrap()
            .len()
            == 1
    }

    // ========================================================================
    // Reads and plain writes
    // ========================================================================

    #[test]
    fn put_then_get_round_trips() {
        let f = fixture();
        f.table.put(&Put::new("r").add("cf", "q", "v")).unwrap();
        assert_eq!(value(&f.table, "r", "q"), Some(b"v".to_vec()));
        assert!(f.original.get(&Get::new("r")).unwrap().is_empty());
    }

    #[test]
    fn delete_of_original_column_writes_tombstone() {
        let f = fixture();
        f.original.put(&Put::new("r").add("cf", "q", "v")).unwrap();
        f.table.delete(&Delete::new("r").add_column("cf", "q")).unwrap();

        assert_eq!(value(&f.table, "r", "q"), None);
        assert!(has_tombstone(&f.overlay, "r", "q"));
        assert_eq!(
            f.original.get(&Get::new("r")).unwrap().value(b"cf", b"q"),
            Some(&b"v"[..])
        );
    }

    #[test]
    fn put_after_delete_clears_tombstone() {
        let f = fixture();
        f.original.put(&Put::new("r").add("cf", "q", "v")).unwrap();
        f.table.delete(&Delete::new("r").add_column("cf", "q")).unwrap();
        f.table.put(&Put::new("r").add("cf", "q", "again")).unwrap();

        assert_eq!(value(&f.table, "r", "q"), Some(b"again".to_vec()));
        assert!(!has_tombstone(&f.overlay, "r", "q"));
    }

    #[test]
    fn whole_row_delete_hides_both_sides() {
        let f = fixture();
        f.original.put(&Put::new("r").add("cf", "a", "1")).unwrap();
        f.table.put(&Put::new("r").add("cf", "b", "2")).unwrap();

        f.table.delete(&Delete::new("r")).unwrap();
        assert!(!f.table.exists(&Get::new("r")).unwrap());
        // Physical overlay cells are gone; only markers remain
        let raw = f.overlay.get(&Get::new("r")).unwrap();
        assert!(raw.cells().iter().all(|c| c.family == META_FAMILY));
    }

    #[test]
    fn mutate_row_delete_sees_earlier_put() {
        let f = fixture();
        f.original.put(&Put::new("r").add("cf", "a", "1")).unwrap();
        let mutations = RowMutations::new("r")
            .put(Put::new("r").add("cf", "b", "2"))
            .delete(Delete::new("r").add_family("cf"))
            .put(Put::new("r").add("cf", "c", "3"));
        f.table.mutate_row(&mutations).unwrap();

        let merged = f.table.get(&Get::new("r")).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.value(b"cf", b"c"), Some(&b"3"[..]));
    }

    #[test]
    fn exists_batch_positions() {
        let f = fixture();
        f.original.put(&Put::new("a").add("cf", "q", "1")).unwrap();
        let found = f
            .table
            .exists_batch(&[Get::new("a"), Get::new("b")])
            .unwrap();
        assert_eq!(found, vec![true, false]);
    }

    #[test]
    fn reserved_family_requests_rejected() {
        let f = fixture();
        assert!(matches!(
            f.table.get(&Get::new("r").add_family(META_FAMILY)),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            f.table.put(&Put::new("r").add(META_FAMILY, "x", "y")),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn writes_refused_unless_enabled() {
        let f = fixture_in(OverlayState::Draining);
        let err = f.table.put(&Put::new("r").add("cf", "q", "v")).unwrap_err();
        assert!(matches!(err, Error::OverlayDisabled { .. }));
        assert!(matches!(
            f.table.increment_column_value("r", "cf", "n", 1),
            Err(Error::OverlayDisabled { .. })
        ));
        // Reads still work
        assert!(f.table.get(&Get::new("r")).unwrap().is_empty());
    }

    #[test]
    fn put_waits_out_a_held_lock() {
        let f = fixture();
        let tid = TransactionId::from_bytes([7; 16]);
        let sleeper = VirtualSleeper::new();
        let guard = overlay_concurrency::acquire_row_lock(
            f.overlay.as_ref(),
            b"r",
            &tid,
            &LockConfig::new(),
            &sleeper,
        )
        .unwrap();

        let err = f.table.put(&Put::new("r").add("cf", "q", "v")).unwrap_err();
        assert!(matches!(err, Error::RowLockTimeout { attempts: 5, .. }));

        guard.release().unwrap();
        f.table.put(&Put::new("r").add("cf", "q", "v")).unwrap();
    }

    // ========================================================================
    // Row-locked operations
    // ========================================================================

    #[test]
    fn increment_copies_up_original_counter() {
        let f = fixture();
        f.original
            .put(&Put::new("r").add("cf", "n", 10i64.to_be_bytes().to_vec()))
            .unwrap();
        assert_eq!(f.table.increment_column_value("r", "cf", "n", 5).unwrap(), 15);
        assert_eq!(f.table.increment_column_value("r", "cf", "n", 1).unwrap(), 16);
        assert_eq!(
            f.original.get(&Get::new("r")).unwrap().value(b"cf", b"n"),
            Some(&10i64.to_be_bytes()[..])
        );
    }

    #[test]
    fn increment_of_tombstoned_counter_restarts() {
        let f = fixture();
        f.original
            .put(&Put::new("r").add("cf", "n", 10i64.to_be_bytes().to_vec()))
            .unwrap();
        f.table.delete(&Delete::new("r").add_column("cf", "n")).unwrap();
        assert_eq!(f.table.increment_column_value("r", "cf", "n", 2).unwrap(), 2);
        assert!(!has_tombstone(&f.overlay, "r", "n"));
    }

    #[test]
    fn old_timestamp_delete_still_hides_newer_cell() {
        let f = fixture();
        f.table
            .put(&Put::new("r").add("cf", "n", 5i64.to_be_bytes().to_vec()))
            .unwrap();
        f.table
            .delete(&Delete::new("r").add_column("cf", "n").at_timestamp(1))
            .unwrap();
        assert_eq!(value(&f.table, "r", "n"), None);
        assert!(f.overlay.versions(b"r", b"cf", b"n").is_empty());

        let absent = Check::absent("r", "cf", "n");
        assert!(f
            .table
            .check_and_put(&absent, &Put::new("r").add("cf", "m", "x"))
            .unwrap());
        assert_eq!(f.table.increment_column_value("r", "cf", "n", 1).unwrap(), 1);
        assert!(!has_tombstone(&f.overlay, "r", "n"));
    }

    #[test]
    fn tombstoned_cell_left_in_store_is_never_read() {
        let f = fixture();
        // A physical cell under its own tombstone, as an older writer could leave it
        f.overlay
            .put(
                &Put::new("r")
                    .add("cf", "n", 5i64.to_be_bytes().to_vec())
                    .add(META_FAMILY, tombstone_qualifier(b"cf", b"n"), TOMBSTONE_VALUE),
            )
            .unwrap();
        assert_eq!(value(&f.table, "r", "n"), None);

        let absent = Check::absent("r", "cf", "n");
        assert!(f
            .table
            .check_and_put(&absent, &Put::new("r").add("cf", "m", "x"))
            .unwrap());
        assert_eq!(f.table.increment_column_value("r", "cf", "n", 1).unwrap(), 1);
        assert_eq!(value(&f.table, "r", "n"), Some(1i64.to_be_bytes().to_vec()));
        assert_eq!(f.overlay.versions(b"r", b"cf", b"n").len(), 1);
        assert!(!has_tombstone(&f.overlay, "r", "n"));
    }

    #[test]
    fn append_extends_original_value() {
        let f = fixture();
        f.original.put(&Put::new("r").add("cf", "s", "abc")).unwrap();
        let result = f.table.append(&Append::new("r").add("cf", "s", "def")).unwrap();
        assert_eq!(result.value(b"cf", b"s"), Some(&b"abcdef"[..]));
        assert_eq!(value(&f.table, "r", "s"), Some(b"abcdef".to_vec()));
    }

    #[test]
    fn check_and_put_against_original_value() {
        let f = fixture();
        f.original.put(&Put::new("r").add("cf", "col", "v1")).unwrap();

        let wrong = Check::equals("r", "cf", "col", "nope");
        assert!(!f
            .table
            .check_and_put(&wrong, &Put::new("r").add("cf", "col2", "v2"))
            .unwrap());

        let right = Check::equals("r", "cf", "col", "v1");
        assert!(f
            .table
            .check_and_put(&right, &Put::new("r").add("cf", "col2", "v2"))
            .unwrap());
        assert_eq!(value(&f.table, "r", "col"), Some(b"v1".to_vec()));
        assert_eq!(value(&f.table, "r", "col2"), Some(b"v2".to_vec()));
    }

    #[test]
    fn check_absent_respects_tombstone() {
        let f = fixture();
        f.original.put(&Put::new("r").add("cf", "col", "v1")).unwrap();
        let absent = Check::absent("r", "cf", "col");
        assert!(!f
            .table
            .check_and_put(&absent, &Put::new("r").add("cf", "col", "x"))
            .unwrap());

        f.table.delete(&Delete::new("r").add_column("cf", "col")).unwrap();
        assert!(f
            .table
            .check_and_put(&absent, &Put::new("r").add("cf", "col", "x"))
            .unwrap());
        assert_eq!(value(&f.table, "r", "col"), Some(b"x".to_vec()));
    }

    #[test]
    fn check_and_delete_tombstones_on_match() {
        let f = fixture();
        f.original.put(&Put::new("r").add("cf", "a", "1").add("cf", "b", "2")).unwrap();
        let check = Check::equals("r", "cf", "a", "1");
        assert!(f.table.check_and_delete(&check, &Delete::new("r")).unwrap());
        assert!(!f.table.exists(&Get::new("r")).unwrap());
    }

    #[test]
    fn check_row_mismatch_rejected() {
        let f = fixture();
        let err = f
            .table
            .check_and_put(
                &Check::absent("a", "cf", "q"),
                &Put::new("b").add("cf", "q", "v"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }
}
