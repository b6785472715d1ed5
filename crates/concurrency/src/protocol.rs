//! Row-locked "resolve original into overlay, then run" protocol
//!
//! Native atomic primitives (increment, append, check-and-mutate) only see one
//! table. When the overlay has no cell for a column yet, the value that
//! matters lives in the original, so it is copied into the overlay first as a
//! staging cell and the primitive runs against that copy.
//!
//! # Steps
//!
//! ```text
//! 1. acquire the row lock (bounded CAS retry)
//! 2. read the overlay for the footprint + metadata family, classify each column:
//!      (a) real overlay value   (b) tombstoned   (c) neither
//! 3. one batched original read for (c) columns; stage those that exist under
//!    (_sanddirty, tid ++ family ++ qualifier), original value and timestamp kept.
//!    (b) columns get a staging qualifier but no cell, so they start out absent
//! 4. nothing staged  -> strategy.run_direct()
//! 5. otherwise       -> strategy.run_staged(staging); for Mutated results copy
//!    staged values back to the real columns, drop hidden cells of (b) columns
//!    and clear their tombstones in one row mutation, then re-key the result
//! 6. always: delete staging cells, release the lock (CAS on tid)
//! ```
//!
//! A tombstone wins over a physical cell of the same column, exactly as in
//! the merged read path: such a column is class (b) and its hidden value is
//! never seen by the strategy.
//!
//! A body failure takes precedence over a cleanup failure; the latter is then
//! only logged. If the body panics, drop guards still delete staging cells and
//! release the lock.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace, warn};

use overlay_core::layout::{
    decode_tombstone, staging_qualifier, tombstone_qualifier, DIRTY_FAMILY, META_FAMILY,
};
use overlay_core::{
    to_string_binary, Cell, ColumnCoordinateSet, Delete, Error, Get, Mutation, Put, Result,
    RowMutations, RowResult, Store, ALL_VERSIONS, LATEST_TIMESTAMP,
};

use crate::lock::{acquire_row_lock, LockConfig};
use crate::sleeper::Sleeper;
use crate::txn_id::TransactionId;

type Column = (Vec<u8>, Vec<u8>);

/// Which shape of operation a strategy implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Always changes overlay state and reports post-mutation values
    Mutation,
    /// Changes overlay state only if a guard holds
    CheckAndAct,
}

/// Result of one protocol run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Post-mutation values of the touched columns
    Mutated(RowResult),
    /// Whether the guarded action was applied
    Checked(bool),
}

impl OperationOutcome {
    /// Post-mutation values, if this is a mutation outcome
    pub fn into_result(self) -> Option<RowResult> {
        match self {
            OperationOutcome::Mutated(result) => Some(result),
            OperationOutcome::Checked(_) => None,
        }
    }

    /// Guard outcome, if this is a check-and-act outcome
    pub fn applied(&self) -> Option<bool> {
        match self {
            OperationOutcome::Checked(applied) => Some(*applied),
            OperationOutcome::Mutated(_) => None,
        }
    }
}

/// What step 2 learned about the footprint
#[derive(Debug, Clone)]
pub struct ResolvedRow {
    /// Row key
    pub row: Vec<u8>,
    /// Attempt id, also the staging qualifier prefix
    pub transaction_id: TransactionId,
    /// Footprint columns holding a visible overlay cell
    pub present: BTreeSet<Column>,
    /// Footprint columns tombstoned in the overlay
    pub tombstoned: BTreeSet<Column>,
    /// Tombstoned columns that still hold a hidden physical cell
    pub shadowed: BTreeSet<Column>,
}

impl ResolvedRow {
    /// True if (family, qualifier) is tombstoned in the overlay
    pub fn is_tombstoned(&self, family: &[u8], qualifier: &[u8]) -> bool {
        self.tombstoned.contains(&(family.to_vec(), qualifier.to_vec()))
    }
}

/// Real column -> staging qualifier of the columns copied up by step 3
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingMap {
    entries: BTreeMap<Column, Vec<u8>>,
}

impl StagingMap {
    /// Staging qualifier of (family, qualifier), if it was staged
    pub fn get(&self, family: &[u8], qualifier: &[u8]) -> Option<&[u8]> {
        self.entries
            .get(&(family.to_vec(), qualifier.to_vec()))
            .map(Vec::as_slice)
    }

    /// Real column of a staging qualifier
    pub fn real_column(&self, staging: &[u8]) -> Option<(&[u8], &[u8])> {
        self.entries
            .iter()
            .find(|(_, q)| q.as_slice() == staging)
            .map(|((f, q), _)| (f.as_slice(), q.as_slice()))
    }

    /// (real column, staging qualifier) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&Column, &Vec<u8>)> {
        self.entries.iter()
    }

    /// Number of staged columns
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was staged
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a staged column
    ///
    /// Staging qualifiers are not length-prefixed, so (`a`, `bc`) and
    /// (`ab`, `c`) collide; a second column claiming a taken qualifier is
    /// refused.
    fn insert(&mut self, column: Column, staging: Vec<u8>) -> Result<()> {
        if let Some((family, qualifier)) = self.real_column(&staging) {
            if (family, qualifier) != (column.0.as_slice(), column.1.as_slice()) {
                return Err(Error::InvalidOperation(format!(
                    "columns {}:{} and {}:{} share a staging qualifier",
                    to_string_binary(family),
                    to_string_binary(qualifier),
                    to_string_binary(&column.0),
                    to_string_binary(&column.1)
                )));
            }
        }
        self.entries.insert(column, staging);
        Ok(())
    }
}

/// The operation-specific half of the protocol
pub trait OperationStrategy {
    /// Shape of the operation
    fn kind(&self) -> OperationKind;

    /// Execute entirely against the overlay's real columns
    fn run_direct(&self, overlay: &dyn Store, row: &ResolvedRow) -> Result<OperationOutcome>;

    /// Execute with staged columns read and written at their staging qualifiers
    ///
    /// Mutation strategies report staged columns under
    /// (`DIRTY_FAMILY`, staging qualifier); the protocol copies them back.
    fn run_staged(
        &self,
        overlay: &dyn Store,
        row: &ResolvedRow,
        staging: &StagingMap,
    ) -> Result<OperationOutcome>;
}

/// Deletes staging cells when dropped without [`StagedCells::clear`]
struct StagedCells<'s> {
    store: &'s dyn Store,
    row: Vec<u8>,
    qualifiers: Vec<Vec<u8>>,
}

impl<'s> StagedCells<'s> {
    fn new(store: &'s dyn Store, row: &[u8]) -> Self {
        Self {
            store,
            row: row.to_vec(),
            qualifiers: Vec::new(),
        }
    }

    fn delete_request(&self) -> Option<Delete> {
        if self.qualifiers.is_empty() {
            return None;
        }
        let mut delete = Delete::new(self.row.clone());
        for qualifier in &self.qualifiers {
            delete = delete.add_column(DIRTY_FAMILY, qualifier.clone());
        }
        Some(delete)
    }

    fn clear(mut self) -> Result<()> {
        let request = self.delete_request();
        self.qualifiers.clear();
        match request {
            Some(delete) => self.store.delete(&delete),
            None => Ok(()),
        }
    }
}

impl Drop for StagedCells<'_> {
    fn drop(&mut self) {
        if let Some(delete) = self.delete_request() {
            if let Err(e) = self.store.delete(&delete) {
                warn!(
                    target: "overlay::lock",
                    row = %to_string_binary(&self.row),
                    error = %e,
                    "Failed to delete staging cells on drop"
                );
            }
        }
    }
}

/// Run `strategy` on `row` under the row lock, resolving missing state from
/// `original` first
///
/// # Errors
///
/// - [`Error::RowLockTimeout`] if the lock budget is exhausted (nothing ran)
/// - [`Error::InvalidOperation`] if the footprint names another row
/// - any store error from the body or, if the body succeeded, from cleanup
#[allow(clippy::too_many_arguments)]
pub fn run_row_locked<S>(
    overlay: &dyn Store,
    original: &dyn Store,
    row: &[u8],
    footprint: &ColumnCoordinateSet,
    transaction_id: &TransactionId,
    strategy: &S,
    config: &LockConfig,
    sleeper: &dyn Sleeper,
) -> Result<OperationOutcome>
where
    S: OperationStrategy + ?Sized,
{
    if let Some(other) = footprint.iter().find(|c| c.row != row) {
        return Err(Error::InvalidOperation(format!(
            "footprint coordinate for row {} used on row {}",
            to_string_binary(&other.row),
            to_string_binary(row)
        )));
    }

    let lock = acquire_row_lock(overlay, row, transaction_id, config, sleeper)?;
    let mut staged = StagedCells::new(overlay, row);

    let body = run_body(
        overlay,
        original,
        row,
        footprint,
        transaction_id,
        strategy,
        &mut staged,
    );

    let cleared = staged.clear();
    let released = lock.release();
    let cleanup = cleared.and(released.map(|_| ()));

    match (body, cleanup) {
        (Ok(outcome), Ok(())) => Ok(outcome),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup_err)) => {
            warn!(
                target: "overlay::lock",
                row = %to_string_binary(row),
                error = %cleanup_err,
                "Cleanup failed after operation error"
            );
            Err(e)
        }
    }
}

fn run_body<S>(
    overlay: &dyn Store,
    original: &dyn Store,
    row: &[u8],
    footprint: &ColumnCoordinateSet,
    transaction_id: &TransactionId,
    strategy: &S,
    staged: &mut StagedCells<'_>,
) -> Result<OperationOutcome>
where
    S: OperationStrategy + ?Sized,
{
    let columns: BTreeSet<Column> = footprint
        .iter()
        .filter(|c| !c.family.is_empty())
        .map(|c| (c.family.clone(), c.qualifier.clone()))
        .collect();

    let resolved = classify(overlay, row, &columns, transaction_id)?;
    let missing: Vec<&Column> = columns
        .iter()
        .filter(|c| !resolved.present.contains(*c) && !resolved.tombstoned.contains(*c))
        .collect();

    let mut staging = StagingMap::default();
    stage_absent(&resolved, &mut staging, staged)?;
    stage_from_original(overlay, original, row, &missing, transaction_id, &mut staging, staged)?;

    trace!(
        target: "overlay::lock",
        row = %to_string_binary(row),
        present = resolved.present.len(),
        tombstoned = resolved.tombstoned.len(),
        staged = staging.len(),
        "Resolved footprint"
    );

    if staging.is_empty() {
        let outcome = strategy.run_direct(overlay, &resolved)?;
        return check_shape(strategy.kind(), outcome);
    }

    let outcome = check_shape(strategy.kind(), strategy.run_staged(overlay, &resolved, &staging)?)?;
    match outcome {
        OperationOutcome::Mutated(result) => {
            let rekeyed = copy_back(overlay, row, &resolved, &staging, result)?;
            Ok(OperationOutcome::Mutated(rekeyed))
        }
        checked @ OperationOutcome::Checked(_) => Ok(checked),
    }
}

fn check_shape(kind: OperationKind, outcome: OperationOutcome) -> Result<OperationOutcome> {
    match (kind, &outcome) {
        (OperationKind::Mutation, OperationOutcome::Mutated(_))
        | (OperationKind::CheckAndAct, OperationOutcome::Checked(_)) => Ok(outcome),
        _ => Err(Error::InvalidState(format!(
            "{:?} strategy returned {:?}",
            kind, outcome
        ))),
    }
}

/// Step 2: which footprint columns the overlay has or has tombstoned
fn classify(
    overlay: &dyn Store,
    row: &[u8],
    columns: &BTreeSet<Column>,
    transaction_id: &TransactionId,
) -> Result<ResolvedRow> {
    let mut resolved = ResolvedRow {
        row: row.to_vec(),
        transaction_id: *transaction_id,
        present: BTreeSet::new(),
        tombstoned: BTreeSet::new(),
        shadowed: BTreeSet::new(),
    };
    if columns.is_empty() {
        return Ok(resolved);
    }

    let mut get = Get::new(row).add_family(META_FAMILY);
    for (family, qualifier) in columns {
        get = get.add_column(family.clone(), qualifier.clone());
    }
    let current = overlay.get(&get)?;

    for cell in current.cells() {
        if cell.family == META_FAMILY {
            if cell.value.is_empty() {
                continue;
            }
            if let Some((family, qualifier)) = decode_tombstone(&cell.qualifier) {
                let column = (family.to_vec(), qualifier.to_vec());
                if columns.contains(&column) {
                    resolved.tombstoned.insert(column);
                }
            }
        } else {
            resolved
                .present
                .insert((cell.family.clone(), cell.qualifier.clone()));
        }
    }

    let hidden: Vec<Column> = resolved
        .present
        .intersection(&resolved.tombstoned)
        .cloned()
        .collect();
    for column in hidden {
        resolved.present.remove(&column);
        resolved.shadowed.insert(column);
    }
    Ok(resolved)
}

/// Step 3 for (b) columns: a staging qualifier with no cell behind it
///
/// The strategy then reads the column as absent and its native primitive
/// starts from nothing. The qualifier is registered for cleanup since the
/// strategy may create a cell there.
fn stage_absent(
    resolved: &ResolvedRow,
    staging: &mut StagingMap,
    staged: &mut StagedCells<'_>,
) -> Result<()> {
    for (family, qualifier) in &resolved.tombstoned {
        let staged_qualifier =
            staging_qualifier(resolved.transaction_id.as_bytes(), family, qualifier);
        staging.insert((family.clone(), qualifier.clone()), staged_qualifier.clone())?;
        staged.qualifiers.push(staged_qualifier);
    }
    Ok(())
}

/// Step 3: copy original values of `missing` columns into staging cells
fn stage_from_original(
    overlay: &dyn Store,
    original: &dyn Store,
    row: &[u8],
    missing: &[&Column],
    transaction_id: &TransactionId,
    staging: &mut StagingMap,
    staged: &mut StagedCells<'_>,
) -> Result<()> {
    if missing.is_empty() {
        return Ok(());
    }

    let mut get = Get::new(row);
    for (family, qualifier) in missing {
        get = get.add_column(family.clone(), qualifier.clone());
    }
    let upstream = original.get(&get)?;
    if upstream.is_empty() {
        return Ok(());
    }

    let mut put = Put::new(row);
    let mut qualifiers = Vec::with_capacity(upstream.len());
    for cell in upstream.cells() {
        let qualifier = staging_qualifier(transaction_id.as_bytes(), &cell.family, &cell.qualifier);
        put = put.add_with_timestamp(DIRTY_FAMILY, qualifier.clone(), cell.timestamp, cell.value.clone());
        staging.insert((cell.family.clone(), cell.qualifier.clone()), qualifier.clone())?;
        qualifiers.push(qualifier);
    }

    // Register before writing so a partially applied put is still cleaned up
    staged.qualifiers.extend(qualifiers);
    overlay.put(&put)?;

    debug!(
        target: "overlay::lock",
        row = %to_string_binary(row),
        staged = upstream.len(),
        "Staged original columns"
    );
    Ok(())
}

/// Step 5: move staged results to their real columns and clear tombstones
fn copy_back(
    overlay: &dyn Store,
    row: &[u8],
    resolved: &ResolvedRow,
    staging: &StagingMap,
    result: RowResult,
) -> Result<RowResult> {
    let mut cells = Vec::with_capacity(result.len());
    let mut put = Put::new(row);
    for cell in result.into_cells() {
        if cell.family == DIRTY_FAMILY {
            if let Some((family, qualifier)) = staging.real_column(&cell.qualifier) {
                put = put.add_with_timestamp(family, qualifier, LATEST_TIMESTAMP, cell.value.clone());
                cells.push(Cell::with_timestamp(
                    row,
                    family,
                    qualifier,
                    cell.timestamp,
                    cell.value,
                ));
            }
        } else if cell.family != META_FAMILY {
            cells.push(cell);
        }
    }

    let mut mutations = RowMutations::new(row);
    if !resolved.shadowed.is_empty() {
        let mut hidden = Delete::new(row).at_timestamp(ALL_VERSIONS);
        for (family, qualifier) in &resolved.shadowed {
            hidden = hidden.add_column(family.clone(), qualifier.clone());
        }
        mutations.push(Mutation::Delete(hidden));
    }
    if !put.is_empty() {
        mutations.push(Mutation::Put(put));
    }
    if let Some(delete) = tombstone_delete(row, &resolved.tombstoned) {
        mutations.push(Mutation::Delete(delete));
    }
    if !mutations.is_empty() {
        overlay.mutate_row(&mutations)?;
    }
    Ok(RowResult::from_cells(row, cells))
}

fn tombstone_delete(row: &[u8], columns: &BTreeSet<Column>) -> Option<Delete> {
    if columns.is_empty() {
        return None;
    }
    let mut delete = Delete::new(row);
    for (family, qualifier) in columns {
        delete = delete.add_column(META_FAMILY, tombstone_qualifier(family, qualifier));
    }
    Some(delete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleeper::VirtualSleeper;
    use overlay_core::layout::{LOCK_QUALIFIER, TOMBSTONE_VALUE};
    use overlay_core::Increment;
    use overlay_storage::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Increment of one column, reporting which path ran
    struct CountingIncrement {
        family: Vec<u8>,
        qualifier: Vec<u8>,
        amount: i64,
        staged_path: AtomicBool,
        fail: bool,
    }

    impl CountingIncrement {
        fn new(amount: i64) -> Self {
            Self {
                family: b"cf".to_vec(),
                qualifier: b"n".to_vec(),
                amount,
                staged_path: AtomicBool::new(false),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(1)
            }
        }
    }

    impl OperationStrategy for CountingIncrement {
        fn kind(&self) -> OperationKind {
            OperationKind::Mutation
        }

        fn run_direct(&self, overlay: &dyn Store, row: &ResolvedRow) -> Result<OperationOutcome> {
            if self.fail {
                return Err(Error::store("injected"));
            }
            let inc = Increment::new(row.row.clone()).add(
                self.family.clone(),
                self.qualifier.clone(),
                self.amount,
            );
            overlay.increment(&inc).map(OperationOutcome::Mutated)
        }

        fn run_staged(
            &self,
            overlay: &dyn Store,
            row: &ResolvedRow,
            staging: &StagingMap,
        ) -> Result<OperationOutcome> {
            self.staged_path.store(true, Ordering::SeqCst);
            if self.fail {
                return Err(Error::store("injected"));
            }
            let target = match staging.get(&self.family, &self.qualifier) {
                Some(q) => (DIRTY_FAMILY.to_vec(), q.to_vec()),
                None => (self.family.clone(), self.qualifier.clone()),
            };
            let inc = Increment::new(row.row.clone()).add(target.0, target.1, self.amount);
            overlay.increment(&inc).map(OperationOutcome::Mutated)
        }
    }

    fn footprint() -> ColumnCoordinateSet {
        let mut set = ColumnCoordinateSet::new();
        set.add_column("r", "cf", "n");
        set
    }

    fn counter(v: i64) -> Vec<u8> {
        v.to_be_bytes().to_vec()
    }

    fn dirty_cells(store: &MemoryStore) -> usize {
        store
            .get(&Get::new("r").add_family(DIRTY_FAMILY))
            .unwrap()
            .len()
    }

    fn run(
        overlay: &MemoryStore,
        original: &MemoryStore,
        strategy: &CountingIncrement,
    ) -> Result<OperationOutcome> {
        let tid = TransactionId::for_footprint(&footprint());
        run_row_locked(
            overlay,
            original,
            b"r",
            &footprint(),
            &tid,
            strategy,
            &LockConfig::new(),
            &VirtualSleeper::new(),
        )
    }

    #[test]
    fn test_direct_when_original_lacks_column() {
        let overlay = MemoryStore::new("overlay");
        let original = MemoryStore::new("original");
        let strategy = CountingIncrement::new(3);

        let outcome = run(&overlay, &original, &strategy).unwrap();
        let result = outcome.into_result().unwrap();
        assert_eq!(result.value(b"cf", b"n"), Some(&counter(3)[..]));
        assert!(!strategy.staged_path.load(Ordering::SeqCst));
        assert_eq!(dirty_cells(&overlay), 0);
    }

    #[test]
    fn test_staged_copy_up_from_original() {
        let overlay = MemoryStore::new("overlay");
        let original = MemoryStore::new("original");
        original.put(&Put::new("r").add("cf", "n", counter(10))).unwrap();
        let strategy = CountingIncrement::new(5);

        let result = run(&overlay, &original, &strategy)
            .unwrap()
            .into_result()
            .unwrap();
        assert!(strategy.staged_path.load(Ordering::SeqCst));
        assert_eq!(result.len(), 1);
        assert_eq!(result.value(b"cf", b"n"), Some(&counter(15)[..]));

        let stored = overlay.get(&Get::new("r")).unwrap();
        assert_eq!(stored.value(b"cf", b"n"), Some(&counter(15)[..]));
        assert_eq!(dirty_cells(&overlay), 0);
        // Original untouched
        assert_eq!(
            original.get(&Get::new("r")).unwrap().value(b"cf", b"n"),
            Some(&counter(10)[..])
        );
    }

    #[test]
    fn test_second_run_is_direct_after_copy_up() {
        let overlay = MemoryStore::new("overlay");
        let original = MemoryStore::new("original");
        original.put(&Put::new("r").add("cf", "n", counter(10))).unwrap();
        run(&overlay, &original, &CountingIncrement::new(1)).unwrap();

        let second = CountingIncrement::new(1);
        let result = run(&overlay, &original, &second)
            .unwrap()
            .into_result()
            .unwrap();
        assert!(!second.staged_path.load(Ordering::SeqCst));
        assert_eq!(result.value(b"cf", b"n"), Some(&counter(12)[..]));
    }

    #[test]
    fn test_tombstoned_column_starts_from_zero_and_clears_marker() {
        let overlay = MemoryStore::new("overlay");
        let original = MemoryStore::new("original");
        original.put(&Put::new("r").add("cf", "n", counter(10))).unwrap();
        overlay
            .put(&Put::new("r").add(META_FAMILY, tombstone_qualifier(b"cf", b"n"), TOMBSTONE_VALUE))
            .unwrap();
        let strategy = CountingIncrement::new(4);

        let result = run(&overlay, &original, &strategy)
            .unwrap()
            .into_result()
            .unwrap();
        assert!(strategy.staged_path.load(Ordering::SeqCst));
        assert_eq!(result.value(b"cf", b"n"), Some(&counter(4)[..]));
        assert!(overlay
            .get(&Get::new("r").add_family(META_FAMILY))
            .unwrap()
            .is_empty());
        assert_eq!(dirty_cells(&overlay), 0);
    }

    fn hide_behind_tombstone(overlay: &MemoryStore, value: Vec<u8>) {
        overlay
            .mutate_row(
                &RowMutations::new("r")
                    .put(Put::new("r").add("cf", "n", value))
                    .put(Put::new("r").add(
                        META_FAMILY,
                        tombstone_qualifier(b"cf", b"n"),
                        TOMBSTONE_VALUE,
                    )),
            )
            .unwrap();
    }

    #[test]
    fn test_tombstone_hides_physical_cell_from_strategy() {
        let overlay = MemoryStore::new("overlay");
        let original = MemoryStore::new("original");
        original.put(&Put::new("r").add("cf", "n", counter(10))).unwrap();
        hide_behind_tombstone(&overlay, counter(5));

        let strategy = CountingIncrement::new(1);
        let result = run(&overlay, &original, &strategy)
            .unwrap()
            .into_result()
            .unwrap();
        assert!(strategy.staged_path.load(Ordering::SeqCst));
        assert_eq!(result.value(b"cf", b"n"), Some(&counter(1)[..]));

        // Hidden value gone, new value and no marker left behind
        assert_eq!(overlay.versions(b"r", b"cf", b"n").len(), 1);
        let stored = overlay.get(&Get::new("r")).unwrap();
        assert_eq!(stored.value(b"cf", b"n"), Some(&counter(1)[..]));
        assert!(overlay
            .get(&Get::new("r").add_family(META_FAMILY))
            .unwrap()
            .is_empty());
        assert_eq!(dirty_cells(&overlay), 0);
    }

    /// Put `cf:m` if `cf:n` is absent
    struct PutIfAbsent;

    impl PutIfAbsent {
        fn apply(&self, overlay: &dyn Store, family: &[u8], qualifier: &[u8]) -> Result<OperationOutcome> {
            let check = overlay_core::Check::absent("r", family, qualifier);
            let mutations = RowMutations::new("r").put(Put::new("r").add("cf", "m", "set"));
            overlay
                .check_and_mutate(&check, &mutations)
                .map(OperationOutcome::Checked)
        }
    }

    impl OperationStrategy for PutIfAbsent {
        fn kind(&self) -> OperationKind {
            OperationKind::CheckAndAct
        }

        fn run_direct(&self, overlay: &dyn Store, _row: &ResolvedRow) -> Result<OperationOutcome> {
            self.apply(overlay, b"cf", b"n")
        }

        fn run_staged(
            &self,
            overlay: &dyn Store,
            _row: &ResolvedRow,
            staging: &StagingMap,
        ) -> Result<OperationOutcome> {
            match staging.get(b"cf", b"n") {
                Some(staged) => self.apply(overlay, DIRTY_FAMILY, staged),
                None => self.apply(overlay, b"cf", b"n"),
            }
        }
    }

    #[test]
    fn test_check_sees_tombstoned_column_as_absent() {
        let overlay = MemoryStore::new("overlay");
        let original = MemoryStore::new("original");
        hide_behind_tombstone(&overlay, b"hidden".to_vec());

        let tid = TransactionId::for_footprint(&footprint());
        let outcome = run_row_locked(
            &overlay,
            &original,
            b"r",
            &footprint(),
            &tid,
            &PutIfAbsent,
            &LockConfig::new(),
            &VirtualSleeper::new(),
        )
        .unwrap();
        assert_eq!(outcome, OperationOutcome::Checked(true));
        assert_eq!(
            overlay.get(&Get::new("r")).unwrap().value(b"cf", b"m"),
            Some(&b"set"[..])
        );
        assert_eq!(dirty_cells(&overlay), 0);
    }

    #[test]
    fn test_outcome_of_wrong_shape_rejected() {
        let overlay = MemoryStore::new("overlay");
        let original = MemoryStore::new("original");

        struct Confused;
        impl OperationStrategy for Confused {
            fn kind(&self) -> OperationKind {
                OperationKind::Mutation
            }
            fn run_direct(&self, _: &dyn Store, _: &ResolvedRow) -> Result<OperationOutcome> {
                Ok(OperationOutcome::Checked(true))
            }
            fn run_staged(
                &self,
                _: &dyn Store,
                _: &ResolvedRow,
                _: &StagingMap,
            ) -> Result<OperationOutcome> {
                Ok(OperationOutcome::Checked(true))
            }
        }

        let tid = TransactionId::for_footprint(&footprint());
        let err = run_row_locked(
            &overlay,
            &original,
            b"r",
            &footprint(),
            &tid,
            &Confused,
            &LockConfig::new(),
            &VirtualSleeper::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(dirty_cells(&overlay), 0);
    }

    #[test]
    fn test_colliding_staging_qualifiers_refused() {
        let overlay = MemoryStore::new("overlay");
        let original = MemoryStore::new("original");
        original
            .put(&Put::new("r").add("a", "bc", counter(1)).add("ab", "c", counter(2)))
            .unwrap();
        let mut footprint = ColumnCoordinateSet::new();
        footprint.add_column("r", "a", "bc");
        footprint.add_column("r", "ab", "c");
        let tid = TransactionId::for_footprint(&footprint);

        let err = run_row_locked(
            &overlay,
            &original,
            b"r",
            &footprint,
            &tid,
            &CountingIncrement::new(1),
            &LockConfig::new(),
            &VirtualSleeper::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        // Nothing staged, lock released
        assert!(overlay.get(&Get::new("r")).unwrap().is_empty());
    }

    #[test]
    fn test_cleanup_runs_after_body_error() {
        let overlay = MemoryStore::new("overlay");
        let original = MemoryStore::new("original");
        original.put(&Put::new("r").add("cf", "n", counter(10))).unwrap();
        let strategy = CountingIncrement::failing();

        let err = run(&overlay, &original, &strategy).unwrap_err();
        assert!(err.is_store_error());
        assert!(strategy.staged_path.load(Ordering::SeqCst));
        assert_eq!(dirty_cells(&overlay), 0);
        assert!(overlay
            .get(&Get::new("r").add_column(DIRTY_FAMILY, LOCK_QUALIFIER))
            .unwrap()
            .is_empty());
        assert!(overlay.get(&Get::new("r").add_column("cf", "n")).unwrap().is_empty());
    }

    #[test]
    fn test_footprint_for_other_row_rejected() {
        let overlay = MemoryStore::new("overlay");
        let original = MemoryStore::new("original");
        let mut other = ColumnCoordinateSet::new();
        other.add_column("x", "cf", "n");
        let tid = TransactionId::for_footprint(&other);
        let err = run_row_locked(
            &overlay,
            &original,
            b"r",
            &other,
            &tid,
            &CountingIncrement::new(1),
            &LockConfig::new(),
            &VirtualSleeper::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_staging_map_lookup() {
        let mut map = StagingMap::default();
        map.insert((b"cf".to_vec(), b"q".to_vec()), b"T1cfq".to_vec()).unwrap();
        // Same column again is fine, another column on the same qualifier is not
        map.insert((b"cf".to_vec(), b"q".to_vec()), b"T1cfq".to_vec()).unwrap();
        assert!(map.insert((b"c".to_vec(), b"fq".to_vec()), b"T1cfq".to_vec()).is_err());
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(b"cf", b"q"), Some(&b"T1cfq"[..]));
        assert_eq!(map.real_column(b"T1cfq"), Some((&b"cf"[..], &b"q"[..])));
        assert_eq!(map.real_column(b"other"), None);
    }
}
