//! Overlay write translation and protocol strategies
//!
//! A user write never lands in the overlay as given:
//!
//! - a put also deletes the tombstones of the columns it writes
//! - a delete becomes column deletes of what the overlay physically holds plus
//!   tombstones for everything the merged view shows
//!
//! The strategies here implement [`OperationStrategy`] for the operations that
//! must see the original's value first (increment, append, check-and-put,
//! check-and-delete).

use std::collections::BTreeSet;

use overlay_concurrency::{
    OperationKind, OperationOutcome, OperationStrategy, ResolvedRow, StagingMap,
};
use overlay_core::layout::{tombstone_qualifier, DIRTY_FAMILY, META_FAMILY, TOMBSTONE_VALUE};
use overlay_core::{
    Append, Check, Delete, DeleteTarget, Get, Increment, Mutation, Put, Result, RowMutations,
    Store, LATEST_TIMESTAMP,
};

use crate::merge::{real_columns, tombstones};

type Column = (Vec<u8>, Vec<u8>);

// ============================================================================
// Write translation
// ============================================================================

/// Overlay mutations for a user put: the cells, then tombstone removal
pub fn put_mutations(put: &Put) -> Vec<Mutation> {
    let mut clear = Delete::new(put.row.clone());
    let mut seen = BTreeSet::new();
    for cell in &put.cells {
        if seen.insert((cell.family.as_slice(), cell.qualifier.as_slice())) {
            clear = clear.add_column(META_FAMILY, tombstone_qualifier(&cell.family, &cell.qualifier));
        }
    }
    let mut mutations = vec![Mutation::Put(put.clone())];
    if !clear.targets.is_empty() {
        mutations.push(Mutation::Delete(clear));
    }
    mutations
}

/// Overlay mutations for a user delete
///
/// Named columns are deleted and tombstoned without reading anything. Family
/// and whole-row targets are resolved to the columns visible in the merged
/// view (the original's columns and the overlay's real columns, plus
/// `pending` columns written earlier in the same row mutation). Only columns
/// the overlay physically holds get a column delete; every resolved column
/// gets a tombstone.
///
/// The column delete reaches every version up to the write time whatever
/// timestamp the request names: the tombstone hides the whole column, so an
/// older request timestamp must not leave a newer version underneath it.
///
/// # Errors
///
/// Returns the error of a failing resolution read.
pub fn delete_mutations(
    overlay: &dyn Store,
    original: &dyn Store,
    delete: &Delete,
    pending: &BTreeSet<Column>,
) -> Result<Vec<Mutation>> {
    let mut doomed: BTreeSet<Column> = BTreeSet::new();
    let mut hidden: BTreeSet<Column> = BTreeSet::new();
    let mut families: Vec<&[u8]> = Vec::new();

    for target in &delete.targets {
        match target {
            DeleteTarget::Column { family, qualifier } => {
                doomed.insert((family.clone(), qualifier.clone()));
                hidden.insert((family.clone(), qualifier.clone()));
            }
            DeleteTarget::Family(family) => families.push(family),
        }
    }

    let whole_row = delete.is_whole_row();
    if whole_row || !families.is_empty() {
        let in_scope = |family: &[u8]| whole_row || families.iter().any(|f| *f == family);

        let mut overlay_get = Get::new(delete.row.clone());
        let mut original_get = Get::new(delete.row.clone());
        if !whole_row {
            overlay_get = overlay_get.add_family(META_FAMILY);
            for family in &families {
                overlay_get = overlay_get.add_family(family.to_vec());
                original_get = original_get.add_family(family.to_vec());
            }
        }

        let overlay_row = overlay.get(&overlay_get)?;
        let original_row = original.get(&original_get)?;
        let tombstoned = tombstones(&overlay_row);

        for column in real_columns(&overlay_row) {
            if !tombstoned.contains(&column) {
                hidden.insert(column.clone());
            }
            doomed.insert(column);
        }
        for cell in original_row.cells() {
            hidden.insert((cell.family.clone(), cell.qualifier.clone()));
        }
        for column in pending.iter().filter(|(f, _)| in_scope(f.as_slice())) {
            doomed.insert(column.clone());
            hidden.insert(column.clone());
        }
    }

    let mut mutations = Vec::with_capacity(2);
    if !doomed.is_empty() {
        let mut removal = Delete::new(delete.row.clone());
        for (family, qualifier) in doomed {
            removal = removal.add_column(family, qualifier);
        }
        mutations.push(Mutation::Delete(removal));
    }
    if !hidden.is_empty() {
        let mut markers = Put::new(delete.row.clone());
        for (family, qualifier) in &hidden {
            markers = markers.add_with_timestamp(
                META_FAMILY,
                tombstone_qualifier(family, qualifier),
                LATEST_TIMESTAMP,
                TOMBSTONE_VALUE,
            );
        }
        mutations.push(Mutation::Put(markers));
    }
    Ok(mutations)
}

/// Wrap translated mutations for one row
pub(crate) fn row_mutations(row: &[u8], mutations: Vec<Mutation>) -> RowMutations {
    let mut out = RowMutations::new(row);
    for mutation in mutations {
        out.push(mutation);
    }
    out
}

/// The check to evaluate: on the staged copy if the column was staged
fn effective_check(check: &Check, staging: Option<&StagingMap>) -> Check {
    match staging.and_then(|s| s.get(&check.family, &check.qualifier)) {
        Some(staged) => Check {
            row: check.row.clone(),
            family: DIRTY_FAMILY.to_vec(),
            qualifier: staged.to_vec(),
            expected: check.expected.clone(),
        },
        None => check.clone(),
    }
}

// ============================================================================
// Mutation strategies
// ============================================================================

/// Counter increment, staged columns incremented in place
pub struct IncrementStrategy<'a> {
    increment: &'a Increment,
}

impl<'a> IncrementStrategy<'a> {
    /// Strategy for `increment`
    pub fn new(increment: &'a Increment) -> Self {
        Self { increment }
    }
}

impl OperationStrategy for IncrementStrategy<'_> {
    fn kind(&self) -> OperationKind {
        OperationKind::Mutation
    }

    fn run_direct(&self, overlay: &dyn Store, _row: &ResolvedRow) -> Result<OperationOutcome> {
        overlay.increment(self.increment).map(OperationOutcome::Mutated)
    }

    fn run_staged(
        &self,
        overlay: &dyn Store,
        _row: &ResolvedRow,
        staging: &StagingMap,
    ) -> Result<OperationOutcome> {
        let mut retargeted = Increment::new(self.increment.row.clone());
        for (family, qualifier, amount) in &self.increment.columns {
            retargeted = match staging.get(family, qualifier) {
                Some(staged) => retargeted.add(DIRTY_FAMILY, staged, *amount),
                None => retargeted.add(family.clone(), qualifier.clone(), *amount),
            };
        }
        overlay.increment(&retargeted).map(OperationOutcome::Mutated)
    }
}

/// Byte append, staged columns appended in place
pub struct AppendStrategy<'a> {
    append: &'a Append,
}

impl<'a> AppendStrategy<'a> {
    /// Strategy for `append`
    pub fn new(append: &'a Append) -> Self {
        Self { append }
    }
}

impl OperationStrategy for AppendStrategy<'_> {
    fn kind(&self) -> OperationKind {
        OperationKind::Mutation
    }

    fn run_direct(&self, overlay: &dyn Store, _row: &ResolvedRow) -> Result<OperationOutcome> {
        overlay.append(self.append).map(OperationOutcome::Mutated)
    }

    fn run_staged(
        &self,
        overlay: &dyn Store,
        _row: &ResolvedRow,
        staging: &StagingMap,
    ) -> Result<OperationOutcome> {
        let mut retargeted = Append::new(self.append.row.clone());
        for (family, qualifier, suffix) in &self.append.columns {
            retargeted = match staging.get(family, qualifier) {
                Some(staged) => retargeted.add(DIRTY_FAMILY, staged, suffix.clone()),
                None => retargeted.add(family.clone(), qualifier.clone(), suffix.clone()),
            };
        }
        overlay.append(&retargeted).map(OperationOutcome::Mutated)
    }
}

// ============================================================================
// Check-and-act strategies
// ============================================================================

/// Compare-and-swap put whose mutation also clears the put columns' tombstones
pub struct CheckAndPutStrategy<'a> {
    check: &'a Check,
    mutations: RowMutations,
}

impl<'a> CheckAndPutStrategy<'a> {
    /// Strategy applying `put` when `check` holds in the merged view
    pub fn new(check: &'a Check, put: &Put) -> Self {
        Self {
            check,
            mutations: row_mutations(&put.row, put_mutations(put)),
        }
    }
}

impl OperationStrategy for CheckAndPutStrategy<'_> {
    fn kind(&self) -> OperationKind {
        OperationKind::CheckAndAct
    }

    fn run_direct(&self, overlay: &dyn Store, _row: &ResolvedRow) -> Result<OperationOutcome> {
        overlay
            .check_and_mutate(self.check, &self.mutations)
            .map(OperationOutcome::Checked)
    }

    fn run_staged(
        &self,
        overlay: &dyn Store,
        _row: &ResolvedRow,
        staging: &StagingMap,
    ) -> Result<OperationOutcome> {
        let check = effective_check(self.check, Some(staging));
        overlay
            .check_and_mutate(&check, &self.mutations)
            .map(OperationOutcome::Checked)
    }
}

/// Compare-and-swap delete; the delete is resolved under the row lock
pub struct CheckAndDeleteStrategy<'a> {
    check: &'a Check,
    delete: &'a Delete,
    original: &'a dyn Store,
}

impl<'a> CheckAndDeleteStrategy<'a> {
    /// Strategy applying `delete` when `check` holds in the merged view
    pub fn new(check: &'a Check, delete: &'a Delete, original: &'a dyn Store) -> Self {
        Self {
            check,
            delete,
            original,
        }
    }

    fn apply(&self, overlay: &dyn Store, check: &Check) -> Result<OperationOutcome> {
        let mutations = delete_mutations(overlay, self.original, self.delete, &BTreeSet::new())?;
        let mutations = row_mutations(&self.delete.row, mutations);
        overlay
            .check_and_mutate(check, &mutations)
            .map(OperationOutcome::Checked)
    }
}

impl OperationStrategy for CheckAndDeleteStrategy<'_> {
    fn kind(&self) -> OperationKind {
        OperationKind::CheckAndAct
    }

    fn run_direct(&self, overlay: &dyn Store, _row: &ResolvedRow) -> Result<OperationOutcome> {
        self.apply(overlay, self.check)
    }

    fn run_staged(
        &self,
        overlay: &dyn Store,
        _row: &ResolvedRow,
        staging: &StagingMap,
    ) -> Result<OperationOutcome> {
        let check = effective_check(self.check, Some(staging));
        self.apply(overlay, &check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_storage::MemoryStore;

    fn puts_tombstones(mutations: &[Mutation]) -> BTreeSet<Vec<u8>> {
        mutations
            .iter()
            .filter_map(|m| match m {
                Mutation::Put(p) => Some(p),
                _ => None,
            })
            .flat_map(|p| p.cells.iter())
            .filter(|c| c.family == META_FAMILY)
            .map(|c| c.qualifier.clone())
            .collect()
    }

    #[test]
    fn put_clears_each_column_once() {
        let put = Put::new("r").add("cf", "a", "1").add("cf", "a", "2").add("cf", "b", "3");
        let mutations = put_mutations(&put);
        assert_eq!(mutations.len(), 2);
        match &mutations[1] {
            Mutation::Delete(d) => assert_eq!(d.targets.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn column_delete_needs_no_reads() {
        let overlay = MemoryStore::new("overlay").with_families(["other"]);
        let original = MemoryStore::new("original").with_families(["other"]);
        // Reads of "cf" would fail on these stores
        let delete = Delete::new("r").add_column("cf", "q");
        let mutations = delete_mutations(&overlay, &original, &delete, &BTreeSet::new()).unwrap();
        assert_eq!(puts_tombstones(&mutations), BTreeSet::from([b"cf:q".to_vec()]));
    }

    #[test]
    fn row_delete_resolves_visible_columns() {
        let overlay = MemoryStore::new("overlay");
        let original = MemoryStore::new("original");
        original.put(&Put::new("r").add("cf", "a", "1").add("cf2", "b", "2")).unwrap();
        overlay.put(&Put::new("r").add("cf", "c", "3")).unwrap();

        let mutations = delete_mutations(&overlay, &original, &Delete::new("r"), &BTreeSet::new()).unwrap();
        assert_eq!(
            puts_tombstones(&mutations),
            BTreeSet::from([b"cf:a".to_vec(), b"cf2:b".to_vec(), b"cf:c".to_vec()])
        );
        match &mutations[0] {
            Mutation::Delete(d) => {
                assert_eq!(
                    d.targets,
                    vec![DeleteTarget::Column {
                        family: b"cf".to_vec(),
                        qualifier: b"c".to_vec()
                    }]
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn family_delete_stays_in_family_and_includes_pending() {
        let overlay = MemoryStore::new("overlay");
        let original = MemoryStore::new("original");
        original.put(&Put::new("r").add("cf", "a", "1").add("cf2", "b", "2")).unwrap();

        let pending = BTreeSet::from([(b"cf".to_vec(), b"new".to_vec()), (b"cf2".to_vec(), b"x".to_vec())]);
        let delete = Delete::new("r").add_family("cf");
        let mutations = delete_mutations(&overlay, &original, &delete, &pending).unwrap();
        assert_eq!(
            puts_tombstones(&mutations),
            BTreeSet::from([b"cf:a".to_vec(), b"cf:new".to_vec()])
        );
    }

    #[test]
    fn nothing_visible_means_no_mutations() {
        let overlay = MemoryStore::new("overlay");
        let original = MemoryStore::new("original");
        let mutations = delete_mutations(&overlay, &original, &Delete::new("r"), &BTreeSet::new()).unwrap();
        assert!(mutations.is_empty());
    }

    #[test]
    fn unstaged_check_is_unchanged() {
        let check = Check::equals("r", "cf", "q", "v");
        assert_eq!(effective_check(&check, None), check);
        assert_eq!(
            effective_check(&check, Some(&StagingMap::default())),
            check
        );
    }
}
