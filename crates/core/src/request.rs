//! Read and write request shapes
//!
//! These mirror what a column-family store accepts on the wire: point gets,
//! range scans, puts, deletes, counters, appends and atomic row mutations. Every
//! request targets exactly one row except [`Scan`].
//!
//! Write requests can describe their column footprint as a
//! [`ColumnCoordinateSet`], which is what the row-locked protocol resolves
//! before running them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coordinate::ColumnCoordinateSet;
use crate::types::{to_string_binary, Cell, LATEST_TIMESTAMP};

// ============================================================================
// Column filter
// ============================================================================

/// Family/column restriction shared by [`Get`] and [`Scan`]
///
/// An empty filter selects every column. A family mapped to `None` selects the
/// whole family; a family mapped to a set selects only those qualifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFilter {
    families: BTreeMap<Vec<u8>, Option<BTreeSet<Vec<u8>>>>,
}

impl ColumnFilter {
    /// Filter selecting every column
    pub fn all() -> Self {
        Self::default()
    }

    /// Select a whole family
    pub fn add_family(&mut self, family: impl Into<Vec<u8>>) -> &mut Self {
        self.families.insert(family.into(), None);
        self
    }

    /// Select one column
    ///
    /// Has no effect if the whole family is already selected.
    pub fn add_column(
        &mut self,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
    ) -> &mut Self {
        let entry = self
            .families
            .entry(family.into())
            .or_insert_with(|| Some(BTreeSet::new()));
        if let Some(qualifiers) = entry {
            qualifiers.insert(qualifier.into());
        }
        self
    }

    /// True if no restriction applies
    pub fn is_all(&self) -> bool {
        self.families.is_empty()
    }

    /// True if every selected family lists explicit qualifiers
    pub fn is_explicit_columns(&self) -> bool {
        !self.families.is_empty() && self.families.values().all(Option::is_some)
    }

    /// True if (family, qualifier) passes the filter
    pub fn matches(&self, family: &[u8], qualifier: &[u8]) -> bool {
        if self.families.is_empty() {
            return true;
        }
        match self.families.get(family) {
            None => false,
            Some(None) => true,
            Some(Some(qualifiers)) => qualifiers.contains(qualifier),
        }
    }

    /// True if the family is selected, wholly or in part
    pub fn includes_family(&self, family: &[u8]) -> bool {
        self.families.is_empty() || self.families.contains_key(family)
    }

    /// Selected families
    pub fn families(&self) -> impl Iterator<Item = &[u8]> {
        self.families.keys().map(Vec::as_slice)
    }

    /// Explicitly named (family, qualifier) pairs
    pub fn columns(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.families.iter().flat_map(|(family, qualifiers)| {
            qualifiers
                .iter()
                .flatten()
                .map(move |q| (family.as_slice(), q.as_slice()))
        })
    }
}

// ============================================================================
// Reads
// ============================================================================

/// Point read of one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Get {
    /// Row key
    pub row: Vec<u8>,
    /// Column restriction
    pub filter: ColumnFilter,
}

impl Get {
    /// Read every column of `row`
    pub fn new(row: impl Into<Vec<u8>>) -> Self {
        Self {
            row: row.into(),
            filter: ColumnFilter::all(),
        }
    }

    /// Restrict to a whole family
    pub fn add_family(mut self, family: impl Into<Vec<u8>>) -> Self {
        self.filter.add_family(family);
        self
    }

    /// Restrict to one column
    pub fn add_column(mut self, family: impl Into<Vec<u8>>, qualifier: impl Into<Vec<u8>>) -> Self {
        self.filter.add_column(family, qualifier);
        self
    }
}

/// Forward range scan, `start_row` inclusive, `stop_row` exclusive
///
/// An empty `stop_row` means "to the end of the table".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scan {
    /// First row key included
    pub start_row: Vec<u8>,
    /// First row key excluded (empty = unbounded)
    pub stop_row: Vec<u8>,
    /// Column restriction
    pub filter: ColumnFilter,
}

impl Scan {
    /// Scan the whole table
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `[start, stop)`
    pub fn range(start: impl Into<Vec<u8>>, stop: impl Into<Vec<u8>>) -> Self {
        Self {
            start_row: start.into(),
            stop_row: stop.into(),
            filter: ColumnFilter::all(),
        }
    }

    /// Restrict to a whole family
    pub fn add_family(mut self, family: impl Into<Vec<u8>>) -> Self {
        self.filter.add_family(family);
        self
    }

    /// Restrict to one column
    pub fn add_column(mut self, family: impl Into<Vec<u8>>, qualifier: impl Into<Vec<u8>>) -> Self {
        self.filter.add_column(family, qualifier);
        self
    }

    /// True if `row` falls inside the range
    pub fn contains_row(&self, row: &[u8]) -> bool {
        row >= self.start_row.as_slice() && (self.stop_row.is_empty() || row < self.stop_row.as_slice())
    }
}

// ============================================================================
// Writes
// ============================================================================

/// Write of one or more cells into a single row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Put {
    /// Row key
    pub row: Vec<u8>,
    /// Cells to write; every cell carries `row`
    pub cells: Vec<Cell>,
}

impl Put {
    /// Empty put for `row`
    pub fn new(row: impl Into<Vec<u8>>) -> Self {
        Self {
            row: row.into(),
            cells: Vec::new(),
        }
    }

    /// Add a cell stamped by the store
    pub fn add(
        self,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.add_with_timestamp(family, qualifier, LATEST_TIMESTAMP, value)
    }

    /// Add a cell with an explicit timestamp
    pub fn add_with_timestamp(
        mut self,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        timestamp: u64,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        let cell = Cell::with_timestamp(self.row.clone(), family, qualifier, timestamp, value);
        self.cells.push(cell);
        self
    }

    /// True if the put carries no cells
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Columns written by this put
    pub fn footprint(&self) -> ColumnCoordinateSet {
        ColumnCoordinateSet::from_cells(&self.cells)
    }
}

/// One target of a [`Delete`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteTarget {
    /// Every version of one column
    Column {
        /// Column family
        family: Vec<u8>,
        /// Column qualifier
        qualifier: Vec<u8>,
    },
    /// Every column of one family
    Family(Vec<u8>),
}

/// Removal of columns, families or a whole row
///
/// No targets means the whole row. Versions with a timestamp at or below
/// `timestamp` are removed; [`LATEST_TIMESTAMP`] removes all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delete {
    /// Row key
    pub row: Vec<u8>,
    /// Targets; empty = whole row
    pub targets: Vec<DeleteTarget>,
    /// Upper bound on removed versions
    pub timestamp: u64,
}

impl Delete {
    /// Delete the whole row
    pub fn new(row: impl Into<Vec<u8>>) -> Self {
        Self {
            row: row.into(),
            targets: Vec::new(),
            timestamp: LATEST_TIMESTAMP,
        }
    }

    /// Add a column target
    pub fn add_column(mut self, family: impl Into<Vec<u8>>, qualifier: impl Into<Vec<u8>>) -> Self {
        self.targets.push(DeleteTarget::Column {
            family: family.into(),
            qualifier: qualifier.into(),
        });
        self
    }

    /// Add a family target
    pub fn add_family(mut self, family: impl Into<Vec<u8>>) -> Self {
        self.targets.push(DeleteTarget::Family(family.into()));
        self
    }

    /// Only remove versions at or below `timestamp`
    pub fn at_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// True if this deletes the whole row
    pub fn is_whole_row(&self) -> bool {
        self.targets.is_empty()
    }
}

/// One mutation inside a [`RowMutations`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Write cells
    Put(Put),
    /// Remove cells
    Delete(Delete),
}

impl Mutation {
    /// Row targeted by the mutation
    pub fn row(&self) -> &[u8] {
        match self {
            Mutation::Put(p) => &p.row,
            Mutation::Delete(d) => &d.row,
        }
    }
}

/// Puts and deletes applied atomically, in order, to one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMutations {
    /// Row key
    pub row: Vec<u8>,
    /// Ordered mutations
    pub mutations: Vec<Mutation>,
}

impl RowMutations {
    /// Empty mutation list for `row`
    pub fn new(row: impl Into<Vec<u8>>) -> Self {
        Self {
            row: row.into(),
            mutations: Vec::new(),
        }
    }

    /// Append a put
    pub fn put(mut self, put: Put) -> Self {
        self.mutations.push(Mutation::Put(put));
        self
    }

    /// Append a delete
    pub fn delete(mut self, delete: Delete) -> Self {
        self.mutations.push(Mutation::Delete(delete));
        self
    }

    /// Append any mutation
    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    /// True if there is nothing to apply
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Atomic counter update of one or more columns of a row
///
/// Counters are stored as 8-byte big-endian signed integers; a missing column
/// counts as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Increment {
    /// Row key
    pub row: Vec<u8>,
    /// (family, qualifier, amount) triples
    pub columns: Vec<(Vec<u8>, Vec<u8>, i64)>,
}

impl Increment {
    /// Empty increment for `row`
    pub fn new(row: impl Into<Vec<u8>>) -> Self {
        Self {
            row: row.into(),
            columns: Vec::new(),
        }
    }

    /// Add `amount` to a column
    pub fn add(mut self, family: impl Into<Vec<u8>>, qualifier: impl Into<Vec<u8>>, amount: i64) -> Self {
        self.columns.push((family.into(), qualifier.into(), amount));
        self
    }

    /// Columns touched
    pub fn footprint(&self) -> ColumnCoordinateSet {
        let mut set = ColumnCoordinateSet::new();
        for (family, qualifier, _) in &self.columns {
            set.add_column(self.row.clone(), family.clone(), qualifier.clone());
        }
        set
    }
}

impl fmt::Display for Increment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "increment row={}", to_string_binary(&self.row))?;
        for (family, qualifier, amount) in &self.columns {
            write!(
                f,
                " {}:{}+={}",
                to_string_binary(family),
                to_string_binary(qualifier),
                amount
            )?;
        }
        Ok(())
    }
}

/// Atomic byte append to one or more columns of a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Append {
    /// Row key
    pub row: Vec<u8>,
    /// (family, qualifier, suffix) triples
    pub columns: Vec<(Vec<u8>, Vec<u8>, Vec<u8>)>,
}

impl Append {
    /// Empty append for `row`
    pub fn new(row: impl Into<Vec<u8>>) -> Self {
        Self {
            row: row.into(),
            columns: Vec::new(),
        }
    }

    /// Append `suffix` to a column
    pub fn add(
        mut self,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        suffix: impl Into<Vec<u8>>,
    ) -> Self {
        self.columns.push((family.into(), qualifier.into(), suffix.into()));
        self
    }

    /// Columns touched
    pub fn footprint(&self) -> ColumnCoordinateSet {
        let mut set = ColumnCoordinateSet::new();
        for (family, qualifier, _) in &self.columns {
            set.add_column(self.row.clone(), family.clone(), qualifier.clone());
        }
        set
    }
}

impl fmt::Display for Append {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "append row={}", to_string_binary(&self.row))?;
        for (family, qualifier, suffix) in &self.columns {
            write!(
                f,
                " {}:{}<<{}",
                to_string_binary(family),
                to_string_binary(qualifier),
                to_string_binary(suffix)
            )?;
        }
        Ok(())
    }
}

/// Guard of a check-and-mutate call
///
/// `expected = None` means the column must be absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    /// Row key
    pub row: Vec<u8>,
    /// Column family
    pub family: Vec<u8>,
    /// Column qualifier
    pub qualifier: Vec<u8>,
    /// Expected value, or `None` for absence
    pub expected: Option<Vec<u8>>,
}

impl Check {
    /// The column must hold exactly `value`
    pub fn equals(
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            expected: Some(value.into()),
        }
    }

    /// The column must not exist
    pub fn absent(
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            expected: None,
        }
    }

    /// True if `current` satisfies the guard
    pub fn is_satisfied_by(&self, current: Option<&[u8]>) -> bool {
        current == self.expected.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_all_matches_everything() {
        let filter = ColumnFilter::all();
        assert!(filter.is_all());
        assert!(filter.matches(b"any", b"thing"));
        assert!(!filter.is_explicit_columns());
    }

    #[test]
    fn test_filter_family_and_columns() {
        let mut filter = ColumnFilter::all();
        filter.add_family("a").add_column("b", "x");
        assert!(filter.matches(b"a", b"anything"));
        assert!(filter.matches(b"b", b"x"));
        assert!(!filter.matches(b"b", b"y"));
        assert!(!filter.matches(b"c", b"x"));
        assert!(!filter.is_explicit_columns());
        assert_eq!(filter.columns().count(), 1);
    }

    #[test]
    fn test_filter_whole_family_absorbs_columns() {
        let mut filter = ColumnFilter::all();
        filter.add_family("a").add_column("a", "x");
        assert!(filter.matches(b"a", b"y"));
        assert_eq!(filter.columns().count(), 0);
    }

    #[test]
    fn test_scan_range_contains_row() {
        let scan = Scan::range("b", "d");
        assert!(!scan.contains_row(b"a"));
        assert!(scan.contains_row(b"b"));
        assert!(scan.contains_row(b"c"));
        assert!(!scan.contains_row(b"d"));
        assert!(Scan::new().contains_row(b"zzz"));
    }

    #[test]
    fn test_put_cells_carry_row() {
        let put = Put::new("r").add("cf", "a", "1").add_with_timestamp("cf", "b", 7, "2");
        assert_eq!(put.cells.len(), 2);
        assert!(put.cells.iter().all(|c| c.row == b"r"));
        assert_eq!(put.cells[1].timestamp, 7);
        assert_eq!(put.footprint().len(), 2);
    }

    #[test]
    fn test_increment_display_is_stable() {
        let inc = Increment::new("r").add("cf", "n", 5);
        assert_eq!(inc.to_string(), "increment row=r cf:n+=5");
        assert_eq!(inc.to_string(), inc.clone().to_string());
    }

    #[test]
    fn test_check_satisfaction() {
        assert!(Check::absent("r", "cf", "q").is_satisfied_by(None));
        assert!(!Check::absent("r", "cf", "q").is_satisfied_by(Some(b"v")));
        assert!(Check::equals("r", "cf", "q", "v").is_satisfied_by(Some(b"v")));
        assert!(!Check::equals("r", "cf", "q", "v").is_satisfied_by(None));
    }
}
