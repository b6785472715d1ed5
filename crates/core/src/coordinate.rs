//! Column coordinates and the canonical coordinate set
//!
//! A [`ColumnCoordinate`] names one (row, family, qualifier) column. A
//! [`ColumnCoordinateSet`] is the declared footprint of an operation: which
//! columns it reads or writes. Insertion order is irrelevant; iteration follows
//! the canonical ordering below.
//!
//! # Ordering
//!
//! Row first, then family, then qualifier, all byte-lexicographic. A
//! [`CoordinateKind::Placeholder`] with an empty family sorts after every other
//! coordinate of the same row. There is no lexicographically last column, so
//! this is how "the end of this row" is expressed when a coordinate stands for
//! a whole row rather than one column.
//!
//! The kind is otherwise ignored: a placeholder and a cell-derived coordinate
//! for the same column compare equal and deduplicate.

use std::cmp::Ordering;
use std::collections::btree_set;
use std::collections::BTreeSet;

use crate::types::Cell;

/// How a coordinate was built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinateKind {
    /// Derived from a real cell
    Column,
    /// Built from bare (row, family, qualifier) for comparison purposes only
    Placeholder,
}

/// One (row, family, qualifier) reference
#[derive(Debug, Clone)]
pub struct ColumnCoordinate {
    /// Row key
    pub row: Vec<u8>,
    /// Column family (empty for a whole-row placeholder)
    pub family: Vec<u8>,
    /// Column qualifier
    pub qualifier: Vec<u8>,
    /// Construction kind
    pub kind: CoordinateKind,
}

impl ColumnCoordinate {
    /// A coordinate for an existing column
    pub fn column(
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            kind: CoordinateKind::Column,
        }
    }

    /// A comparison-only placeholder
    pub fn placeholder(
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            kind: CoordinateKind::Placeholder,
        }
    }

    /// Family and qualifier as a pair of slices
    pub fn column_ref(&self) -> (&[u8], &[u8]) {
        (&self.family, &self.qualifier)
    }

    fn is_row_end(&self) -> bool {
        self.family.is_empty() && self.kind == CoordinateKind::Placeholder
    }
}

impl From<&Cell> for ColumnCoordinate {
    fn from(cell: &Cell) -> Self {
        Self::column(cell.row.clone(), cell.family.clone(), cell.qualifier.clone())
    }
}

impl Ord for ColumnCoordinate {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_row = self.row.cmp(&other.row);
        if by_row != Ordering::Equal {
            return by_row;
        }
        match (self.is_row_end(), other.is_row_end()) {
            (true, true) => {}
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {}
        }
        self.family
            .cmp(&other.family)
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl PartialOrd for ColumnCoordinate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ColumnCoordinate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ColumnCoordinate {}

/// Deduplicating, canonically ordered set of column coordinates
#[derive(Debug, Clone, Default)]
pub struct ColumnCoordinateSet {
    coordinates: BTreeSet<ColumnCoordinate>,
}

impl ColumnCoordinateSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Footprint of a list of cells
    pub fn from_cells<'a>(cells: impl IntoIterator<Item = &'a Cell>) -> Self {
        let mut set = Self::new();
        for cell in cells {
            set.add_cell(cell);
        }
        set
    }

    /// Insert a coordinate; returns false if an equal one was already present
    pub fn add(&mut self, coordinate: ColumnCoordinate) -> bool {
        self.coordinates.insert(coordinate)
    }

    /// Insert the coordinate of an existing cell
    pub fn add_cell(&mut self, cell: &Cell) -> bool {
        self.add(ColumnCoordinate::from(cell))
    }

    /// Insert a placeholder for (row, family, qualifier)
    pub fn add_column(
        &mut self,
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
    ) -> bool {
        self.add(ColumnCoordinate::placeholder(row, family, qualifier))
    }

    /// Insert every coordinate of another set
    pub fn add_all(&mut self, other: &ColumnCoordinateSet) {
        for coordinate in other {
            self.coordinates.insert(coordinate.clone());
        }
    }

    /// Insert every coordinate of an iterator
    pub fn extend<I: IntoIterator<Item = ColumnCoordinate>>(&mut self, iter: I) {
        self.coordinates.extend(iter);
    }

    /// True if an equal coordinate is present
    pub fn contains(&self, coordinate: &ColumnCoordinate) -> bool {
        self.coordinates.contains(coordinate)
    }

    /// True if (row, family, qualifier) is present
    pub fn contains_column(&self, row: &[u8], family: &[u8], qualifier: &[u8]) -> bool {
        self.contains(&ColumnCoordinate::placeholder(row, family, qualifier))
    }

    /// Number of distinct coordinates
    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    /// True if the set is empty
    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// Iterate in canonical order
    pub fn iter(&self) -> btree_set::Iter<'_, ColumnCoordinate> {
        self.coordinates.iter()
    }
}

impl<'a> IntoIterator for &'a ColumnCoordinateSet {
    type Item = &'a ColumnCoordinate;
    type IntoIter = btree_set::Iter<'a, ColumnCoordinate>;

    fn into_iter(self) -> Self::IntoIter {
        self.coordinates.iter()
    }
}

impl IntoIterator for ColumnCoordinateSet {
    type Item = ColumnCoordinate;
    type IntoIter = btree_set::IntoIter<ColumnCoordinate>;

    fn into_iter(self) -> Self::IntoIter {
        self.coordinates.into_iter()
    }
}

impl FromIterator<ColumnCoordinate> for ColumnCoordinateSet {
    fn from_iter<I: IntoIterator<Item = ColumnCoordinate>>(iter: I) -> Self {
        Self {
            coordinates: iter.into_iter().collect(),
        }
    }
}
