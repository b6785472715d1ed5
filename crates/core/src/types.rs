//! Cells and per-row results
//!
//! A [`Cell`] is one versioned value at a (row, family, qualifier) coordinate.
//! A [`RowResult`] is what a read returns for a single row: the latest cell of
//! every matching column, ordered by (family, qualifier).
//!
//! Values are opaque bytes. The engine never interprets them except through the
//! store's own increment/append primitives.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Timestamp meaning "let the store assign the current time" on writes
pub const LATEST_TIMESTAMP: u64 = u64::MAX;

/// Delete timestamp reaching every stored version, future-dated ones included
///
/// Stored cells never carry [`LATEST_TIMESTAMP`] since it is resolved on write.
pub const ALL_VERSIONS: u64 = LATEST_TIMESTAMP - 1;

/// Render a byte key the way operators expect to read it in logs
///
/// Printable ASCII is kept as-is, everything else becomes `\xNN`.
pub fn to_string_binary(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..0x7f).contains(&b) && b != b'\\' {
            out.push(b as char);
        } else {
            let _ = write!(out, "\\x{:02X}", b);
        }
    }
    out
}

/// One versioned value at a column coordinate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    /// Row key
    pub row: Vec<u8>,
    /// Column family
    pub family: Vec<u8>,
    /// Column qualifier
    pub qualifier: Vec<u8>,
    /// Version timestamp (epoch millis, or [`LATEST_TIMESTAMP`] in requests)
    pub timestamp: u64,
    /// Opaque value
    pub value: Vec<u8>,
}

impl Cell {
    /// Create a cell whose timestamp is assigned by the store
    pub fn new(
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self::with_timestamp(row, family, qualifier, LATEST_TIMESTAMP, value)
    }

    /// Create a cell with an explicit timestamp
    pub fn with_timestamp(
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        timestamp: u64,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            timestamp,
            value: value.into(),
        }
    }

    /// True if this cell sits at (family, qualifier)
    #[inline]
    pub fn matches(&self, family: &[u8], qualifier: &[u8]) -> bool {
        self.family == family && self.qualifier == qualifier
    }
}

/// Cells of one row, sorted by (family, qualifier), one cell per column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowResult {
    row: Vec<u8>,
    cells: Vec<Cell>,
}

impl RowResult {
    /// An empty result for `row` (the row reads as absent)
    pub fn empty(row: impl Into<Vec<u8>>) -> Self {
        Self {
            row: row.into(),
            cells: Vec::new(),
        }
    }

    /// Build a result from arbitrary cells
    ///
    /// Cells are sorted by (family, qualifier). When a column appears more than
    /// once the cell with the highest timestamp is kept.
    pub fn from_cells(row: impl Into<Vec<u8>>, mut cells: Vec<Cell>) -> Self {
        cells.sort_by(|a, b| {
            a.family
                .cmp(&b.family)
                .then_with(|| a.qualifier.cmp(&b.qualifier))
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        cells.dedup_by(|later, earlier| {
            later.family == earlier.family && later.qualifier == earlier.qualifier
        });
        Self {
            row: row.into(),
            cells,
        }
    }

    /// Row key
    pub fn row(&self) -> &[u8] {
        &self.row
    }

    /// All cells in (family, qualifier) order
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Consume into the cell list
    pub fn into_cells(self) -> Vec<Cell> {
        self.cells
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True if the row has no cells
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The cell at (family, qualifier), if present
    pub fn cell(&self, family: &[u8], qualifier: &[u8]) -> Option<&Cell> {
        self.cells
            .binary_search_by(|c| {
                c.family
                    .as_slice()
                    .cmp(family)
                    .then_with(|| c.qualifier.as_slice().cmp(qualifier))
            })
            .ok()
            .map(|idx| &self.cells[idx])
    }

    /// The value at (family, qualifier), if present
    pub fn value(&self, family: &[u8], qualifier: &[u8]) -> Option<&[u8]> {
        self.cell(family, qualifier).map(|c| c.value.as_slice())
    }

    /// True if (family, qualifier) is present
    pub fn contains_column(&self, family: &[u8], qualifier: &[u8]) -> bool {
        self.cell(family, qualifier).is_some()
    }

    /// All cells of one family
    pub fn family_cells<'a>(&'a self, family: &'a [u8]) -> impl Iterator<Item = &'a Cell> + 'a {
        self.cells.iter().filter(move |c| c.family == family)
    }
}
