//! Edit journal used for replication
//!
//! Every state change a [`MemoryStore`](crate::MemoryStore) applies can be
//! recorded as one [`JournalEntry`]: the resolved edits of a single atomic row
//! mutation, with store-assigned timestamps already filled in. Replication
//! replays entries in order against the target table.

use overlay_core::Cell;

/// One resolved change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Write a cell at its (resolved) timestamp
    Put(Cell),
    /// Remove versions of one column at or below `timestamp`
    DeleteColumn {
        /// Row key
        row: Vec<u8>,
        /// Column family
        family: Vec<u8>,
        /// Column qualifier
        qualifier: Vec<u8>,
        /// Upper bound on removed versions
        timestamp: u64,
    },
    /// Remove versions of every column of a family at or below `timestamp`
    DeleteFamily {
        /// Row key
        row: Vec<u8>,
        /// Column family
        family: Vec<u8>,
        /// Upper bound on removed versions
        timestamp: u64,
    },
    /// Remove versions of every column of a row at or below `timestamp`
    DeleteRow {
        /// Row key
        row: Vec<u8>,
        /// Upper bound on removed versions
        timestamp: u64,
    },
}

impl Edit {
    /// Row the edit applies to
    pub fn row(&self) -> &[u8] {
        match self {
            Edit::Put(cell) => &cell.row,
            Edit::DeleteColumn { row, .. }
            | Edit::DeleteFamily { row, .. }
            | Edit::DeleteRow { row, .. } => row,
        }
    }

    /// Family the edit applies to; `None` for whole-row deletes
    pub fn family(&self) -> Option<&[u8]> {
        match self {
            Edit::Put(cell) => Some(&cell.family),
            Edit::DeleteColumn { family, .. } | Edit::DeleteFamily { family, .. } => Some(family),
            Edit::DeleteRow { .. } => None,
        }
    }

    /// Approximate wire size, used for backlog accounting
    pub fn size_bytes(&self) -> u64 {
        const TIMESTAMP: usize = 8;
        let len = match self {
            Edit::Put(cell) => {
                cell.row.len() + cell.family.len() + cell.qualifier.len() + TIMESTAMP + cell.value.len()
            }
            Edit::DeleteColumn {
                row,
                family,
                qualifier,
                ..
            } => row.len() + family.len() + qualifier.len() + TIMESTAMP,
            Edit::DeleteFamily { row, family, .. } => row.len() + family.len() + TIMESTAMP,
            Edit::DeleteRow { row, .. } => row.len() + TIMESTAMP,
        };
        len as u64
    }
}

/// Edits of one atomic row mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalEntry {
    /// Resolved edits, applied in order
    pub edits: Vec<Edit>,
}

impl JournalEntry {
    /// Total approximate size of the entry
    pub fn size_bytes(&self) -> u64 {
        self.edits.iter().map(Edit::size_bytes).sum()
    }

    /// Copy of the entry keeping only edits whose family passes `keep`
    ///
    /// Whole-row deletes are always kept.
    pub fn filtered(&self, mut keep: impl FnMut(&[u8]) -> bool) -> JournalEntry {
        JournalEntry {
            edits: self
                .edits
                .iter()
                .filter(|e| e.family().map_or(true, &mut keep))
                .cloned()
                .collect(),
        }
    }

    /// True if the entry carries no edits
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }
}
