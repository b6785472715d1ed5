//! Per-column version chain
//!
//! Versions are kept newest-first, ordered by timestamp. A write at an existing
//! timestamp replaces that version's value, which is how a column-family store
//! treats two puts to the same (column, timestamp).

use std::collections::VecDeque;

/// One stored version of a column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Version timestamp
    pub timestamp: u64,
    /// Stored value
    pub value: Vec<u8>,
}

/// Versions of one column, newest first
#[derive(Debug, Clone, Default)]
pub struct VersionChain {
    versions: VecDeque<Version>,
}

impl VersionChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self {
            versions: VecDeque::with_capacity(2),
        }
    }

    /// Insert a version, keeping the chain sorted and at most `max_versions` long
    pub fn insert(&mut self, timestamp: u64, value: Vec<u8>, max_versions: usize) {
        // Newest-first: find the first version not newer than `timestamp`
        let pos = self
            .versions
            .iter()
            .position(|v| v.timestamp <= timestamp)
            .unwrap_or(self.versions.len());
        match self.versions.get_mut(pos) {
            Some(existing) if existing.timestamp == timestamp => existing.value = value,
            _ => self.versions.insert(pos, Version { timestamp, value }),
        }
        self.versions.truncate(max_versions.max(1));
    }

    /// Latest version
    #[inline]
    pub fn latest(&self) -> Option<&Version> {
        self.versions.front()
    }

    /// Remove every version at or below `timestamp`
    ///
    /// Returns the number of versions removed.
    pub fn delete_up_to(&mut self, timestamp: u64) -> usize {
        let before = self.versions.len();
        self.versions.retain(|v| v.timestamp > timestamp);
        before - self.versions.len()
    }

    /// Number of versions stored
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    /// True if no version remains
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Versions, newest first
    pub fn iter(&self) -> impl Iterator<Item = &Version> {
        self.versions.iter()
    }
}
