//! MemoryStore: in-memory column-family table
//!
//! This module implements the [`Store`] trait using:
//! - `BTreeMap<row, BTreeMap<(family, qualifier), VersionChain>>` for ordered storage
//! - `parking_lot::RwLock` for thread-safe access
//! - a shared [`Clock`] for store-assigned timestamps
//! - an optional [`JournalEntry`] log feeding replication
//!
//! # Design Notes
//!
//! - **Row atomicity**: every mutating call resolves its request into edits and
//!   applies them under one write lock, so readers never see half a mutation.
//! - **Timestamps under the lock**: the clock ticks while the write lock is held,
//!   so application order and timestamp order agree within a table.
//! - **Physical deletes**: deletes remove versions at or below their timestamp.
//!   There are no delete markers masking later writes.
//! - **Family schema**: a store built with families rejects reads and writes
//!   naming any other family. A store built without one accepts anything.
//! - **Batched scans**: the scanner copies a bounded batch of rows per lock
//!   acquisition and releases the lock between batches.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::Bound;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use overlay_core::{
    to_string_binary, Append, Cell, Check, ColumnFilter, Delete, DeleteTarget, Error, Get,
    Increment, Mutation, Put, Result, RowCursor, RowMutations, RowResult, Scan, Store,
    LATEST_TIMESTAMP,
};

use crate::chain::{Version, VersionChain};
use crate::clock::Clock;
use crate::journal::{Edit, JournalEntry};

/// Default number of versions kept per column
pub const DEFAULT_MAX_VERSIONS: usize = 3;

/// Default number of rows a scanner copies per lock acquisition
pub const DEFAULT_SCAN_BATCH: usize = 64;

type RowData = BTreeMap<(Vec<u8>, Vec<u8>), VersionChain>;
type TableData = BTreeMap<Vec<u8>, RowData>;

/// In-memory table implementing every [`Store`] primitive atomically per row
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    /// Row key -> columns -> versions
    data: RwLock<TableData>,
    /// Known families; `None` accepts any family
    families: RwLock<Option<BTreeSet<Vec<u8>>>>,
    clock: Arc<Clock>,
    max_versions: usize,
    scan_batch: usize,
    /// Applied edits, in order; `None` when journaling is off
    journal: Option<Mutex<Vec<JournalEntry>>>,
}

impl MemoryStore {
    /// Create a schema-free table with its own clock and no journal
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: RwLock::new(BTreeMap::new()),
            families: RwLock::new(None),
            clock: Arc::new(Clock::new()),
            max_versions: DEFAULT_MAX_VERSIONS,
            scan_batch: DEFAULT_SCAN_BATCH,
            journal: None,
        }
    }

    /// Restrict the table to the given families
    pub fn with_families<I, F>(self, families: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Vec<u8>>,
    {
        let set = families.into_iter().map(Into::into).collect();
        *self.families.write() = Some(set);
        self
    }

    /// Share a clock with other tables
    pub fn with_clock(mut self, clock: Arc<Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record every applied mutation for replication
    pub fn with_journal(mut self) -> Self {
        self.journal = Some(Mutex::new(Vec::new()));
        self
    }

    /// Number of versions kept per column (at least 1)
    pub fn with_max_versions(mut self, max_versions: usize) -> Self {
        self.max_versions = max_versions.max(1);
        self
    }

    /// Rows copied per scanner batch (at least 1)
    pub fn with_scan_batch(mut self, scan_batch: usize) -> Self {
        self.scan_batch = scan_batch.max(1);
        self
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Families of the table, sorted
    ///
    /// For a schema-free table these are the families currently holding cells.
    pub fn families(&self) -> Vec<Vec<u8>> {
        if let Some(families) = self.families.read().as_ref() {
            return families.iter().cloned().collect();
        }
        let data = self.data.read();
        let mut seen = BTreeSet::new();
        for columns in data.values() {
            for (family, _) in columns.keys() {
                seen.insert(family.clone());
            }
        }
        seen.into_iter().collect()
    }

    /// True if the family is part of the schema (always true without one)
    pub fn has_family(&self, family: &[u8]) -> bool {
        self.families
            .read()
            .as_ref()
            .map_or(true, |families| families.contains(family))
    }

    /// Add a family; returns false if it already existed
    pub fn add_family(&self, family: &[u8]) -> bool {
        let mut families = self.families.write();
        match families.as_mut() {
            Some(set) => set.insert(family.to_vec()),
            None => false,
        }
    }

    /// Drop a family and every cell in it; returns false if it did not exist
    pub fn drop_family(&self, family: &[u8]) -> bool {
        let mut families = self.families.write();
        let existed = match families.as_mut() {
            Some(set) => set.remove(family),
            None => true,
        };
        let mut data = self.data.write();
        for columns in data.values_mut() {
            columns.retain(|(f, _), _| f.as_slice() != family);
        }
        data.retain(|_, columns| !columns.is_empty());
        debug!(
            target: "overlay::store",
            table = %self.name,
            family = %to_string_binary(family),
            "Dropped family"
        );
        existed
    }

    fn check_families<'a>(
        schema: &Option<BTreeSet<Vec<u8>>>,
        table: &str,
        families: impl IntoIterator<Item = &'a [u8]>,
    ) -> Result<()> {
        let Some(known) = schema else {
            return Ok(());
        };
        for family in families {
            if !known.contains(family) {
                return Err(Error::store(format!(
                    "Column family {} does not exist in table {}",
                    to_string_binary(family),
                    table
                )));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Journal
    // ========================================================================

    /// Number of journal entries recorded so far
    pub fn journal_len(&self) -> usize {
        self.journal.as_ref().map_or(0, |j| j.lock().len())
    }

    /// Up to `max` journal entries starting at `offset`
    pub fn journal_entries(&self, offset: usize, max: usize) -> Vec<JournalEntry> {
        match &self.journal {
            Some(journal) => journal.lock().iter().skip(offset).take(max).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Total size of journal entries from `offset`, after filtering by family
    pub fn journal_bytes_since(&self, offset: usize, keep: impl Fn(&[u8]) -> bool) -> u64 {
        match &self.journal {
            Some(journal) => journal
                .lock()
                .iter()
                .skip(offset)
                .map(|entry| entry.filtered(&keep).size_bytes())
                .sum(),
            None => 0,
        }
    }

    /// Apply an entry shipped from another table
    ///
    /// Replicated edits are not journaled again.
    ///
    /// # Errors
    ///
    /// Returns a store error if an edit names a family this table lacks.
    pub fn apply_replicated(&self, entry: &JournalEntry) -> Result<()> {
        let schema = self.families.read();
        Self::check_families(&schema, &self.name, entry.edits.iter().filter_map(Edit::family))?;
        let mut data = self.data.write();
        Self::apply_edits(&mut data, &entry.edits, self.max_versions);
        Ok(())
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Number of rows holding at least one cell
    pub fn row_count(&self) -> usize {
        self.data.read().len()
    }

    /// Stored versions of one column, newest first
    pub fn versions(&self, row: &[u8], family: &[u8], qualifier: &[u8]) -> Vec<Version> {
        self.data
            .read()
            .get(row)
            .and_then(|columns| columns.get(&(family.to_vec(), qualifier.to_vec())))
            .map(|chain| chain.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Latest cell of every column of every row, in row order
    pub fn dump(&self) -> Vec<RowResult> {
        let data = self.data.read();
        data.iter()
            .map(|(row, columns)| Self::read_row(row, columns, &ColumnFilter::all()))
            .filter(|r| !r.is_empty())
            .collect()
    }

    /// Copy of every stored version, used for snapshots
    pub fn copy_cells(&self) -> Vec<Cell> {
        let data = self.data.read();
        let mut cells = Vec::new();
        for (row, columns) in data.iter() {
            for ((family, qualifier), chain) in columns {
                for version in chain.iter() {
                    cells.push(Cell::with_timestamp(
                        row.clone(),
                        family.clone(),
                        qualifier.clone(),
                        version.timestamp,
                        version.value.clone(),
                    ));
                }
            }
        }
        cells
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn read_row(row: &[u8], columns: &RowData, filter: &ColumnFilter) -> RowResult {
        let cells = columns
            .iter()
            .filter(|((family, qualifier), _)| filter.matches(family, qualifier))
            .filter_map(|((family, qualifier), chain)| {
                chain.latest().map(|v| {
                    Cell::with_timestamp(
                        row.to_vec(),
                        family.clone(),
                        qualifier.clone(),
                        v.timestamp,
                        v.value.clone(),
                    )
                })
            })
            .collect();
        RowResult::from_cells(row.to_vec(), cells)
    }

    fn latest_value<'d>(data: &'d TableData, row: &[u8], family: &[u8], qualifier: &[u8]) -> Option<&'d [u8]> {
        data.get(row)
            .and_then(|columns| columns.get(&(family.to_vec(), qualifier.to_vec())))
            .and_then(|chain| chain.latest())
            .map(|v| v.value.as_slice())
    }

    fn resolve_timestamp(requested: u64, now: u64) -> u64 {
        if requested == LATEST_TIMESTAMP {
            now
        } else {
            requested
        }
    }

    fn resolve_put(put: &Put, now: u64, edits: &mut Vec<Edit>) -> Result<()> {
        if put.cells.is_empty() {
            return Err(Error::InvalidOperation("put carries no cells".to_string()));
        }
        for cell in &put.cells {
            if cell.row != put.row {
                return Err(Error::InvalidOperation(format!(
                    "cell row {} does not match put row {}",
                    to_string_binary(&cell.row),
                    to_string_binary(&put.row)
                )));
            }
            let mut cell = cell.clone();
            cell.timestamp = Self::resolve_timestamp(cell.timestamp, now);
            edits.push(Edit::Put(cell));
        }
        Ok(())
    }

    fn resolve_delete(delete: &Delete, now: u64, edits: &mut Vec<Edit>) {
        let timestamp = Self::resolve_timestamp(delete.timestamp, now);
        if delete.targets.is_empty() {
            edits.push(Edit::DeleteRow {
                row: delete.row.clone(),
                timestamp,
            });
            return;
        }
        for target in &delete.targets {
            edits.push(match target {
                DeleteTarget::Column { family, qualifier } => Edit::DeleteColumn {
                    row: delete.row.clone(),
                    family: family.clone(),
                    qualifier: qualifier.clone(),
                    timestamp,
                },
                DeleteTarget::Family(family) => Edit::DeleteFamily {
                    row: delete.row.clone(),
                    family: family.clone(),
                    timestamp,
                },
            });
        }
    }

    fn resolve_mutations(mutations: &RowMutations, now: u64) -> Result<Vec<Edit>> {
        let mut edits = Vec::new();
        for mutation in &mutations.mutations {
            if mutation.row() != mutations.row.as_slice() {
                return Err(Error::InvalidOperation(format!(
                    "mutation row {} does not match row {}",
                    to_string_binary(mutation.row()),
                    to_string_binary(&mutations.row)
                )));
            }
            match mutation {
                Mutation::Put(put) => Self::resolve_put(put, now, &mut edits)?,
                Mutation::Delete(delete) => Self::resolve_delete(delete, now, &mut edits),
            }
        }
        Ok(edits)
    }

    fn apply_edits(data: &mut TableData, edits: &[Edit], max_versions: usize) {
        for edit in edits {
            match edit {
                Edit::Put(cell) => {
                    data.entry(cell.row.clone())
                        .or_default()
                        .entry((cell.family.clone(), cell.qualifier.clone()))
                        .or_default()
                        .insert(cell.timestamp, cell.value.clone(), max_versions);
                }
                Edit::DeleteColumn {
                    row,
                    family,
                    qualifier,
                    timestamp,
                } => {
                    if let Some(columns) = data.get_mut(row) {
                        if let Some(chain) = columns.get_mut(&(family.clone(), qualifier.clone())) {
                            chain.delete_up_to(*timestamp);
                        }
                        columns.retain(|_, chain| !chain.is_empty());
                    }
                }
                Edit::DeleteFamily {
                    row,
                    family,
                    timestamp,
                } => {
                    if let Some(columns) = data.get_mut(row) {
                        for ((f, _), chain) in columns.iter_mut() {
                            if f == family {
                                chain.delete_up_to(*timestamp);
                            }
                        }
                        columns.retain(|_, chain| !chain.is_empty());
                    }
                }
                Edit::DeleteRow { row, timestamp } => {
                    if let Some(columns) = data.get_mut(row) {
                        for chain in columns.values_mut() {
                            chain.delete_up_to(*timestamp);
                        }
                        columns.retain(|_, chain| !chain.is_empty());
                    }
                }
            }
            if data.get(edit.row()).map_or(false, BTreeMap::is_empty) {
                data.remove(edit.row());
            }
        }
    }

    /// Apply resolved edits and journal them; caller holds the write lock
    fn commit(&self, data: &mut TableData, edits: Vec<Edit>) {
        if edits.is_empty() {
            return;
        }
        Self::apply_edits(data, &edits, self.max_versions);
        if let Some(journal) = &self.journal {
            journal.lock().push(JournalEntry { edits });
        }
    }

    fn mutation_families(mutations: &RowMutations) -> Vec<&[u8]> {
        let mut families = Vec::new();
        for mutation in &mutations.mutations {
            match mutation {
                Mutation::Put(put) => families.extend(put.cells.iter().map(|c| c.family.as_slice())),
                Mutation::Delete(delete) => {
                    for target in &delete.targets {
                        match target {
                            DeleteTarget::Column { family, .. } | DeleteTarget::Family(family) => {
                                families.push(family.as_slice())
                            }
                        }
                    }
                }
            }
        }
        families
    }
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, get: &Get) -> Result<RowResult> {
        let schema = self.families.read();
        Self::check_families(&schema, &self.name, get.filter.families())?;
        let data = self.data.read();
        Ok(match data.get(&get.row) {
            Some(columns) => Self::read_row(&get.row, columns, &get.filter),
            None => RowResult::empty(get.row.clone()),
        })
    }

    fn scan(&self, scan: &Scan) -> Result<RowCursor<'_>> {
        let schema = self.families.read();
        Self::check_families(&schema, &self.name, scan.filter.families())?;
        trace!(
            target: "overlay::store",
            table = %self.name,
            start = %to_string_binary(&scan.start_row),
            stop = %to_string_binary(&scan.stop_row),
            "Opening scanner"
        );
        Ok(Box::new(MemoryScanner::new(self, scan.clone())))
    }

    fn put(&self, put: &Put) -> Result<()> {
        let schema = self.families.read();
        Self::check_families(&schema, &self.name, put.cells.iter().map(|c| c.family.as_slice()))?;
        let mut data = self.data.write();
        let mut edits = Vec::with_capacity(put.cells.len());
        Self::resolve_put(put, self.clock.tick(), &mut edits)?;
        self.commit(&mut data, edits);
        Ok(())
    }

    fn delete(&self, delete: &Delete) -> Result<()> {
        let mutations = RowMutations::new(delete.row.clone()).delete(delete.clone());
        self.mutate_row(&mutations)
    }

    fn mutate_row(&self, mutations: &RowMutations) -> Result<()> {
        let schema = self.families.read();
        Self::check_families(&schema, &self.name, Self::mutation_families(mutations))?;
        let mut data = self.data.write();
        let edits = Self::resolve_mutations(mutations, self.clock.tick())?;
        self.commit(&mut data, edits);
        Ok(())
    }

    fn check_and_mutate(&self, check: &Check, mutations: &RowMutations) -> Result<bool> {
        if check.row != mutations.row {
            return Err(Error::InvalidOperation(format!(
                "check row {} does not match mutation row {}",
                to_string_binary(&check.row),
                to_string_binary(&mutations.row)
            )));
        }
        let schema = self.families.read();
        Self::check_families(&schema, &self.name, [check.family.as_slice()])?;
        Self::check_families(&schema, &self.name, Self::mutation_families(mutations))?;

        let mut data = self.data.write();
        let current = Self::latest_value(&data, &check.row, &check.family, &check.qualifier);
        if !check.is_satisfied_by(current) {
            return Ok(false);
        }
        let edits = Self::resolve_mutations(mutations, self.clock.tick())?;
        self.commit(&mut data, edits);
        Ok(true)
    }

    fn increment(&self, increment: &Increment) -> Result<RowResult> {
        let schema = self.families.read();
        Self::check_families(
            &schema,
            &self.name,
            increment.columns.iter().map(|(f, _, _)| f.as_slice()),
        )?;
        let mut data = self.data.write();

        let mut totals: BTreeMap<(Vec<u8>, Vec<u8>), i64> = BTreeMap::new();
        for (family, qualifier, amount) in &increment.columns {
            let key = (family.clone(), qualifier.clone());
            let base = match totals.get(&key) {
                Some(total) => *total,
                None => match Self::latest_value(&data, &increment.row, family, qualifier) {
                    None => 0,
                    Some(bytes) if bytes.len() == 8 => BigEndian::read_i64(bytes),
                    Some(bytes) => {
                        return Err(Error::store(format!(
                            "Column {}:{} holds {} bytes, not an 8-byte counter",
                            to_string_binary(family),
                            to_string_binary(qualifier),
                            bytes.len()
                        )))
                    }
                },
            };
            totals.insert(key, base.wrapping_add(*amount));
        }

        let now = self.clock.tick();
        let cells: Vec<Cell> = totals
            .into_iter()
            .map(|((family, qualifier), total)| {
                let mut buf = [0u8; 8];
                BigEndian::write_i64(&mut buf, total);
                Cell::with_timestamp(increment.row.clone(), family, qualifier, now, buf.to_vec())
            })
            .collect();
        self.commit(&mut data, cells.iter().cloned().map(Edit::Put).collect());
        Ok(RowResult::from_cells(increment.row.clone(), cells))
    }

    fn append(&self, append: &Append) -> Result<RowResult> {
        let schema = self.families.read();
        Self::check_families(
            &schema,
            &self.name,
            append.columns.iter().map(|(f, _, _)| f.as_slice()),
        )?;
        let mut data = self.data.write();

        let mut values: BTreeMap<(Vec<u8>, Vec<u8>), Vec<u8>> = BTreeMap::new();
        for (family, qualifier, suffix) in &append.columns {
            let key = (family.clone(), qualifier.clone());
            let value = match values.remove(&key) {
                Some(value) => value,
                None => Self::latest_value(&data, &append.row, family, qualifier)
                    .map(<[u8]>::to_vec)
                    .unwrap_or_default(),
            };
            let mut value = value;
            value.extend_from_slice(suffix);
            values.insert(key, value);
        }

        let now = self.clock.tick();
        let cells: Vec<Cell> = values
            .into_iter()
            .map(|((family, qualifier), value)| {
                Cell::with_timestamp(append.row.clone(), family, qualifier, now, value)
            })
            .collect();
        self.commit(&mut data, cells.iter().cloned().map(Edit::Put).collect());
        Ok(RowResult::from_cells(append.row.clone(), cells))
    }
}

// ============================================================================
// Scanner
// ============================================================================

/// Batched forward cursor over a [`MemoryStore`]
struct MemoryScanner<'a> {
    store: &'a MemoryStore,
    scan: Scan,
    /// Last row visited; the next batch starts after it
    last_row: Option<Vec<u8>>,
    buffer: VecDeque<RowResult>,
    exhausted: bool,
}

impl<'a> MemoryScanner<'a> {
    fn new(store: &'a MemoryStore, scan: Scan) -> Self {
        Self {
            store,
            scan,
            last_row: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fill(&mut self) {
        let lower = match &self.last_row {
            Some(last) => Bound::Excluded(last.clone()),
            None => Bound::Included(self.scan.start_row.clone()),
        };
        let lower_key: &[u8] = match &self.last_row {
            Some(last) => last,
            None => &self.scan.start_row,
        };
        if !self.scan.stop_row.is_empty() && lower_key >= self.scan.stop_row.as_slice() {
            self.exhausted = true;
            return;
        }
        let upper = if self.scan.stop_row.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(self.scan.stop_row.clone())
        };

        let data = self.store.data.read();
        let mut visited = 0;
        for (row, columns) in data.range::<Vec<u8>, _>((lower, upper)) {
            visited += 1;
            self.last_row = Some(row.clone());
            let result = MemoryStore::read_row(row, columns, &self.scan.filter);
            if !result.is_empty() {
                self.buffer.push_back(result);
            }
            if visited >= self.store.scan_batch {
                return;
            }
        }
        self.exhausted = true;
    }
}

impl Iterator for MemoryScanner<'_> {
    type Item = Result<RowResult>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.is_empty() && !self.exhausted {
            self.fill();
        }
        self.buffer.pop_front().map(Ok)
    }
}
