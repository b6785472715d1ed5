//! MemoryCluster: in-memory table registry with replication and snapshots
//!
//! Implements [`ClusterAdmin`] over [`MemoryStore`] tables:
//! - `DashMap` registry of tables sharing one [`Clock`]
//! - replica links driven from each source table's journal
//! - named snapshots holding a copy of every stored version
//!
//! # Replication model
//!
//! A link ships the source's journal entries to the target, in order, once it
//! is resumed and the target has registered the source as an upstream. There is
//! no background thread: every [`ClusterAdmin::replication_backlog`] call ships
//! at most `ship_batch` entries per link and then reports the bytes still
//! pending, so a caller polling the backlog drives replication forward.
//!
//! Edits for families the source no longer has are not shipped. Dropping a
//! family therefore also drops its pending edits.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use overlay_core::{Cell, ClusterAdmin, Error, Result, Store};

use crate::clock::Clock;
use crate::memory::MemoryStore;

/// Default number of journal entries shipped per link per backlog poll
pub const DEFAULT_SHIP_BATCH: usize = 128;

/// Point-in-time copy of a table
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    /// Table the snapshot was taken from
    pub table: String,
    /// Families at snapshot time
    pub families: Vec<Vec<u8>>,
    /// Every stored version at snapshot time
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone)]
struct ReplicaLink {
    source: String,
    target: String,
    paused: bool,
    /// Journal entries of the source already shipped
    shipped: usize,
}

/// In-memory cluster of [`MemoryStore`] tables
#[derive(Debug)]
pub struct MemoryCluster {
    tables: DashMap<String, Arc<MemoryStore>>,
    links: Mutex<Vec<ReplicaLink>>,
    /// Target table -> sources it accepts edits from
    upstreams: DashMap<String, BTreeSet<String>>,
    snapshots: DashMap<String, TableSnapshot>,
    clock: Arc<Clock>,
    ship_batch: usize,
}

impl MemoryCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            links: Mutex::new(Vec::new()),
            upstreams: DashMap::new(),
            snapshots: DashMap::new(),
            clock: Arc::new(Clock::new()),
            ship_batch: DEFAULT_SHIP_BATCH,
        }
    }

    /// Journal entries shipped per link per backlog poll (at least 1)
    pub fn with_ship_batch(mut self, ship_batch: usize) -> Self {
        self.ship_batch = ship_batch.max(1);
        self
    }

    /// Concrete handle to a table, for inspection
    ///
    /// # Errors
    ///
    /// Returns an admin error if the table does not exist.
    pub fn table(&self, table: &str) -> Result<Arc<MemoryStore>> {
        self.tables
            .get(table)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| Error::admin(format!("Table {} does not exist", table)))
    }

    /// A stored snapshot, if present
    pub fn snapshot(&self, snapshot: &str) -> Option<TableSnapshot> {
        self.snapshots.get(snapshot).map(|s| s.value().clone())
    }

    /// True if a link from `source` to `target` exists and is paused
    pub fn is_replication_paused(&self, source: &str, target: &str) -> Option<bool> {
        self.links
            .lock()
            .iter()
            .find(|l| l.source == source && l.target == target)
            .map(|l| l.paused)
    }

    /// True if `target` accepts edits from `source`
    pub fn has_upstream(&self, target: &str, source: &str) -> bool {
        self.upstreams
            .get(target)
            .map_or(false, |sources| sources.contains(source))
    }

    fn new_table(&self, table: &str, families: &[Vec<u8>]) -> Arc<MemoryStore> {
        Arc::new(
            MemoryStore::new(table)
                .with_families(families.iter().cloned())
                .with_clock(Arc::clone(&self.clock))
                .with_journal(),
        )
    }

    fn set_paused(&self, source: &str, paused: bool) -> Result<()> {
        let mut links = self.links.lock();
        let mut found = false;
        for link in links.iter_mut().filter(|l| l.source == source) {
            link.paused = paused;
            found = true;
        }
        if !found {
            return Err(Error::admin(format!(
                "No replication links from table {}",
                source
            )));
        }
        debug!(target: "overlay::store", source, paused, "Replication state changed");
        Ok(())
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterAdmin for MemoryCluster {
    fn open_table(&self, table: &str) -> Result<Arc<dyn Store>> {
        let store: Arc<dyn Store> = self.table(table)?;
        Ok(store)
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.tables.contains_key(table))
    }

    fn create_table(&self, table: &str, families: &[Vec<u8>]) -> Result<()> {
        match self.tables.entry(table.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(Error::admin(format!("Table {} already exists", table)))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(self.new_table(table, families));
                info!(target: "overlay::store", table, families = families.len(), "Created table");
                Ok(())
            }
        }
    }

    fn create_table_like(&self, table: &str, template: &str) -> Result<()> {
        let families = self.table(template)?.families();
        self.create_table(table, &families)
    }

    fn delete_table(&self, table: &str) -> Result<()> {
        if self.tables.remove(table).is_none() {
            return Err(Error::admin(format!("Table {} does not exist", table)));
        }
        self.links
            .lock()
            .retain(|l| l.source != table && l.target != table);
        self.upstreams.remove(table);
        for mut sources in self.upstreams.iter_mut() {
            sources.value_mut().remove(table);
        }
        info!(target: "overlay::store", table, "Deleted table");
        Ok(())
    }

    fn families(&self, table: &str) -> Result<Vec<Vec<u8>>> {
        Ok(self.table(table)?.families())
    }

    fn add_family(&self, table: &str, family: &[u8]) -> Result<()> {
        if !self.table(table)?.add_family(family) {
            return Err(Error::admin(format!(
                "Family {} already exists in table {}",
                String::from_utf8_lossy(family),
                table
            )));
        }
        Ok(())
    }

    fn remove_family(&self, table: &str, family: &[u8]) -> Result<()> {
        if !self.table(table)?.drop_family(family) {
            return Err(Error::admin(format!(
                "Family {} does not exist in table {}",
                String::from_utf8_lossy(family),
                table
            )));
        }
        Ok(())
    }

    fn add_replica(&self, source: &str, target: &str, paused: bool) -> Result<()> {
        let source_store = self.table(source)?;
        self.table(target)?;
        let mut links = self.links.lock();
        if links.iter().any(|l| l.source == source && l.target == target) {
            return Err(Error::admin(format!(
                "Replication link {} -> {} already exists",
                source, target
            )));
        }
        links.push(ReplicaLink {
            source: source.to_string(),
            target: target.to_string(),
            paused,
            shipped: source_store.journal_len(),
        });
        Ok(())
    }

    fn remove_replica(&self, source: &str, target: &str) -> Result<()> {
        let mut links = self.links.lock();
        let before = links.len();
        links.retain(|l| !(l.source == source && l.target == target));
        if links.len() == before {
            return Err(Error::admin(format!(
                "No replication link {} -> {}",
                source, target
            )));
        }
        Ok(())
    }

    fn add_upstream(&self, target: &str, source: &str) -> Result<()> {
        self.table(target)?;
        self.upstreams
            .entry(target.to_string())
            .or_default()
            .insert(source.to_string());
        Ok(())
    }

    fn remove_upstream(&self, target: &str, source: &str) -> Result<()> {
        let removed = self
            .upstreams
            .get_mut(target)
            .map_or(false, |mut sources| sources.remove(source));
        if !removed {
            return Err(Error::admin(format!(
                "Table {} has no upstream {}",
                target, source
            )));
        }
        Ok(())
    }

    fn pause_replication(&self, source: &str) -> Result<()> {
        self.set_paused(source, true)
    }

    fn resume_replication(&self, source: &str) -> Result<()> {
        self.set_paused(source, false)
    }

    fn create_snapshot(&self, table: &str, snapshot: &str) -> Result<()> {
        let store = self.table(table)?;
        match self.snapshots.entry(snapshot.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::admin(format!(
                "Snapshot {} already exists",
                snapshot
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(TableSnapshot {
                    table: table.to_string(),
                    families: store.families(),
                    cells: store.copy_cells(),
                });
                info!(target: "overlay::store", table, snapshot, "Created snapshot");
                Ok(())
            }
        }
    }

    fn remove_snapshot(&self, snapshot: &str) -> Result<()> {
        self.snapshots
            .remove(snapshot)
            .map(|_| ())
            .ok_or_else(|| Error::admin(format!("Snapshot {} does not exist", snapshot)))
    }

    fn replication_backlog(&self, source: &str) -> Result<u64> {
        let source_store = self.table(source)?;
        let families = source_store.families();
        let keep = |family: &[u8]| families.iter().any(|f| f.as_slice() == family);

        let mut links = self.links.lock();
        for link in links.iter_mut().filter(|l| l.source == source) {
            if link.paused || !self.has_upstream(&link.target, source) {
                continue;
            }
            let target = self.table(&link.target)?;
            let entries = source_store.journal_entries(link.shipped, self.ship_batch);
            for entry in &entries {
                let filtered = entry.filtered(keep);
                if !filtered.is_empty() {
                    target.apply_replicated(&filtered).map_err(|e| {
                        Error::admin(format!(
                            "Replication {} -> {} failed: {}",
                            source, link.target, e
                        ))
                    })?;
                }
                link.shipped += 1;
            }
            if !entries.is_empty() {
                debug!(
                    target: "overlay::store",
                    source,
                    target_table = %link.target,
                    shipped = entries.len(),
                    "Shipped journal entries"
                );
            }
        }

        Ok(links
            .iter()
            .filter(|l| l.source == source)
            .map(|l| source_store.journal_bytes_since(l.shipped, keep))
            .sum())
    }
}
