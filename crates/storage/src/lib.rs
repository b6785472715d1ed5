//! Storage layer for overlaydb
//!
//! This crate implements the in-memory reference backend with:
//! - MemoryStore: BTreeMap-based column-family table with RwLock
//! - VersionChain: newest-first versions per column
//! - Clock: monotonic epoch-millisecond timestamps shared per cluster
//! - Journal: resolved edits of every atomic row mutation
//! - MemoryCluster: table registry, journal-driven replication, snapshots
//!
//! Every primitive the overlay engine needs from a store (check-and-mutate,
//! atomic row mutations, counters) is atomic per row here, so the engine can be
//! exercised end to end without an external cluster.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod clock;
pub mod cluster;
pub mod journal;
pub mod memory;

pub use chain::{Version, VersionChain};
pub use clock::Clock;
pub use cluster::{MemoryCluster, TableSnapshot, DEFAULT_SHIP_BATCH};
pub use journal::{Edit, JournalEntry};
pub use memory::{MemoryStore, DEFAULT_MAX_VERSIONS, DEFAULT_SCAN_BATCH};
