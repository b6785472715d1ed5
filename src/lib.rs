//! overlaydb - copy-on-write overlay tables for column-family sorted stores
//!
//! An overlay is a table that starts empty and shadows an existing
//! "original" table. Reads merge the two, writes land only in the overlay,
//! and deletions are recorded as tombstones so the original is never touched
//! until the overlay is pushed back.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use overlaydb::{ClusterAdmin, Get, MemoryCluster, OverlayConfig, OverlayContext, Put, Store};
//!
//! # fn main() -> overlaydb::Result<()> {
//! # let dir = tempfile::TempDir::new()?;
//! let cluster = Arc::new(MemoryCluster::new());
//! cluster.create_table("prod", &[b"cf".to_vec()])?;
//! cluster.table("prod")?.put(&Put::new("r").add("cf", "q", "original"))?;
//!
//! let ctx = OverlayContext::new(cluster.clone(), OverlayConfig::with_metadata_dir(dir.path()))?;
//! ctx.create("sand", "prod")?;
//!
//! let table = ctx.open("sand")?;
//! table.put(&Put::new("r").add("cf", "q", "changed"))?;
//! let row = table.get(&Get::new("r"))?;
//! assert_eq!(row.value(b"cf", b"q"), Some(&b"changed"[..]));
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - `overlay-core`: requests, results, coordinates, the store traits
//! - `overlay-storage`: the in-memory cluster used for tests and embedding
//! - `overlay-concurrency`: row locks and the staged-copy protocol
//! - `overlay-engine`: merge, scanner, overlay table, admin and push

pub use overlay_core::layout;
pub use overlay_core::{
    to_string_binary, Append, Cell, Check, ClusterAdmin, ColumnCoordinate, ColumnCoordinateSet,
    ColumnFilter, CoordinateKind, Delete, DeleteTarget, Error, Get, Increment, Mutation, Put,
    Result, RowCursor, RowMutations, RowResult, Scan, Store, ALL_VERSIONS, LATEST_TIMESTAMP,
};

pub use overlay_concurrency::{
    LockConfig, Sleeper, ThreadSleeper, TransactionId, VirtualSleeper,
};

pub use overlay_storage::{MemoryCluster, MemoryStore, TableSnapshot};

pub use overlay_engine::{
    OverlayConfig, OverlayContext, OverlayInfo, OverlayMetadata, OverlayState, OverlayTable,
    PushOptions, PushReport, CONFIG_FILE_NAME,
};
