//! Overlay engine for overlaydb
//!
//! This crate ties the lower layers into the user-facing overlay:
//! - Merge: point and batch reads with tombstone precedence
//! - MergedScanner: two-cursor merge-sort of overlay and original scans
//! - OverlayTable: reads and writes over one overlay
//! - Metadata: `.meta_<overlay>` records and the lifecycle state
//! - OverlayContext: create, delete, info, open
//! - Push: the state machine draining overlay edits into the original
//! - OverlayConfig: `overlay.toml`
//!
//! The engine is the only component that knows about both the overlay and
//! its original at once.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admin;
pub mod config;
pub mod merge;
pub mod metadata;
pub mod push;
pub mod scanner;
pub mod strategies;
pub mod table;

pub use admin::{OverlayContext, OverlayInfo};
pub use config::{LockSection, OverlayConfig, PushSection, CONFIG_FILE_NAME};
pub use merge::{merge_rows, merged_get, merged_get_batch};
pub use metadata::{MetadataStore, OverlayMetadata, OverlayState};
pub use push::{push, push_snapshot_name, PushLock, PushOptions, PushReport};
pub use scanner::{MergedScanner, Source};
pub use table::OverlayTable;
