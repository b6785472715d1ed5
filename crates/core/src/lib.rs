//! Core types and traits for overlaydb
//!
//! This crate defines the foundational types used throughout the system:
//! - Cell / RowResult: versioned values and per-row read results
//! - ColumnCoordinate / ColumnCoordinateSet: operation footprints
//! - Requests: Get, Scan, Put, Delete, RowMutations, Increment, Append, Check
//! - Layout: reserved families and tombstone/staging qualifier encodings
//! - Error: Error type hierarchy
//! - Traits: Store and ClusterAdmin

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinate;
pub mod error;
pub mod layout;
pub mod request;
pub mod traits;
pub mod types;

pub use coordinate::{ColumnCoordinate, ColumnCoordinateSet, CoordinateKind};
pub use error::{Error, Result};
pub use request::{
    Append, Check, ColumnFilter, Delete, DeleteTarget, Get, Increment, Mutation, Put,
    RowMutations, Scan,
};
pub use traits::{ClusterAdmin, RowCursor, Store};
pub use types::{to_string_binary, Cell, RowResult, ALL_VERSIONS, LATEST_TIMESTAMP};
