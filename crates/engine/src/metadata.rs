//! Overlay metadata records
//!
//! Each overlay has a small JSON file `.meta_<overlay>` in the configured
//! metadata directory naming its original table and its lifecycle state:
//!
//! ```json
//! { "original": "prod_table", "state": "Enabled" }
//! ```
//!
//! The push workflow rewrites the record at every state transition, so a
//! failed push leaves the state it reached on disk.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use overlay_core::{Error, Result};

/// Prefix of metadata record file names
pub const METADATA_PREFIX: &str = ".meta_";

/// Suffix of the push lock file placed next to a metadata record
pub const PUSH_LOCK_SUFFIX: &str = ".pushlock";

/// Lifecycle of an overlay
///
/// Only `Enabled` accepts writes. The remaining states are the push workflow
/// in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlayState {
    /// Open for reads and writes
    Enabled,
    /// Push started: snapshotting the original
    SnapshotCreate,
    /// Reserved families removed, replication being wired up
    PushStarted,
    /// Waiting for the replication backlog to reach zero
    Draining,
    /// Edits applied to the original
    Done,
}

impl OverlayState {
    /// True if the overlay accepts writes in this state
    pub fn is_writable(self) -> bool {
        self == OverlayState::Enabled
    }
}

impl fmt::Display for OverlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OverlayState::Enabled => "Enabled",
            OverlayState::SnapshotCreate => "SnapshotCreate",
            OverlayState::PushStarted => "PushStarted",
            OverlayState::Draining => "Draining",
            OverlayState::Done => "Done",
        };
        f.write_str(name)
    }
}

/// Contents of one metadata record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayMetadata {
    /// Table the overlay shadows
    pub original: String,
    /// Current lifecycle state
    pub state: OverlayState,
}

impl OverlayMetadata {
    /// Fresh record for a new overlay of `original`
    pub fn new(original: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            state: OverlayState::Enabled,
        }
    }
}

/// Reads and writes metadata records under one directory
#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    /// Records kept in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the records
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `overlay`
    ///
    /// Path separators in table names are flattened so every record sits
    /// directly in the metadata directory.
    pub fn record_path(&self, overlay: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", METADATA_PREFIX, file_safe(overlay)))
    }

    /// Path of the push lock file for `overlay`
    pub fn push_lock_path(&self, overlay: &str) -> PathBuf {
        self.dir.join(format!(
            "{}{}{}",
            METADATA_PREFIX,
            file_safe(overlay),
            PUSH_LOCK_SUFFIX
        ))
    }

    /// True if a record exists for `overlay`
    pub fn exists(&self, overlay: &str) -> bool {
        self.record_path(overlay).exists()
    }

    /// Read the record of `overlay`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the record cannot be read and
    /// [`Error::Serialization`] if it is not valid JSON.
    pub fn read(&self, overlay: &str) -> Result<OverlayMetadata> {
        let path = self.record_path(overlay);
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| {
            Error::Serialization(format!(
                "Failed to parse metadata record '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Write (or replace) the record of `overlay`
    ///
    /// The record is written to a temporary file and renamed into place.
    pub fn write(&self, overlay: &str, metadata: &OverlayMetadata) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(metadata)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let path = self.record_path(overlay);
        let tmp = self
            .dir
            .join(format!("{}{}.tmp", METADATA_PREFIX, file_safe(overlay)));
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Rewrite only the state of an existing record
    pub fn set_state(&self, overlay: &str, state: OverlayState) -> Result<OverlayMetadata> {
        let mut metadata = self.read(overlay)?;
        metadata.state = state;
        self.write(overlay, &metadata)?;
        Ok(metadata)
    }

    /// Remove the record; a missing record is not an error
    pub fn remove(&self, overlay: &str) -> Result<()> {
        match std::fs::remove_file(self.record_path(overlay)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());
        store.write("sand", &OverlayMetadata::new("prod")).unwrap();

        let metadata = store.read("sand").unwrap();
        assert_eq!(metadata.original, "prod");
        assert_eq!(metadata.state, OverlayState::Enabled);
        assert!(store.exists("sand"));
    }

    #[test]
    fn json_shape_is_stable() {
        let json = serde_json::to_string(&OverlayMetadata::new("prod")).unwrap();
        assert_eq!(json, r#"{"original":"prod","state":"Enabled"}"#);
    }

    #[test]
    fn set_state_persists() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());
        store.write("sand", &OverlayMetadata::new("prod")).unwrap();
        store.set_state("sand", OverlayState::Draining).unwrap();
        assert_eq!(store.read("sand").unwrap().state, OverlayState::Draining);
        assert!(!OverlayState::Draining.is_writable());
    }

    #[test]
    fn table_names_with_slashes_stay_in_dir() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());
        let path = store.record_path("/sand/t1");
        assert_eq!(path.parent().unwrap(), dir.path());
        store.write("/sand/t1", &OverlayMetadata::new("/prod/t1")).unwrap();
        assert_eq!(store.read("/sand/t1").unwrap().original, "/prod/t1");
    }

    #[test]
    fn missing_record_is_io_error() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());
        assert!(matches!(store.read("nope"), Err(Error::Io(_))));
        store.remove("nope").unwrap();
    }

    #[test]
    fn corrupt_record_is_serialization_error() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());
        std::fs::write(store.record_path("sand"), "{not json").unwrap();
        assert!(matches!(store.read("sand"), Err(Error::Serialization(_))));
    }
}
