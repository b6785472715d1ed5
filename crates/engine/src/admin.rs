//! Overlay administration
//!
//! [`OverlayContext`] bundles what every overlay operation needs from its
//! environment: the cluster handle, the configuration and the sleeper used by
//! lock retries and push polling. It is passed explicitly; nothing here is
//! global.
//!
//! # Creating an overlay
//!
//! ```text
//! 1. refuse if the overlay table already exists
//! 2. create it with the original's families, plus _sandmeta and _sanddirty
//! 3. add a paused replication link overlay -> original
//! 4. write the metadata record (Enabled)
//! ```
//!
//! A failure after step 2 drops the half-built table again.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use overlay_concurrency::{Sleeper, ThreadSleeper};
use overlay_core::layout::{DIRTY_FAMILY, META_FAMILY};
use overlay_core::{ClusterAdmin, Error, Result};

use crate::config::OverlayConfig;
use crate::metadata::{MetadataStore, OverlayMetadata, OverlayState};
use crate::push::{push, PushOptions, PushReport};
use crate::table::OverlayTable;

/// Summary of one overlay, serialisable for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlayInfo {
    /// Overlay table name
    pub name: String,
    /// Shadowed table
    pub original: String,
    /// Lifecycle state
    pub state: OverlayState,
    /// Families of the overlay table, reserved ones included
    pub families: Vec<String>,
}

impl OverlayInfo {
    /// Pretty JSON rendering
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Environment of overlay operations
pub struct OverlayContext {
    cluster: Arc<dyn ClusterAdmin>,
    config: OverlayConfig,
    metadata: MetadataStore,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for OverlayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayContext")
            .field("config", &self.config)
            .finish()
    }
}

impl OverlayContext {
    /// Context sleeping on the real clock
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if `config` fails [`OverlayConfig::validate`]; the
    /// lock budget and the drain bound rely on it.
    pub fn new(cluster: Arc<dyn ClusterAdmin>, config: OverlayConfig) -> Result<Self> {
        config.validate()?;
        let metadata = MetadataStore::new(config.metadata_dir.clone());
        Ok(Self {
            cluster,
            config,
            metadata,
            sleeper: Arc::new(ThreadSleeper),
        })
    }

    /// Replace the sleeper (tests use a virtual one)
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Cluster handle
    pub fn cluster(&self) -> &dyn ClusterAdmin {
        self.cluster.as_ref()
    }

    /// Active configuration
    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// Metadata records
    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Sleeper shared with opened tables
    pub fn sleeper(&self) -> &dyn Sleeper {
        self.sleeper.as_ref()
    }

    /// Create `overlay` as a writable view of `original`
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if a table named `overlay` already exists
    /// - [`Error::Admin`] if `original` does not exist or a cluster call fails
    pub fn create(&self, overlay: &str, original: &str) -> Result<()> {
        if self.cluster.table_exists(overlay)? {
            return Err(Error::InvalidState(format!(
                "table {} already exists",
                overlay
            )));
        }
        if !self.cluster.table_exists(original)? {
            return Err(Error::admin(format!("original table {} does not exist", original)));
        }

        self.cluster.create_table_like(overlay, original)?;
        if let Err(e) = self.finish_create(overlay, original) {
            if let Err(rollback) = self.cluster.delete_table(overlay) {
                warn!(
                    target: "overlay::admin",
                    overlay,
                    error = %rollback,
                    "Failed to drop half-created overlay table"
                );
            }
            return Err(e);
        }

        info!(target: "overlay::admin", overlay, original, "Created overlay");
        Ok(())
    }

    fn finish_create(&self, overlay: &str, original: &str) -> Result<()> {
        self.cluster.add_family(overlay, META_FAMILY)?;
        self.cluster.add_family(overlay, DIRTY_FAMILY)?;
        self.cluster.add_replica(overlay, original, true)?;
        self.metadata.write(overlay, &OverlayMetadata::new(original))
    }

    /// Drop an overlay: metadata record first, then the table
    pub fn delete(&self, overlay: &str) -> Result<()> {
        self.metadata.remove(overlay)?;
        self.cluster.delete_table(overlay)?;
        info!(target: "overlay::admin", overlay, "Deleted overlay");
        Ok(())
    }

    /// Metadata and families of an overlay
    pub fn info(&self, overlay: &str) -> Result<OverlayInfo> {
        let metadata = self.metadata.read(overlay)?;
        let families = self
            .cluster
            .families(overlay)?
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect();
        Ok(OverlayInfo {
            name: overlay.to_string(),
            original: metadata.original,
            state: metadata.state,
            families,
        })
    }

    /// Open a read/write handle; the metadata record is read once, here
    pub fn open(&self, overlay: &str) -> Result<OverlayTable> {
        let metadata = self.metadata.read(overlay)?;
        let overlay_store = self.cluster.open_table(overlay)?;
        let original_store = self.cluster.open_table(&metadata.original)?;
        Ok(OverlayTable::new(
            overlay,
            metadata,
            overlay_store,
            original_store,
            self.config.lock_config(),
            self.sleeper.clone(),
        ))
    }

    /// Push the overlay's edits into its original
    ///
    /// See [`crate::push`] for the state machine.
    pub fn push(&self, overlay: &str, options: &PushOptions) -> Result<PushReport> {
        push(self, overlay, options)
    }
}
