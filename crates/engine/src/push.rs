//! Push: drain an overlay's edits into its original
//!
//! The overlay was created with a paused replication link to the original.
//! Pushing turns that link on after making the edit stream self-sufficient.
//!
//! # States
//!
//! ```text
//! Enabled ──► SnapshotCreate ──► PushStarted ──► Draining ──► Done
//! ```
//!
//! 1. refuse unless the record says `Enabled`; take the push lock file
//! 2. materialise tombstones: each becomes a real column delete in the overlay,
//!    so the replicated stream deletes the column upstream
//! 3. optionally normalise timestamps: older overlay cells are rewritten at the
//!    push timestamp and tombstone deletes are issued at it
//! 4. `SnapshotCreate`: optional snapshot `sandbox_push_<overlay>` of the original
//! 5. `PushStarted`: drop `_sandmeta` and `_sanddirty` from the overlay
//! 6. register the overlay as an upstream of the original, resume replication
//! 7. `Draining`: poll the backlog until zero (bounded), then settle
//! 8. pause replication, deregister the upstream, `Done`
//!
//! Any failure aborts at the state already recorded. The lock file is removed
//! on every exit path. Resuming a partially pushed overlay is not supported.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use fs2::FileExt;
use tracing::{debug, error, info, warn};

use overlay_core::layout::{is_reserved_family, DIRTY_FAMILY, META_FAMILY};
use overlay_core::{
    to_string_binary, Delete, Error, Mutation, Put, Result, RowMutations, Scan, Store,
    LATEST_TIMESTAMP,
};

use crate::admin::OverlayContext;
use crate::merge::tombstones;
use crate::metadata::{MetadataStore, OverlayState};

/// Prefix of the snapshot taken of the original before pushing
pub const PUSH_SNAPSHOT_PREFIX: &str = "sandbox_push_";

/// Push switches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOptions {
    /// Snapshot the original before any edit reaches it
    pub snapshot: bool,
    /// Rewrite older overlay cells at the push timestamp so they win upstream
    pub normalize_timestamps: bool,
}

impl PushOptions {
    /// Defaults: no snapshot, timestamps kept
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a snapshot of the original first
    pub fn with_snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Normalise timestamps (`force`)
    pub fn with_normalize_timestamps(mut self, normalize: bool) -> Self {
        self.normalize_timestamps = normalize;
        self
    }
}

/// What a completed push did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Tombstones turned into column deletes
    pub tombstones_materialized: usize,
    /// Cells rewritten at the push timestamp
    pub cells_normalized: usize,
    /// Snapshot taken of the original, if any
    pub snapshot: Option<String>,
    /// Backlog polls made while draining
    pub polls: u32,
    /// Time spent waiting for the backlog, settle delay excluded
    pub drain_wait: Duration,
}

/// Snapshot name used for `overlay`
pub fn push_snapshot_name(overlay: &str) -> String {
    format!("{}{}", PUSH_SNAPSHOT_PREFIX, overlay)
}

// ============================================================================
// Push lock file
// ============================================================================

/// Advisory lock file held for the duration of a push
///
/// Created with create-new semantics and locked exclusively. Dropping the
/// guard unlocks and removes the file.
#[derive(Debug)]
pub struct PushLock {
    path: PathBuf,
    file: File,
}

impl PushLock {
    /// Take the lock at `path`
    ///
    /// # Errors
    ///
    /// Returns [`Error::PushLockHeld`] if the file already exists or cannot be
    /// locked, and [`Error::Io`] for other file system failures.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::PushLockHeld(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if FileExt::try_lock_exclusive(&file).is_err() {
            let _ = std::fs::remove_file(path);
            return Err(Error::PushLockHeld(path.display().to_string()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PushLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(
                target: "overlay::push",
                path = %self.path.display(),
                error = %e,
                "Failed to remove push lock file"
            );
        }
    }
}

// ============================================================================
// State machine
// ============================================================================

/// Push `overlay` into its original
///
/// # Errors
///
/// - [`Error::InvalidState`] unless the overlay is `Enabled`
/// - [`Error::PushLockHeld`] if another push holds the lock file
/// - [`Error::DrainTimeout`] if the backlog did not reach zero in time
/// - store and admin errors of the individual steps
pub fn push(ctx: &OverlayContext, overlay: &str, options: &PushOptions) -> Result<PushReport> {
    let records = ctx.metadata();
    let metadata = records.read(overlay)?;
    if metadata.state != OverlayState::Enabled {
        return Err(Error::InvalidState(format!(
            "overlay {} is in state {}, push needs Enabled",
            overlay, metadata.state
        )));
    }

    let lock = PushLock::acquire(&records.push_lock_path(overlay))?;
    debug!(target: "overlay::push", overlay, lock = %lock.path().display(), "Push lock taken");

    let result = run_push(ctx, records, overlay, &metadata.original, options);
    match &result {
        Ok(report) => info!(
            target: "overlay::push",
            overlay,
            original = %metadata.original,
            tombstones = report.tombstones_materialized,
            normalized = report.cells_normalized,
            polls = report.polls,
            "Push complete"
        ),
        Err(e) => {
            let state = records
                .read(overlay)
                .map(|m| m.state.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            error!(target: "overlay::push", overlay, state = %state, error = %e, "Push aborted");
        }
    }
    drop(lock);
    result
}

fn run_push(
    ctx: &OverlayContext,
    records: &MetadataStore,
    overlay: &str,
    original: &str,
    options: &PushOptions,
) -> Result<PushReport> {
    let cluster = ctx.cluster();
    let store = cluster.open_table(overlay)?;
    let mut report = PushReport::default();

    let push_timestamp = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
    let (tombstoned, normalized) =
        prepare_edit_stream(store.as_ref(), options.normalize_timestamps, push_timestamp)?;
    report.tombstones_materialized = tombstoned;
    report.cells_normalized = normalized;

    transition(records, overlay, OverlayState::SnapshotCreate)?;
    if options.snapshot {
        let name = push_snapshot_name(overlay);
        cluster.create_snapshot(original, &name)?;
        report.snapshot = Some(name);
    }

    transition(records, overlay, OverlayState::PushStarted)?;
    cluster.remove_family(overlay, META_FAMILY)?;
    cluster.remove_family(overlay, DIRTY_FAMILY)?;
    cluster.add_upstream(original, overlay)?;
    cluster.resume_replication(overlay)?;

    transition(records, overlay, OverlayState::Draining)?;
    let (polls, waited) = drain(ctx, overlay)?;
    report.polls = polls;
    report.drain_wait = waited;
    ctx.sleeper().sleep(ctx.config().settle_delay());

    cluster.pause_replication(overlay)?;
    cluster.remove_upstream(original, overlay)?;
    transition(records, overlay, OverlayState::Done)?;
    Ok(report)
}

fn transition(records: &MetadataStore, overlay: &str, state: OverlayState) -> Result<()> {
    records.set_state(overlay, state)?;
    info!(target: "overlay::push", overlay, state = %state, "Push state");
    Ok(())
}

/// Materialise tombstones and optionally normalise timestamps, row by row
///
/// Returns (tombstones materialised, cells rewritten).
fn prepare_edit_stream(
    overlay: &dyn Store,
    normalize: bool,
    push_timestamp: u64,
) -> Result<(usize, usize)> {
    let delete_timestamp = if normalize {
        push_timestamp
    } else {
        LATEST_TIMESTAMP
    };

    // Collect first; the overlay is rewritten below
    let mut plans = Vec::new();
    for row in overlay.scan(&Scan::new())? {
        let row = row?;
        let dead = tombstones(&row);
        let stale: Vec<_> = if normalize {
            row.cells()
                .iter()
                .filter(|c| !is_reserved_family(&c.family) && c.timestamp < push_timestamp)
                .filter(|c| !dead.contains(&(c.family.clone(), c.qualifier.clone())))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        if !dead.is_empty() || !stale.is_empty() {
            plans.push((row.row().to_vec(), dead, stale));
        }
    }

    let mut tombstoned = 0usize;
    let mut normalized = 0usize;
    for (row, dead, stale) in plans {
        let mut mutations = RowMutations::new(row.clone());
        if !stale.is_empty() {
            let mut rewrite = Put::new(row.clone());
            for cell in &stale {
                rewrite = rewrite.add_with_timestamp(
                    cell.family.clone(),
                    cell.qualifier.clone(),
                    push_timestamp,
                    cell.value.clone(),
                );
            }
            normalized += stale.len();
            mutations.push(Mutation::Put(rewrite));
        }
        if !dead.is_empty() {
            let mut delete = Delete::new(row.clone()).at_timestamp(delete_timestamp);
            for (family, qualifier) in &dead {
                delete = delete.add_column(family.clone(), qualifier.clone());
            }
            tombstoned += dead.len();
            mutations.push(Mutation::Delete(delete));
        }
        overlay.mutate_row(&mutations)?;
        debug!(
            target: "overlay::push",
            row = %to_string_binary(&row),
            tombstones = dead.len(),
            normalized = stale.len(),
            "Prepared row for replication"
        );
    }
    Ok((tombstoned, normalized))
}

/// Poll the backlog until it is empty or the drain timeout passes
///
/// Time is accounted in poll intervals, so a virtual sleeper yields the same
/// outcome as a real one.
fn drain(ctx: &OverlayContext, overlay: &str) -> Result<(u32, Duration)> {
    let poll_interval = ctx.config().poll_interval();
    let timeout = ctx.config().drain_timeout();
    let mut waited = Duration::ZERO;
    let mut polls = 0u32;
    loop {
        polls += 1;
        let backlog = ctx.cluster().replication_backlog(overlay)?;
        if backlog == 0 {
            debug!(target: "overlay::push", overlay, polls, "Replication drained");
            return Ok((polls, waited));
        }
        if waited >= timeout {
            warn!(
                target: "overlay::push",
                overlay,
                backlog,
                waited_ms = waited.as_millis() as u64,
                "Replication backlog not drained"
            );
            return Err(Error::DrainTimeout(timeout));
        }
        debug!(target: "overlay::push", overlay, backlog, "Waiting for replication");
        ctx.sleeper().sleep(poll_interval);
        waited += poll_interval;
    }
}
