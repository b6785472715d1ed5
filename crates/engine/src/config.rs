//! Overlay configuration via `overlay.toml`
//!
//! One file holds the row lock budget, the push timings and the directory of
//! overlay metadata records. Missing keys fall back to their defaults, so an
//! empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use overlay_concurrency::LockConfig;
use overlay_core::{Error, Result};

/// Config file name looked up in the working directory by callers
pub const CONFIG_FILE_NAME: &str = "overlay.toml";

/// Row lock retry budget, persisted under `[lock]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockSection {
    /// Compare-and-swap attempts before `RowLockTimeout` (default: 300)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Sleep between attempts in milliseconds (default: 1)
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_max_attempts() -> u32 {
    300
}

fn default_retry_interval_ms() -> u64 {
    1
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

/// Push workflow timings, persisted under `[push]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushSection {
    /// Delay between replication backlog polls (default: 3000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Wait after the backlog reached zero (default: 6000)
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Upper bound on the draining phase (default: 600000)
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_settle_delay_ms() -> u64 {
    6000
}

fn default_drain_timeout_ms() -> u64 {
    600_000
}

impl Default for PushSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// Overlay configuration loaded from `overlay.toml`.
///
/// # Example
///
/// ```toml
/// metadata_dir = "/var/lib/overlaydb"
///
/// [lock]
/// max_attempts = 300
/// retry_interval_ms = 1
///
/// [push]
/// poll_interval_ms = 3000
/// settle_delay_ms = 6000
/// drain_timeout_ms = 600000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Directory holding `.meta_<overlay>` records and push lock files
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: PathBuf,
    /// Row lock budget
    #[serde(default)]
    pub lock: LockSection,
    /// Push timings
    #[serde(default)]
    pub push: PushSection,
}

fn default_metadata_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            metadata_dir: default_metadata_dir(),
            lock: LockSection::default(),
            push: PushSection::default(),
        }
    }
}

impl OverlayConfig {
    /// Default configuration with records kept in `dir`
    pub fn with_metadata_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            metadata_dir: dir.into(),
            ..Self::default()
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# overlaydb configuration
#
# Directory holding overlay metadata records (.meta_<overlay>) and push locks
metadata_dir = "."

[lock]
# Compare-and-swap attempts before a write fails with RowLockTimeout
max_attempts = 300
# Sleep between attempts, in milliseconds
retry_interval_ms = 1

[push]
# Replication backlog poll interval, in milliseconds
poll_interval_ms = 3000
# Extra wait once the backlog reached zero, in milliseconds
settle_delay_ms = 6000
# Give up draining after this long, in milliseconds
drain_timeout_ms = 600000
"#
    }

    /// Reject values that would make every lock attempt or drain poll fail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero lock budget, a zero poll interval,
    /// or a drain timeout shorter than one poll.
    pub fn validate(&self) -> Result<()> {
        if self.lock.max_attempts == 0 {
            return Err(Error::Config(
                "lock.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.push.poll_interval_ms == 0 {
            return Err(Error::Config(
                "push.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.push.drain_timeout_ms < self.push.poll_interval_ms {
            return Err(Error::Config(format!(
                "push.drain_timeout_ms ({}) is shorter than push.poll_interval_ms ({})",
                self.push.drain_timeout_ms, self.push.poll_interval_ms
            )));
        }
        Ok(())
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OverlayConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Lock budget in the form the row lock takes
    pub fn lock_config(&self) -> LockConfig {
        LockConfig::new()
            .with_max_attempts(self.lock.max_attempts)
            .with_retry_interval(Duration::from_millis(self.lock.retry_interval_ms))
    }

    /// Delay between backlog polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.push.poll_interval_ms)
    }

    /// Wait after the backlog drained
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.push.settle_delay_ms)
    }

    /// Bound on the draining phase
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.push.drain_timeout_ms)
    }
}
