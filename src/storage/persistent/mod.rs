//! Persistent storage backend.
//!
//! Durable, crash-safe identity storage with:
//! - Write-ahead logging for crash recovery
//! - An exclusive directory lock for single-process access
//! - CRC32 checksums for corruption detection
//! - Snapshot compaction to bound replay time
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │           PersistentIdentityStore            │
//! ├──────────────────────────────────────────────┤
//! │  ┌───────────────┐   ┌──────────────────┐    │
//! │  │ WriteAheadLog │   │ Snapshot         │    │
//! │  │ (append-only) │   │ (temp + rename)  │    │
//! │  └───────┬───────┘   └────────┬─────────┘    │
//! │          └─────────┬──────────┘              │
//! │                    ↓                         │
//! │          ┌──────────────────┐                │
//! │          │ DirLock (flock)  │                │
//! │          └──────────────────┘                │
//! └──────────────────────────────────────────────┘
//! ```

mod codec;
mod file_lock;
mod snapshot;
mod stores;
mod wal;

pub use stores::{CompactionResult, PersistentIdentityStore};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SeenError};

/// Configuration for persistent storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// WAL size (bytes) above which a write triggers compaction.
    pub max_wal_size: u64,
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
    /// Compact automatically once the WAL exceeds `max_wal_size`.
    pub auto_compact: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024, // 64 MB
            sync_on_write: true,
            auto_compact: true,
        }
    }
}

impl PersistentConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024; // avoids compacting on nearly every write

    /// Validate the configuration.
    ///
    /// # Errors
    /// `ConfigError::InvalidField` if `max_wal_size` is below 4 KiB.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(ConfigError::invalid(
                "store.persistent.max_wal_size",
                format!(
                    "must be at least {} bytes (got {})",
                    Self::MIN_WAL_SIZE,
                    self.max_wal_size
                ),
            ));
        }
        Ok(self)
    }
}

/// On-disk location plus settings, as found in the store section of a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentLocation {
    /// Database directory.
    pub path: PathBuf,
    /// Storage settings.
    #[serde(default)]
    pub settings: PersistentConfig,
}

/// Open or create a persistent SeenDB database at `path`.
///
/// # Errors
/// - If the configuration is invalid
/// - If the directory cannot be created or is locked by another process
/// - If WAL replay fails due to corruption
///
/// # Example
/// ```rust,ignore
/// use seendb::storage::persistent::open_database;
///
/// let store = open_database("./seen.db", None)?;
/// ```
pub fn open_database(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentIdentityStore, SeenError> {
    let cfg = config.unwrap_or_default().validate()?;
    Ok(PersistentIdentityStore::open(path.as_ref(), cfg)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_tiny_wal() {
        let cfg = PersistentConfig {
            max_wal_size: 100,
            ..PersistentConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_wal_size"));
    }

    #[test]
    fn test_open_database_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_database(dir.path().join("nested/db"), None).unwrap();
        assert!(store.dir().ends_with("nested/db"));
    }
}
