//! Persistent identity store.
//!
//! Wraps:
//! - An in-memory [`IdentityIndex`] for reads
//! - The WAL for durable writes
//! - A snapshot produced by compaction

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::identity::{IdentityId, IdentityRecord};
use crate::storage::index::{recordable_name, IdentityIndex};
use crate::storage::memory::lock_err;
use crate::storage::traits::{ConnectionOutcome, IdentityStore, StorageError};

use super::file_lock::DirLock;
use super::snapshot::Snapshot;
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "seen.wal";

fn unavailable(context: &str, e: impl std::fmt::Display) -> StorageError {
    StorageError::Unavailable(format!("{context}: {e}"))
}

/// Applies one logged connection to the index. Shared by the write path and replay.
fn apply_connection(
    index: &mut IdentityIndex,
    id: IdentityId,
    at: DateTime<Utc>,
    name: Option<&str>,
    name_sequence: u64,
) -> ConnectionOutcome {
    let first_connection = index.upsert_record(id, at);
    let name_recorded = match name {
        Some(name) => match index.append_name(id, name, name_sequence) {
            Ok(()) => true,
            Err(e) => {
                debug!(identity = %id, name, error = %e, "skipping duplicate name row");
                false
            }
        },
        None => false,
    };
    ConnectionOutcome {
        first_connection,
        name_recorded,
    }
}

/// Result of a compaction.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    /// Identities written to the snapshot.
    pub identities: u64,
    /// Name rows written to the snapshot.
    pub names: u64,
    /// Path of the snapshot file.
    pub snapshot_path: PathBuf,
    /// WAL size before compaction.
    pub wal_size_before: u64,
    /// WAL size after compaction.
    pub wal_size_after: u64,
}

/// Durable identity store backed by a WAL and a snapshot.
#[derive(Debug)]
pub struct PersistentIdentityStore {
    dir: PathBuf,
    _lock: DirLock,
    wal: WriteAheadLog,
    snapshot: Snapshot,
    index: RwLock<IdentityIndex>,
    config: PersistentConfig,
}

impl PersistentIdentityStore {
    /// Open or create a store in `dir`.
    ///
    /// Loads the snapshot (if any), then replays the WAL on top of it.
    ///
    /// # Errors
    /// - `Unavailable` if the directory cannot be created, locked or opened
    /// - `Backend` if a WAL entry is corrupted
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| unavailable("failed to create database directory", e))?;
        let lock = DirLock::acquire(dir).map_err(|e| unavailable("failed to acquire lock", e))?;
        debug!(lock = %lock.path().display(), "acquired database lock");

        let snapshot = Snapshot::in_dir(dir);
        let index = match snapshot
            .load()
            .map_err(|e| StorageError::Backend(format!("failed to load snapshot: {e}")))?
        {
            Some((header, index)) => {
                info!(
                    identities = header.identity_count,
                    names = header.name_count,
                    created_at = %header.created_at,
                    "loaded identity snapshot"
                );
                index
            }
            None => IdentityIndex::default(),
        };

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
            .map_err(|e| unavailable("failed to open WAL", e))?;

        let store = Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            snapshot,
            index: RwLock::new(index),
            config,
        };
        store.replay_wal()?;
        Ok(store)
    }

    fn replay_wal(&self) -> Result<(), StorageError> {
        let iter = self
            .wal
            .iter()
            .map_err(|e| unavailable("failed to iterate WAL", e))?;
        let mut index = self.index.write().map_err(|_| lock_err("identity.replay"))?;

        let mut count = 0u64;
        for entry in iter {
            let entry =
                entry.map_err(|e| StorageError::Backend(format!("corrupted WAL entry: {e}")))?;
            match entry.kind {
                WalEntryKind::ConnectionRecorded {
                    identity_id,
                    at,
                    name,
                    name_sequence,
                } => {
                    apply_connection(&mut index, identity_id, at, name.as_deref(), name_sequence);
                }
                WalEntryKind::Checkpoint { up_to_sequence } => {
                    debug!(
                        up_to_sequence,
                        written_at = %entry.written_at,
                        "WAL checkpoint marker"
                    );
                }
            }
            count += 1;
        }

        if count > 0 {
            info!(entries = count, dir = %self.dir.display(), "replayed WAL");
        }
        Ok(())
    }

    /// Database directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current WAL size in bytes.
    pub fn wal_size(&self) -> Result<u64, StorageError> {
        self.wal.size_bytes().map_err(|e| unavailable("failed to stat WAL", e))
    }

    /// Total number of name rows across all identities.
    pub fn name_count(&self) -> Result<usize, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("identity.name_count"))?;
        Ok(index.name_count())
    }

    /// Write the full index to a new snapshot and truncate the WAL.
    ///
    /// Writers are blocked for the duration. If this fails partway through, the
    /// WAL still holds every entry and replay reconciles on the next open.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        let index = self.index.write().map_err(|_| lock_err("identity.compact"))?;
        let wal_size_before = self.wal_size()?;

        let header = self
            .snapshot
            .write(&index, self.config.sync_on_write)
            .map_err(|e| unavailable("failed to write snapshot", e))?;

        let up_to_sequence = self
            .wal
            .current_sequence()
            .map_err(|e| unavailable("failed to read WAL sequence", e))?;
        self.wal
            .append(WalEntryKind::Checkpoint { up_to_sequence })
            .map_err(|e| unavailable("failed to write checkpoint", e))?;
        self.wal
            .truncate()
            .map_err(|e| unavailable("failed to truncate WAL", e))?;
        drop(index);

        let result = CompactionResult {
            identities: header.identity_count,
            names: header.name_count,
            snapshot_path: self.snapshot.path().to_path_buf(),
            wal_size_before,
            wal_size_after: self.wal_size()?,
        };
        info!(
            identities = result.identities,
            names = result.names,
            wal_size_before = result.wal_size_before,
            "compacted identity store"
        );
        Ok(result)
    }

    fn maybe_compact(&self) {
        if !self.config.auto_compact {
            return;
        }
        match self.wal.size_bytes() {
            Ok(size) if size > self.config.max_wal_size => {
                if let Err(e) = self.compact() {
                    warn!(error = %e, "automatic compaction failed; WAL retained");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to stat WAL"),
        }
    }
}

impl IdentityStore for PersistentIdentityStore {
    fn record_connection(
        &self,
        id: IdentityId,
        observed_name: &str,
        at: DateTime<Utc>,
    ) -> Result<ConnectionOutcome, StorageError> {
        let outcome = {
            let mut index = self
                .index
                .write()
                .map_err(|_| lock_err("identity.record_connection"))?;

            let name = recordable_name(observed_name);
            let new_name = name.filter(|n| !index.has_name(id, n));
            if let (Some(name), None) = (name, new_name) {
                debug!(identity = %id, name, "name already recorded");
            }

            let name_sequence = index.next_sequence();
            self.wal
                .append(WalEntryKind::ConnectionRecorded {
                    identity_id: id,
                    at,
                    name: new_name.map(str::to_string),
                    name_sequence,
                })
                .map_err(|e| unavailable("WAL write failed", e))?;

            apply_connection(&mut index, id, at, new_name, name_sequence)
        };

        self.maybe_compact();
        Ok(outcome)
    }

    fn exists(&self, id: IdentityId) -> Result<bool, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("identity.exists"))?;
        Ok(index.records.contains_key(&id))
    }

    fn get_record(&self, id: IdentityId) -> Result<Option<IdentityRecord>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("identity.get_record"))?;
        Ok(index.get_record(id))
    }

    fn get_history(
        &self,
        id: IdentityId,
        excluding: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("identity.get_history"))?;
        Ok(index.history(id, excluding))
    }

    fn find_identities_by_name(&self, name: &str) -> Result<Vec<IdentityId>, StorageError> {
        let index = self
            .index
            .read()
            .map_err(|_| lock_err("identity.find_identities_by_name"))?;
        Ok(index.find_by_name(name))
    }

    fn most_recent_name_for(&self, id: IdentityId) -> Result<Option<String>, StorageError> {
        let index = self
            .index
            .read()
            .map_err(|_| lock_err("identity.most_recent_name_for"))?;
        Ok(index.most_recent_name(id))
    }

    fn identity_count(&self) -> Result<usize, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("identity.identity_count"))?;
        Ok(index.identity_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn config() -> PersistentConfig {
        PersistentConfig {
            sync_on_write: false,
            ..PersistentConfig::default()
        }
    }

    #[test]
    fn test_reopen_replays_connections() {
        let dir = tempdir().unwrap();
        let id = IdentityId::new();
        let t0 = Utc::now();

        {
            let store = PersistentIdentityStore::open(dir.path(), config()).unwrap();
            store.record_connection(id, "Alice", t0).unwrap();
            store
                .record_connection(id, "Alicia", t0 + Duration::minutes(1))
                .unwrap();
        }

        let store = PersistentIdentityStore::open(dir.path(), config()).unwrap();
        let record = store.get_record(id).unwrap().unwrap();
        assert_eq!(record.first_seen, t0);
        assert_eq!(record.last_seen, t0 + Duration::minutes(1));
        assert_eq!(store.get_history(id, None).unwrap(), vec!["Alice", "Alicia"]);
        assert_eq!(store.most_recent_name_for(id).unwrap().as_deref(), Some("Alicia"));
    }

    #[test]
    fn test_duplicate_names_are_not_logged_twice() {
        let dir = tempdir().unwrap();
        let id = IdentityId::new();
        let store = PersistentIdentityStore::open(dir.path(), config()).unwrap();

        store.record_connection(id, "Alice", Utc::now()).unwrap();
        let outcome = store.record_connection(id, "ALICE", Utc::now()).unwrap();
        assert!(!outcome.name_recorded);
        assert_eq!(store.name_count().unwrap(), 1);

        let logged_names = store
            .wal
            .iter()
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| {
                matches!(&e.kind, WalEntryKind::ConnectionRecorded { name: Some(_), .. })
            })
            .count();
        assert_eq!(logged_names, 1);
    }

    #[test]
    fn test_compaction_survives_reopen() {
        let dir = tempdir().unwrap();
        let a = IdentityId::new();
        let b = IdentityId::new();

        {
            let store = PersistentIdentityStore::open(dir.path(), config()).unwrap();
            store.record_connection(a, "Carl", Utc::now()).unwrap();
            store.record_connection(b, "carl", Utc::now()).unwrap();

            let result = store.compact().unwrap();
            assert_eq!(result.identities, 2);
            assert_eq!(result.names, 2);
            assert!(result.wal_size_after < result.wal_size_before);

            store.record_connection(b, "Carl2", Utc::now()).unwrap();
        }

        let store = PersistentIdentityStore::open(dir.path(), config()).unwrap();
        assert_eq!(store.find_identities_by_name("CARL").unwrap(), vec![a, b]);
        assert_eq!(store.most_recent_name_for(b).unwrap().as_deref(), Some("Carl2"));
        assert_eq!(store.identity_count().unwrap(), 2);
    }

    #[test]
    fn test_second_open_is_rejected_while_locked() {
        let dir = tempdir().unwrap();
        let _store = PersistentIdentityStore::open(dir.path(), config()).unwrap();
        let err = PersistentIdentityStore::open(dir.path(), config()).err().unwrap();
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_auto_compaction_triggers_on_wal_size() {
        let dir = tempdir().unwrap();
        let store = PersistentIdentityStore::open(
            dir.path(),
            PersistentConfig {
                sync_on_write: false,
                max_wal_size: 4 * 1024,
                auto_compact: true,
            },
        )
        .unwrap();

        for i in 0..200 {
            store
                .record_connection(IdentityId::new(), &format!("player_{i}"), Utc::now())
                .unwrap();
        }

        assert!(store.wal_size().unwrap() <= 4 * 1024 + 512);
        assert!(store.snapshot.path().exists());
        assert_eq!(store.identity_count().unwrap(), 200);
    }
}
