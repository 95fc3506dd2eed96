//! Compacted snapshot of the identity index.
//!
//! A snapshot is written to a temporary file and renamed into place, so a
//! crash leaves either the old snapshot or the new one, never a partial file.
//!
//! ```text
//! [MAGIC][VERSION][frame: SnapshotHeader][frame: IdentityIndex]
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::index::IdentityIndex;

use super::codec;

const SNAPSHOT_FILE: &str = "identities.snap";

/// Metadata stored ahead of the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Identities captured.
    pub identity_count: u64,
    /// Name rows captured.
    pub name_count: u64,
}

/// Location of the snapshot inside a database directory.
#[derive(Debug, Clone)]
pub struct Snapshot {
    path: PathBuf,
}

impl Snapshot {
    /// Snapshot handle for `dir`. The file need not exist yet.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(SNAPSHOT_FILE),
        }
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot. Returns `None` if none has been written yet.
    pub fn load(&self) -> IoResult<Option<(SnapshotHeader, IdentityIndex)>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        let header: SnapshotHeader = codec::decode(&mut reader)?;
        let index: IdentityIndex = codec::decode(&mut reader)?;
        Ok(Some((header, index)))
    }

    /// Atomically replace the snapshot with `index`.
    pub fn write(&self, index: &IdentityIndex, sync: bool) -> IoResult<SnapshotHeader> {
        let header = SnapshotHeader {
            created_at: Utc::now(),
            identity_count: index.identity_count() as u64,
            name_count: index.name_count() as u64,
        };

        let temp_path = self.path.with_extension(format!("snap.tmp.{}", Uuid::new_v4()));
        let result = Self::write_file(&temp_path, &header, index, sync)
            .and_then(|()| fs::rename(&temp_path, &self.path));
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result?;

        if sync {
            if let Some(parent) = self.path.parent() {
                // Persist the rename itself. Not every platform allows opening a directory.
                if let Ok(dir) = File::open(parent) {
                    let _ = dir.sync_all();
                }
            }
        }
        Ok(header)
    }

    fn write_file(
        path: &Path,
        header: &SnapshotHeader,
        index: &IdentityIndex,
        sync: bool,
    ) -> IoResult<()> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        codec::write_header(&mut writer)?;
        writer.write_all(&codec::encode(header)?)?;
        writer.write_all(&codec::encode(index)?)?;
        writer.flush()?;
        if sync {
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }
}
