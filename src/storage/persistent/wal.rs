//! Write-ahead log.
//!
//! Every connection event is appended here before it is applied to the
//! in-memory index, and the log is replayed on open.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec frame of WalEntry]
//! [ENTRY 2: codec frame of WalEntry]
//! ...
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::identity::IdentityId;

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number (reset by truncation).
    pub sequence: u64,
    /// When this entry was written.
    pub written_at: DateTime<Utc>,
    /// The logged mutation.
    pub kind: WalEntryKind,
}

/// The type of WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// One observed connection: record upsert plus optional name append.
    ///
    /// Both halves live in one entry so replay can never split them.
    ConnectionRecorded {
        identity_id: IdentityId,
        at: DateTime<Utc>,
        /// Present only when the name was new for this identity.
        name: Option<String>,
        /// Name-row sequence assigned at write time.
        name_sequence: u64,
    },

    /// All entries up to `up_to_sequence` are captured in the snapshot.
    Checkpoint { up_to_sequence: u64 },
}

#[derive(Debug)]
struct WalState {
    writer: BufWriter<File>,
    sequence: u64,
}

/// Write-ahead log. Thread-safe via an internal mutex.
#[derive(Debug)]
pub struct WriteAheadLog {
    path: PathBuf,
    state: Mutex<WalState>,
    sync_on_write: bool,
}

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned lock: wal")
}

impl WriteAheadLog {
    /// Open or create a WAL file.
    ///
    /// An existing file is scanned for its last valid sequence number; a new
    /// file gets a header.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let existing_len = path.metadata().map(|m| m.len()).unwrap_or(0);

        let sequence = if existing_len >= 5 {
            let (sequence, torn_at) = Self::find_last_sequence(path)?;
            if let Some(valid_len) = torn_at {
                // Drop a partially written trailing entry so new appends stay readable.
                warn!(
                    after_sequence = sequence,
                    discarded_bytes = existing_len - valid_len,
                    "truncating torn WAL tail"
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len)?;
                if sync_on_write {
                    file.sync_all()?;
                }
            }
            sequence
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            0
        };

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(WalState {
                writer: BufWriter::new(file),
                sequence,
            }),
            sync_on_write,
        })
    }

    fn lock(&self) -> IoResult<MutexGuard<'_, WalState>> {
        self.state.lock().map_err(|_| poisoned())
    }

    /// Append an entry. Returns the sequence number assigned to it.
    ///
    /// The sequence only advances once the bytes are flushed (and synced when
    /// `sync_on_write` is set). A failed append leaves the file as it was.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut state = self.lock()?;

        let candidate = state.sequence + 1;
        let encoded = codec::encode(&WalEntry {
            sequence: candidate,
            written_at: Utc::now(),
            kind,
        })?;

        let start_len = state.writer.get_ref().metadata()?.len();
        if let Err(e) = Self::write_frame(&mut state.writer, &encoded, self.sync_on_write) {
            if let Err(rollback) = self.rollback(&mut state, start_len) {
                warn!(error = %rollback, start_len, "failed to roll back WAL append");
            }
            return Err(e);
        }

        state.sequence = candidate;
        Ok(candidate)
    }

    fn write_frame(writer: &mut BufWriter<File>, frame: &[u8], sync: bool) -> IoResult<()> {
        writer.write_all(frame)?;
        writer.flush()?;
        if sync {
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Discard buffered bytes of a failed append and cut the file back to `len`.
    fn rollback(&self, state: &mut WalState, len: u64) -> IoResult<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let failed = std::mem::replace(&mut state.writer, BufWriter::new(file));
        // into_parts hands back the buffer without flushing it.
        let (_stale, _unwritten) = failed.into_parts();
        let file = state.writer.get_ref();
        file.set_len(len)?;
        if self.sync_on_write {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Iterate over all entries, oldest first.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// The last assigned sequence number.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.lock()?.sequence)
    }

    /// WAL file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Discard every entry and start a fresh log.
    ///
    /// Only call this after the snapshot covering those entries is durable.
    pub fn truncate(&self) -> IoResult<()> {
        let mut state = self.lock()?;
        state.writer.flush()?;

        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        codec::write_header(&mut file)?;
        if self.sync_on_write {
            file.sync_all()?;
        }
        drop(file);

        state.writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        state.sequence = 0;
        Ok(())
    }

    /// Last valid sequence, plus the length to cut the file to if its tail is torn.
    fn find_last_sequence(path: &Path) -> IoResult<(u64, Option<u64>)> {
        let mut last_seq = 0;
        let mut iter = WalIterator::new(path)?;
        for entry in iter.by_ref() {
            match entry {
                Ok(entry) => last_seq = entry.sequence,
                Err(e) => {
                    warn!(after_sequence = last_seq, error = %e, "WAL corruption detected");
                    return Ok((last_seq, None));
                }
            }
        }
        let torn_at = iter.torn.then_some(iter.valid_len);
        Ok((last_seq, torn_at))
    }
}

/// Iterator over WAL entries. A truncated trailing entry ends iteration.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
    /// End offset of the last fully decoded entry.
    valid_len: u64,
    torn: bool,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        let valid_len = reader.stream_position()?;
        Ok(Self {
            reader,
            file_size,
            valid_len,
            torn: false,
        })
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.stream_position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => match self.reader.stream_position() {
                Ok(pos) => {
                    self.valid_len = pos;
                    Some(Ok(entry))
                }
                Err(e) => Some(Err(e)),
            },
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.torn = true;
                None
            }
            Err(e) => Some(Err(e)),
        }
    }
}
