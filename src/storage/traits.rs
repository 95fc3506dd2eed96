//! Abstract storage traits for SeenDB.
//!
//! The identity store is a repository: it returns plain records and reports
//! failures as values. Backends:
//! - In-memory, for tests and embedded use
//! - Persistent (WAL + snapshot), for production

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::identity::{IdentityId, IdentityRecord};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend cannot be reached (I/O failure, lost connection).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness constraint was violated (e.g. duplicate name row under a race).
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// Identity not found.
    #[error("Identity not found: {0}")]
    NotFound(IdentityId),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Returns true if the backend is unreachable.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Returns true for benign constraint breaches that callers should treat as no-ops.
    #[must_use]
    pub const fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::IntegrityViolation(_))
    }
}

/// What a single `record_connection` call changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionOutcome {
    /// The identity had never been seen before this call.
    pub first_connection: bool,
    /// The observed name was appended to the identity's history.
    pub name_recorded: bool,
}

/// Storage trait for identity records and name history.
///
/// # Safety Considerations
/// - `record_connection` must apply the record upsert and the name append atomically
/// - Writers for the same identity must be serialized; readers may run concurrently
pub trait IdentityStore: Send + Sync {
    /// Upsert the identity record and append `observed_name` if it is new for that identity.
    ///
    /// `first_seen` is only written on insert; `last_seen` never moves backwards.
    /// Empty names are ignored. A duplicate name is a no-op, not an error.
    fn record_connection(
        &self,
        id: IdentityId,
        observed_name: &str,
        at: DateTime<Utc>,
    ) -> Result<ConnectionOutcome, StorageError>;

    /// Returns true if the identity has a record.
    fn exists(&self, id: IdentityId) -> Result<bool, StorageError>;

    /// Get the identity record.
    fn get_record(&self, id: IdentityId) -> Result<Option<IdentityRecord>, StorageError>;

    /// Name history for an identity, oldest first, optionally excluding one name
    /// (case-insensitive).
    fn get_history(
        &self,
        id: IdentityId,
        excluding: Option<&str>,
    ) -> Result<Vec<String>, StorageError>;

    /// All identities that have ever used `name` (case-insensitive), in the order
    /// their name rows were recorded.
    fn find_identities_by_name(&self, name: &str) -> Result<Vec<IdentityId>, StorageError>;

    /// The most recently recorded name for an identity.
    fn most_recent_name_for(&self, id: IdentityId) -> Result<Option<String>, StorageError>;

    /// Number of identities ever observed.
    fn identity_count(&self) -> Result<usize, StorageError>;
}
