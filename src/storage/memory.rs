//! In-memory storage backend.
//!
//! Thread-safe in-memory implementation of [`IdentityStore`]. It is intended for
//! embedded usage, tests, and as a reference implementation.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::identity::{IdentityId, IdentityRecord};
use crate::storage::index::{recordable_name, IdentityIndex};
use crate::storage::traits::{ConnectionOutcome, IdentityStore, StorageError};

pub(crate) fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory identity store.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    index: RwLock<IdentityIndex>,
}

impl InMemoryIdentityStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of name rows across all identities.
    pub fn name_count(&self) -> Result<usize, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("identity.name_count"))?;
        Ok(index.name_count())
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn record_connection(
        &self,
        id: IdentityId,
        observed_name: &str,
        at: DateTime<Utc>,
    ) -> Result<ConnectionOutcome, StorageError> {
        let mut index = self
            .index
            .write()
            .map_err(|_| lock_err("identity.record_connection"))?;

        let first_connection = index.upsert_record(id, at);
        let mut name_recorded = false;

        if let Some(name) = recordable_name(observed_name) {
            let sequence = index.next_sequence();
            match index.append_name(id, name, sequence) {
                Ok(()) => name_recorded = true,
                Err(e) if e.is_integrity_violation() => {
                    debug!(identity = %id, name, "name already recorded");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(ConnectionOutcome {
            first_connection,
            name_recorded,
        })
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
