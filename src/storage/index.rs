//! In-memory identity index shared by every backend.
//!
//! The persistent backend snapshots this structure verbatim, so it is serializable.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{name_key, IdentityId, IdentityRecord, NameRecord};
use crate::storage::traits::StorageError;

/// Identity records plus name history, indexed by identity and by normalized name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct IdentityIndex {
    pub(crate) records: HashMap<IdentityId, IdentityRecord>,
    /// Per identity, name rows in ascending sequence order.
    pub(crate) history: HashMap<IdentityId, Vec<NameRecord>>,
    /// Normalized name -> identities in the order their rows were recorded.
    pub(crate) by_name: HashMap<String, Vec<IdentityId>>,
    pub(crate) next_sequence: u64,
}

impl IdentityIndex {
    /// Inserts a record first seen at `at`, or advances `last_seen`.
    ///
    /// Returns true when the identity was inserted.
    pub(crate) fn upsert_record(&mut self, id: IdentityId, at: DateTime<Utc>) -> bool {
        match self.records.get_mut(&id) {
            Some(record) => {
                record.touch(at);
                false
            }
            None => {
                self.records.insert(id, IdentityRecord::first_seen_at(id, at));
                true
            }
        }
    }

    /// Returns true if `name` is already recorded for `id` (case-insensitive).
    pub(crate) fn has_name(&self, id: IdentityId, name: &str) -> bool {
        self.by_name
            .get(&name_key(name))
            .map_or(false, |ids| ids.contains(&id))
    }

    /// The sequence number the next appended name will receive.
    pub(crate) const fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Appends a name row.
    ///
    /// # Errors
    /// `IntegrityViolation` if the (identity, name) pair already exists.
    pub(crate) fn append_name(
        &mut self,
        id: IdentityId,
        name: &str,
        sequence: u64,
    ) -> Result<(), StorageError> {
        if self.has_name(id, name) {
            return Err(StorageError::IntegrityViolation(format!(
                "duplicate name row: identity={id} name={name}"
            )));
        }

        self.by_name.entry(name_key(name)).or_default().push(id);
        self.history.entry(id).or_default().push(NameRecord {
            identity_id: id,
            name: name.to_string(),
            sequence,
        });
        self.next_sequence = self.next_sequence.max(sequence + 1);
        Ok(())
    }

    pub(crate) fn get_record(&self, id: IdentityId) -> Option<IdentityRecord> {
        self.records.get(&id).cloned()
    }

    pub(crate) fn history(&self, id: IdentityId, excluding: Option<&str>) -> Vec<String> {
        let excluded = excluding.map(name_key);
        self.history
            .get(&id)
            .map(|rows| {
                rows.iter()
                    .filter(|row| excluded.as_deref() != Some(name_key(&row.name).as_str()))
                    .map(|row| row.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn find_by_name(&self, name: &str) -> Vec<IdentityId> {
        self.by_name.get(&name_key(name)).cloned().unwrap_or_default()
    }

    pub(crate) fn most_recent_name(&self, id: IdentityId) -> Option<String> {
        self.history
            .get(&id)
            .and_then(|rows| rows.iter().max_by_key(|row| row.sequence))
            .map(|row| row.name.clone())
    }

    pub(crate) fn identity_count(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn name_count(&self) -> usize {
        self.history.values().map(Vec::len).sum()
    }
}

/// Trims an observed name; returns `None` for names that must not be recorded.
pub(crate) fn recordable_name(observed: &str) -> Option<&str> {
    let trimmed = observed.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_name_rejects_case_insensitive_duplicate() {
        let mut index = IdentityIndex::default();
        let id = IdentityId::new();
        index.append_name(id, "Alice", 0).unwrap();

        let err = index.append_name(id, "ALICE", 1).unwrap_err();
        assert!(err.is_integrity_violation());
        assert_eq!(index.name_count(), 1);
    }

    #[test]
    fn test_same_name_under_two_identities() {
        let mut index = IdentityIndex::default();
        let a = IdentityId::new();
        let b = IdentityId::new();
        index.append_name(a, "Carl", 0).unwrap();
        index.append_name(b, "carl", 1).unwrap();
        assert_eq!(index.find_by_name("CARL"), vec![a, b]);
    }

    #[test]
    fn test_history_excludes_current_and_keeps_order() {
        let mut index = IdentityIndex::default();
        let id = IdentityId::new();
        index.append_name(id, "first", 0).unwrap();
        index.append_name(id, "second", 1).unwrap();
        index.append_name(id, "third", 2).unwrap();

        assert_eq!(index.history(id, None), vec!["first", "second", "third"]);
        assert_eq!(index.history(id, Some("SECOND")), vec!["first", "third"]);
        assert_eq!(index.most_recent_name(id).as_deref(), Some("third"));
    }

    #[test]
    fn test_next_sequence_tracks_replayed_rows() {
        let mut index = IdentityIndex::default();
        index.append_name(IdentityId::new(), "x", 41).unwrap();
        assert_eq!(index.next_sequence(), 42);
    }

    #[test]
    fn test_recordable_name() {
        assert_eq!(recordable_name("  Bob "), Some("Bob"));
        assert_eq!(recordable_name("   "), None);
        assert_eq!(recordable_name(""), None);
    }
}
