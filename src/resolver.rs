//! Name disambiguation.
//!
//! Turns a queried name into one identity, or explains why it cannot:
//!
//! 1. A connected identity using the name wins outright.
//! 2. Otherwise the store lists every identity that ever used the name.
//!    - none: [`Resolution::Unknown`]
//!    - one: that identity, even if it has moved on to another name
//!    - several: the first candidate whose *current* name is the query,
//!      else [`Resolution::Ambiguous`] with the candidates' current names.
//!
//! Candidates are scanned oldest first (`first_seen`, then identity id) so the
//! outcome does not depend on storage iteration order. A candidate's current
//! name comes from the [`NameCache`] and falls back to the store's most recent
//! name when the remote authority has nothing.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::NameCache;
use crate::identity::{name_key, names_match, IdentityId, IdentityRecord};
use crate::presence::ConnectionRegistry;
use crate::storage::{IdentityStore, StorageError};

/// How a resolved identity was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolvedVia {
    /// Connected right now under the queried name.
    Connected,
    /// The only identity that ever used the queried name.
    UniqueHistory,
    /// One of several past holders, and the one holding the name now.
    CurrentHolder,
    /// The caller asked about the identity itself.
    Direct,
}

/// Outcome of disambiguating one name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one identity.
    Resolved {
        /// The identity.
        id: IdentityId,
        /// Current name when already established during resolution.
        current_name: Option<String>,
        /// Which branch produced the answer.
        via: ResolvedVia,
    },
    /// Nobody has ever been seen under this name.
    Unknown,
    /// Several past holders, none of which holds the name now.
    Ambiguous {
        /// Distinct current names of the candidates, in scan order.
        candidates: Vec<String>,
    },
}

/// Resolves queried names against presence, history and the name cache.
pub struct Disambiguator {
    store: Arc<dyn IdentityStore>,
    presence: Arc<dyn ConnectionRegistry>,
    cache: Arc<NameCache>,
}

impl Disambiguator {
    /// Create a disambiguator over shared components.
    #[must_use]
    pub fn new(
        store: Arc<dyn IdentityStore>,
        presence: Arc<dyn ConnectionRegistry>,
        cache: Arc<NameCache>,
    ) -> Self {
        Self {
            store,
            presence,
            cache,
        }
    }

    /// Resolve `query` to an identity.
    ///
    /// # Errors
    /// Store failures are returned unchanged; remote failures never are.
    pub fn resolve(&self, query: &str) -> Result<Resolution, StorageError> {
        if let Some(connected) = self.presence.connected_by_name(query) {
            debug!(name = %query, identity = %connected.id, "name held by a connected identity");
            return Ok(Resolution::Resolved {
                id: connected.id,
                current_name: Some(connected.name),
                via: ResolvedVia::Connected,
            });
        }

        let candidates = self.store.find_identities_by_name(query)?;
        match candidates.as_slice() {
            [] => Ok(Resolution::Unknown),
            [only] => Ok(Resolution::Resolved {
                id: *only,
                current_name: None,
                via: ResolvedVia::UniqueHistory,
            }),
            _ => self.pick_current_holder(query, candidates),
        }
    }

    /// The name `id` holds now: cache/remote first, then the store's latest name.
    ///
    /// # Errors
    /// Propagates store failures from the fallback read.
    pub fn current_name_of(&self, id: IdentityId) -> Result<Option<String>, StorageError> {
        match self.cache.resolve(id) {
            Some(name) => Ok(Some(name)),
            None => self.store.most_recent_name_for(id),
        }
    }

    fn pick_current_holder(
        &self,
        query: &str,
        candidates: Vec<IdentityId>,
    ) -> Result<Resolution, StorageError> {
        let ordered = self.scan_order(candidates)?;

        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for id in ordered {
            let Some(current) = self.current_name_of(id)? else {
                debug!(identity = %id, "candidate has no known current name");
                continue;
            };
            if names_match(&current, query) {
                return Ok(Resolution::Resolved {
                    id,
                    current_name: Some(current),
                    via: ResolvedVia::CurrentHolder,
                });
            }
            if seen.insert(name_key(&current)) {
                names.push(current);
            }
        }

        debug!(name = %query, candidates = names.len(), "name is ambiguous");
        Ok(Resolution::Ambiguous { candidates: names })
    }

    /// Oldest `first_seen` first, ties by id; candidates without a record last.
    fn scan_order(&self, candidates: Vec<IdentityId>) -> Result<Vec<IdentityId>, StorageError> {
        let mut keyed: Vec<(Option<IdentityRecord>, IdentityId)> = candidates
            .into_iter()
            .map(|id| Ok((self.store.get_record(id)?, id)))
            .collect::<Result<_, StorageError>>()?;

        keyed.sort_by(|(a_rec, a_id), (b_rec, b_id)| {
            let by_first_seen = match (a_rec, b_rec) {
                (Some(a), Some(b)) => a.first_seen.cmp(&b.first_seen),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            by_first_seen.then_with(|| a_id.cmp(b_id))
        });
        keyed.dedup_by_key(|(_, id)| *id);

        Ok(keyed.into_iter().map(|(_, id)| id).collect())
    }
}
