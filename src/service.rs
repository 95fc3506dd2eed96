//! Query orchestration.
//!
//! [`SeenService`] is the entry point used by a front end. It records
//! connection events into the [`IdentityStore`] and answers "seen" queries by
//! sequencing presence, store reads, the [`Disambiguator`] and the
//! [`NameCache`] into one [`QueryResult`].
//!
//! Queries never fail: a store outage produces an `Unknown` result flagged
//! `data_unavailable`, unless presence alone identifies a connected identity,
//! and remote failures only cost freshness.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::NameCache;
use crate::identity::{names_match, IdentityId};
use crate::presence::ConnectionRegistry;
use crate::resolver::{Disambiguator, Resolution, ResolvedVia};
use crate::storage::{ConnectionOutcome, IdentityStore, StorageError};
use crate::time::{Clock, SystemClock};

/// What the caller is asking about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Query {
    /// Someone who is or was known by this name.
    Name(String),
    /// A specific identity, typically the caller's own.
    Identity(IdentityId),
}

impl Query {
    /// A name query.
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }
}

/// Terminal state of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryStatus {
    /// One identity was found.
    Resolved,
    /// Nobody matches, or the store could not be read.
    Unknown,
    /// Several past holders and none currently holds the name.
    Ambiguous,
}

/// The queried name is an old name of the resolved identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasNotice {
    /// The name that was queried.
    pub old_name: String,
    /// The name the identity uses now.
    pub current_name: String,
}

/// Everything a renderer needs to answer one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Terminal state.
    pub status: QueryStatus,
    /// The resolved identity.
    pub identity_id: Option<IdentityId>,
    /// The name asked about; `None` for identity queries.
    pub queried_name: Option<String>,
    /// The name the identity holds now, as best known.
    pub resolved_current_name: Option<String>,
    /// First recorded connection.
    pub first_seen: Option<DateTime<Utc>>,
    /// Most recent recorded connection.
    pub last_seen: Option<DateTime<Utc>>,
    /// Oldest first, current name excluded.
    pub previous_names: Vec<String>,
    /// Only populated when `status` is `Ambiguous`.
    pub ambiguous_candidates: Vec<String>,
    /// Set when the queried name is not the current name.
    pub alias: Option<AliasNotice>,
    /// A timestamp or the current name could not be determined.
    pub had_missing_data: bool,
    /// The store failed during the query.
    pub data_unavailable: bool,
    /// Connected and not hidden.
    pub online: bool,
    /// Which resolution branch found the identity.
    pub resolved_via: Option<ResolvedVia>,
}

impl QueryResult {
    fn empty(status: QueryStatus, queried_name: Option<String>) -> Self {
        Self {
            status,
            identity_id: None,
            queried_name,
            resolved_current_name: None,
            first_seen: None,
            last_seen: None,
            previous_names: Vec::new(),
            ambiguous_candidates: Vec::new(),
            alias: None,
            had_missing_data: false,
            data_unavailable: false,
            online: false,
            resolved_via: None,
        }
    }

    /// Nobody matched.
    #[must_use]
    pub fn unknown(queried_name: Option<String>) -> Self {
        Self::empty(QueryStatus::Unknown, queried_name)
    }

    /// The store failed; nothing can be said.
    #[must_use]
    pub fn unavailable(queried_name: Option<String>) -> Self {
        Self {
            data_unavailable: true,
            ..Self::empty(QueryStatus::Unknown, queried_name)
        }
    }

    /// Several past holders.
    #[must_use]
    pub fn ambiguous(queried_name: String, candidates: Vec<String>) -> Self {
        Self {
            ambiguous_candidates: candidates,
            ..Self::empty(QueryStatus::Ambiguous, Some(queried_name))
        }
    }

    /// Returns true if the query found exactly one identity.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.status == QueryStatus::Resolved
    }

    /// How long an online identity has been connected, measured from `last_seen`.
    #[must_use]
    pub fn online_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.online {
            return None;
        }
        let since = self.last_seen?;
        Some((now - since).max(Duration::zero()))
    }

    /// Time since the identity was last seen, for offline identities.
    #[must_use]
    pub fn offline_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.online {
            return None;
        }
        let since = self.last_seen?;
        Some((now - since).max(Duration::zero()))
    }
}

/// Records connections and answers "seen" queries.
pub struct SeenService {
    store: Arc<dyn IdentityStore>,
    presence: Arc<dyn ConnectionRegistry>,
    cache: Arc<NameCache>,
    disambiguator: Disambiguator,
    clock: Arc<dyn Clock>,
}

impl SeenService {
    /// Create a service using the system clock for connection timestamps.
    #[must_use]
    pub fn new(
        store: Arc<dyn IdentityStore>,
        presence: Arc<dyn ConnectionRegistry>,
        cache: Arc<NameCache>,
    ) -> Self {
        Self::with_clock(store, presence, cache, Arc::new(SystemClock))
    }

    /// Create a service with an explicit clock.
    #[must_use]
    pub fn with_clock(
        store: Arc<dyn IdentityStore>,
        presence: Arc<dyn ConnectionRegistry>,
        cache: Arc<NameCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let disambiguator = Disambiguator::new(
            Arc::clone(&store),
            Arc::clone(&presence),
            Arc::clone(&cache),
        );
        Self {
            store,
            presence,
            cache,
            disambiguator,
            clock,
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    /// The name cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<NameCache> {
        &self.cache
    }

    /// Record a connection, surfacing store errors.
    ///
    /// # Errors
    /// Any [`StorageError`] other than an integrity violation, which the store absorbs.
    pub fn record_connection(
        &self,
        id: IdentityId,
        name: &str,
    ) -> Result<ConnectionOutcome, StorageError> {
        let outcome = self.store.record_connection(id, name, self.clock.now())?;
        if outcome.first_connection {
            info!(identity = %id, name = %name, "first connection recorded");
        } else if outcome.name_recorded {
            info!(identity = %id, name = %name, "new name recorded");
        }
        Ok(outcome)
    }

    /// Record a connection. Failures are logged and dropped.
    pub fn on_connection_observed(&self, id: IdentityId, name: &str) {
        if let Err(err) = self.record_connection(id, name) {
            warn!(identity = %id, name = %name, error = %err, "dropping connection event");
        }
    }

    /// Answer a query.
    pub fn query(&self, query: &Query) -> QueryResult {
        let result = match query {
            Query::Name(name) => self.query_name(name),
            Query::Identity(id) => self.query_identity(*id),
        };
        debug!(
            query = ?query,
            status = ?result.status,
            identity = ?result.identity_id,
            data_unavailable = result.data_unavailable,
            "query answered"
        );
        result
    }

    fn query_name(&self, name: &str) -> QueryResult {
        let name = name.trim();
        if name.is_empty() {
            return QueryResult::unknown(Some(String::new()));
        }

        let resolution = match self.disambiguator.resolve(name) {
            Ok(resolution) => resolution,
            Err(err) => return self.unavailable(Some(name.to_string()), &err),
        };

        match resolution {
            Resolution::Unknown => QueryResult::unknown(Some(name.to_string())),
            Resolution::Ambiguous { candidates } => {
                QueryResult::ambiguous(name.to_string(), candidates)
            }
            Resolution::Resolved {
                id,
                current_name,
                via,
            } => match self.describe(id, Some(name), current_name, via) {
                Ok(result) => result,
                Err(err) if via == ResolvedVia::Connected => {
                    self.presence_only(id, Some(name), via, &err)
                }
                Err(err) => self.unavailable(Some(name.to_string()), &err),
            },
        }
    }

    fn query_identity(&self, id: IdentityId) -> QueryResult {
        let known = match self.store.exists(id) {
            Ok(known) => known,
            Err(err) => return self.presence_only(id, None, ResolvedVia::Direct, &err),
        };
        if !known && !self.presence.is_connected(id) {
            return QueryResult::unknown(None);
        }
        self.describe(id, None, None, ResolvedVia::Direct)
            .unwrap_or_else(|err| self.presence_only(id, None, ResolvedVia::Direct, &err))
    }

    fn unavailable(&self, queried: Option<String>, err: &StorageError) -> QueryResult {
        warn!(queried = ?queried, error = %err, "identity store unavailable during query");
        QueryResult::unavailable(queried)
    }

    /// Answer from presence alone when the store fails for a connected identity.
    ///
    /// Falls back to [`QueryResult::unavailable`] if the identity is not connected.
    fn presence_only(
        &self,
        id: IdentityId,
        queried: Option<&str>,
        via: ResolvedVia,
        err: &StorageError,
    ) -> QueryResult {
        let Some(connection) = self.presence.connected_by_id(id) else {
            return self.unavailable(queried.map(str::to_string), err);
        };
        warn!(identity = %id, error = %err, "identity store unavailable; answering from presence");

        let alias = queried
            .filter(|old| !names_match(old, &connection.name))
            .map(|old| AliasNotice {
                old_name: old.to_string(),
                current_name: connection.name.clone(),
            });
        QueryResult {
            identity_id: Some(id),
            resolved_current_name: Some(connection.name),
            alias,
            had_missing_data: true,
            data_unavailable: true,
            online: !connection.hidden,
            resolved_via: Some(via),
            ..QueryResult::empty(QueryStatus::Resolved, queried.map(str::to_string))
        }
    }

    /// Build the full result for a resolved identity.
    fn describe(
        &self,
        id: IdentityId,
        queried: Option<&str>,
        known_name: Option<String>,
        via: ResolvedVia,
    ) -> Result<QueryResult, StorageError> {
        let connection = self.presence.connected_by_id(id);
        let current_name = match (&connection, known_name) {
            (Some(connection), _) => Some(connection.name.clone()),
            (None, Some(name)) => Some(name),
            (None, None) => self.disambiguator.current_name_of(id)?,
        };

        let record = self.store.get_record(id)?;
        let previous_names = self.store.get_history(id, current_name.as_deref())?;

        let alias = match (queried, &current_name) {
            (Some(old), Some(current)) if !names_match(old, current) => Some(AliasNotice {
                old_name: old.to_string(),
                current_name: current.clone(),
            }),
            _ => None,
        };

        Ok(QueryResult {
            status: QueryStatus::Resolved,
            identity_id: Some(id),
            queried_name: queried.map(str::to_string),
            resolved_current_name: current_name.clone(),
            first_seen: record.as_ref().map(|r| r.first_seen),
            last_seen: record.as_ref().map(|r| r.last_seen),
            previous_names,
            ambiguous_candidates: Vec::new(),
            alias,
            had_missing_data: record.is_none() || current_name.is_none(),
            data_unavailable: false,
            online: connection.map_or(false, |c| !c.hidden),
            resolved_via: Some(via),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cache::CacheConfig;
    use crate::presence::InMemoryConnectionRegistry;
    use crate::remote::{LookupError, NameAuthority, NameLookup};
    use crate::storage::InMemoryIdentityStore;
    use crate::time::ManualClock;

    struct DownAuthority;

    impl NameAuthority for DownAuthority {
        fn lookup(&self, _id: IdentityId) -> Result<NameLookup, LookupError> {
            Err(LookupError::Timeout { duration_ms: 5000 })
        }
    }

    struct Harness {
        presence: Arc<InMemoryConnectionRegistry>,
        clock: ManualClock,
        service: SeenService,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryIdentityStore::new());
        let presence = Arc::new(InMemoryConnectionRegistry::new());
        let clock = ManualClock::default();
        let cache = Arc::new(NameCache::with_clock(
            Arc::new(DownAuthority),
            Arc::new(clock.clone()),
            &CacheConfig::default(),
        ));
        let service = SeenService::with_clock(
            store,
            presence.clone(),
            cache,
            Arc::new(clock.clone()),
        );
        Harness {
            presence,
            clock,
            service,
        }
    }

    #[test]
    fn test_offline_identity_with_history() {
        let h = harness();
        let id = IdentityId::new();
        let first = h.clock.now();
        h.service.on_connection_observed(id, "Old");
        h.clock.advance(Duration::days(2));
        h.service.on_connection_observed(id, "New");

        let result = h.service.query(&Query::name("new"));
        assert!(result.is_resolved());
        assert_eq!(result.identity_id, Some(id));
        assert_eq!(result.resolved_current_name.as_deref(), Some("New"));
        assert_eq!(result.previous_names, vec!["Old".to_string()]);
        assert_eq!(result.first_seen, Some(first));
        assert_eq!(result.last_seen, Some(first + Duration::days(2)));
        assert!(result.alias.is_none());
        assert!(!result.online);
        assert!(!result.had_missing_data);
    }

    #[test]
    fn test_old_name_gets_alias_notice() {
        let h = harness();
        let id = IdentityId::new();
        h.service.on_connection_observed(id, "Bob");
        h.service.on_connection_observed(id, "Robert");

        let result = h.service.query(&Query::name("Bob"));
        assert_eq!(result.resolved_via, Some(ResolvedVia::UniqueHistory));
        assert_eq!(
            result.alias,
            Some(AliasNotice {
                old_name: "Bob".to_string(),
                current_name: "Robert".to_string(),
            })
        );
        assert_eq!(result.previous_names, vec!["Bob".to_string()]);
    }

    #[test]
    fn test_hidden_identity_reported_offline() {
        let h = harness();
        let id = IdentityId::new();
        h.service.on_connection_observed(id, "Sneaky");
        h.presence.connect(id, "Sneaky");

        assert!(h.service.query(&Query::name("sneaky")).online);

        h.presence.set_hidden(id, true);
        let result = h.service.query(&Query::name("sneaky"));
        assert!(result.is_resolved());
        assert!(!result.online);
        assert_eq!(result.online_for(h.clock.now()), None);
    }

    #[test]
    fn test_online_for_measured_from_last_seen() {
        let h = harness();
        let id = IdentityId::new();
        h.service.on_connection_observed(id, "Alice");
        h.presence.connect(id, "Alice");
        let joined = h.clock.now();
        h.clock.advance(Duration::minutes(42));

        let result = h.service.query(&Query::Identity(id));
        assert_eq!(result.resolved_via, Some(ResolvedVia::Direct));
        assert!(result.queried_name.is_none());
        assert_eq!(result.last_seen, Some(joined));
        assert_eq!(result.online_for(h.clock.now()), Some(Duration::minutes(42)));
        assert_eq!(result.offline_for(h.clock.now()), None);
    }

    #[test]
    fn test_unknown_identity_and_empty_name() {
        let h = harness();
        assert_eq!(h.service.query(&Query::Identity(IdentityId::new())).status, QueryStatus::Unknown);
        assert_eq!(h.service.query(&Query::name("   ")).status, QueryStatus::Unknown);
        assert_eq!(h.service.query(&Query::name("ghost")).status, QueryStatus::Unknown);
    }

    #[test]
    fn test_connected_without_record_flags_missing_data() {
        let h = harness();
        let id = IdentityId::new();
        h.presence.connect(id, "Fresh");

        let result = h.service.query(&Query::name("Fresh"));
        assert!(result.is_resolved());
        assert_eq!(result.resolved_via, Some(ResolvedVia::Connected));
        assert!(result.had_missing_data);
        assert!(result.first_seen.is_none());
    }
}
