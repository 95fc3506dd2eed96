//! Time-bounded cache of remote name lookups.
//!
//! [`NameCache::resolve`] returns a cached name while it is fresh and otherwise
//! asks the [`NameAuthority`]. Concurrent misses for the same identity share a
//! single remote call: the first caller becomes the leader and performs the
//! lookup, later callers wait on the leader's flight and receive its outcome.
//!
//! Only successful lookups are cached. Failures and "not found" answers are
//! returned as `None` and retried on the next call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::identity::IdentityId;
use crate::remote::{LookupError, NameAuthority, NameLookup};
use crate::time::{Clock, SystemClock};

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a successful lookup, in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 600 }
    }
}

impl CacheConfig {
    const MAX_TTL_SECS: u64 = 7 * 24 * 60 * 60;

    /// Validate the configuration.
    ///
    /// # Errors
    /// `ConfigError::InvalidField` if the TTL is zero or longer than a week.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.ttl_secs == 0 {
            return Err(ConfigError::invalid("cache.ttl_secs", "must be > 0"));
        }
        if self.ttl_secs > Self::MAX_TTL_SECS {
            return Err(ConfigError::invalid(
                "cache.ttl_secs",
                format!("must be at most {} (got {})", Self::MAX_TTL_SECS, self.ttl_secs),
            ));
        }
        Ok(self)
    }

    /// The TTL as a duration, clamped to `1..=MAX_TTL_SECS` seconds for unvalidated configs.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        let secs = self.ttl_secs.clamp(1, Self::MAX_TTL_SECS);
        Duration::seconds(i64::try_from(secs).unwrap_or(1))
    }
}

/// Counters describing cache behavior since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Calls answered from a fresh entry.
    pub hits: u64,
    /// Calls that found no fresh entry.
    pub misses: u64,
    /// Lookups actually sent to the authority.
    pub remote_calls: u64,
    /// Lookups that ended in a transport, status or parse error.
    pub failures: u64,
    /// Lookups the authority answered with "not found".
    pub not_found: u64,
    /// Callers that waited on another caller's in-flight lookup.
    pub coalesced: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    remote_calls: AtomicU64,
    failures: AtomicU64,
    not_found: AtomicU64,
    coalesced: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            remote_calls: self.remote_calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    name: String,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// A lookup in progress. Followers block on `done` until `outcome` is set.
#[derive(Debug, Default)]
struct Flight {
    outcome: Mutex<Option<Option<String>>>,
    done: Condvar,
}

impl Flight {
    fn finish(&self, outcome: Option<String>) {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.done.notify_all();
    }

    fn wait(&self) -> Option<String> {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self.done.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<IdentityId, CacheEntry>,
    in_flight: HashMap<IdentityId, Arc<Flight>>,
}

enum Role {
    Leader(Arc<Flight>),
    Follower(Arc<Flight>),
}

/// Completes the leader's flight with `None` if the lookup unwinds.
struct FlightGuard<'a> {
    cache: &'a NameCache,
    id: IdentityId,
    flight: Arc<Flight>,
    finished: bool,
}

impl FlightGuard<'_> {
    fn complete(mut self, outcome: Option<String>) {
        self.finished = true;
        self.cache.land(self.id, &self.flight, outcome);
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cache.land(self.id, &self.flight, None);
        }
    }
}

/// TTL cache of identity → current name with single-flight remote lookups.
pub struct NameCache {
    authority: Arc<dyn NameAuthority>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    state: Mutex<CacheState>,
    counters: Counters,
}

impl std::fmt::Debug for NameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameCache")
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl NameCache {
    /// Create a cache over `authority` using the system clock.
    #[must_use]
    pub fn new(authority: Arc<dyn NameAuthority>, config: &CacheConfig) -> Self {
        Self::with_clock(authority, Arc::new(SystemClock), config)
    }

    /// Create a cache with an explicit clock.
    #[must_use]
    pub fn with_clock(
        authority: Arc<dyn NameAuthority>,
        clock: Arc<dyn Clock>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            authority,
            clock,
            ttl: config.ttl(),
            state: Mutex::new(CacheState::default()),
            counters: Counters::default(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        // Every critical section leaves the maps consistent, so a poisoned lock is safe to reuse.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entry lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The current name for `id`, from cache or the remote authority.
    ///
    /// Blocks for at most one remote round-trip. Returns `None` when the
    /// authority fails or does not know the identity.
    pub fn resolve(&self, id: IdentityId) -> Option<String> {
        let role = {
            let mut state = self.lock_state();
            let now = self.clock.now();
            match state.entries.get(&id) {
                Some(entry) if !entry.is_expired(now) => {
                    Counters::bump(&self.counters.hits);
                    debug!(identity = %id, name = %entry.name, "name cache hit");
                    return Some(entry.name.clone());
                }
                Some(_) => {
                    state.entries.remove(&id);
                }
                None => {}
            }
            Counters::bump(&self.counters.misses);

            match state.in_flight.get(&id) {
                Some(flight) => {
                    Counters::bump(&self.counters.coalesced);
                    Role::Follower(Arc::clone(flight))
                }
                None => {
                    let flight = Arc::new(Flight::default());
                    state.in_flight.insert(id, Arc::clone(&flight));
                    Role::Leader(flight)
                }
            }
        };

        match role {
            Role::Follower(flight) => flight.wait(),
            Role::Leader(flight) => {
                let guard = FlightGuard {
                    cache: self,
                    id,
                    flight,
                    finished: false,
                };
                let outcome = self.fetch(id);
                guard.complete(outcome.clone());
                outcome
            }
        }
    }

    fn fetch(&self, id: IdentityId) -> Option<String> {
        Counters::bump(&self.counters.remote_calls);
        match self.authority.lookup(id) {
            Ok(NameLookup::Found(name)) => {
                debug!(identity = %id, name = %name, "remote authority resolved name");
                Some(name)
            }
            Ok(NameLookup::NotFound) => {
                Counters::bump(&self.counters.not_found);
                debug!(identity = %id, "remote authority does not know identity");
                None
            }
            Err(err @ LookupError::Malformed { .. }) => {
                Counters::bump(&self.counters.failures);
                warn!(identity = %id, error = ?err, "remote authority returned a malformed response");
                None
            }
            Err(err) => {
                Counters::bump(&self.counters.failures);
                warn!(identity = %id, error = %err, "remote name lookup failed");
                None
            }
        }
    }

    /// Publish a flight's outcome: cache it on success, then wake followers.
    fn land(&self, id: IdentityId, flight: &Arc<Flight>, outcome: Option<String>) {
        {
            let mut state = self.lock_state();
            if let Some(name) = &outcome {
                let expires_at = self.clock.now() + self.ttl;
                state.entries.insert(
                    id,
                    CacheEntry {
                        name: name.clone(),
                        expires_at,
                    },
                );
            }
            if state
                .in_flight
                .get(&id)
                .map_or(false, |current| Arc::ptr_eq(current, flight))
            {
                state.in_flight.remove(&id);
            }
        }
        flight.finish(outcome);
    }

    /// Drop the cached name for `id`, if any.
    pub fn invalidate(&self, id: IdentityId) -> bool {
        self.lock_state().entries.remove(&id).is_some()
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock_state();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        before - state.entries.len()
    }

    /// Number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }
}
