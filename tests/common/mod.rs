//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use seendb::{
    CacheConfig, ConnectionOutcome, IdentityId, IdentityRecord, IdentityStore,
    InMemoryConnectionRegistry, InMemoryIdentityStore, LookupError, ManualClock, NameAuthority,
    NameCache, NameLookup, SeenService, StorageError,
};

/// Remote authority backed by a map, with a call counter, optional latency and an outage switch.
#[derive(Default)]
pub struct ScriptedAuthority {
    names: Mutex<HashMap<IdentityId, String>>,
    calls: AtomicU64,
    down: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl ScriptedAuthority {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_name(&self, id: IdentityId, name: &str) {
        self.names.lock().unwrap().insert(id, name.to_string());
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NameAuthority for ScriptedAuthority {
    fn lookup(&self, id: IdentityId) -> Result<NameLookup, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(LookupError::Timeout { duration_ms: 5000 });
        }
        Ok(match self.names.lock().unwrap().get(&id) {
            Some(name) => NameLookup::Found(name.clone()),
            None => NameLookup::NotFound,
        })
    }
}

/// In-memory store that can be switched into an outage.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryIdentityStore,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

impl IdentityStore for FlakyStore {
    fn record_connection(
        &self,
        id: IdentityId,
        observed_name: &str,
        at: DateTime<Utc>,
    ) -> Result<ConnectionOutcome, StorageError> {
        self.check()?;
        self.inner.record_connection(id, observed_name, at)
    }

    fn exists(&self, id: IdentityId) -> Result<bool, StorageError> {
        self.check()?;
        self.inner.exists(id)
    }

    fn get_record(&self, id: IdentityId) -> Result<Option<IdentityRecord>, StorageError> {
        self.check()?;
        self.inner.get_record(id)
    }

    fn get_history(
        &self,
        id: IdentityId,
        excluding: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        self.check()?;
        self.inner.get_history(id, excluding)
    }

    fn find_identities_by_name(&self, name: &str) -> Result<Vec<IdentityId>, StorageError> {
        self.check()?;
        self.inner.find_identities_by_name(name)
    }

    fn most_recent_name_for(&self, id: IdentityId) -> Result<Option<String>, StorageError> {
        self.check()?;
        self.inner.most_recent_name_for(id)
    }

    fn identity_count(&self) -> Result<usize, StorageError> {
        self.check()?;
        self.inner.identity_count()
    }
}

/// Route library logs to the test harness; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A fully wired service over test doubles.
pub struct World {
    pub store: Arc<FlakyStore>,
    pub presence: Arc<InMemoryConnectionRegistry>,
    pub authority: Arc<ScriptedAuthority>,
    pub clock: ManualClock,
    pub service: Arc<SeenService>,
}

impl World {
    pub fn new() -> Self {
        init_tracing();
        let store = FlakyStore::new();
        let presence = Arc::new(InMemoryConnectionRegistry::new());
        let authority = ScriptedAuthority::new();
        let clock = ManualClock::default();
        let cache = Arc::new(NameCache::with_clock(
            authority.clone(),
            Arc::new(clock.clone()),
            &CacheConfig::default(),
        ));
        let service = Arc::new(SeenService::with_clock(
            store.clone(),
            presence.clone(),
            cache,
            Arc::new(clock.clone()),
        ));
        Self {
            store,
            presence,
            authority,
            clock,
            service,
        }
    }

    /// Record a connection at the current clock time, then advance the clock a minute.
    pub fn connect(&self, id: IdentityId, name: &str) {
        self.service.on_connection_observed(id, name);
        self.clock.advance(chrono::Duration::minutes(1));
    }
}
