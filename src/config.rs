//! Top-level configuration.
//!
//! A [`SeenConfig`] groups the settings of every component and knows how to
//! assemble them into a running [`SeenService`]. Every section has defaults,
//! so an empty JSON object is a valid (in-memory) configuration.
//!
//! ```json
//! {
//!   "store": { "backend": "persistent", "path": "./seen.db" },
//!   "cache": { "ttl_secs": 600 },
//!   "remote": { "base_url": "https://api.minetools.eu/uuid", "timeout_ms": 5000 },
//!   "runtime": { "query_workers": 4 }
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::{CacheConfig, NameCache};
use crate::error::{ConfigError, SeenResult};
use crate::presence::ConnectionRegistry;
use crate::remote::{HttpNameAuthority, NameAuthority, RemoteConfig};
use crate::runtime::{RuntimeConfig, SeenRuntime};
use crate::service::SeenService;
use crate::storage::{IdentityStore, InMemoryIdentityStore};

#[cfg(feature = "persistent")]
use crate::storage::persistent::{open_database, PersistentLocation};

/// Storage backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Volatile in-process store.
    #[default]
    Memory,
    /// Write-ahead-logged store in a directory.
    #[cfg(feature = "persistent")]
    Persistent(PersistentLocation),
}

impl StoreConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// `ConfigError::InvalidField` for an empty path or invalid storage settings.
    pub fn validate(self) -> Result<Self, ConfigError> {
        match self {
            Self::Memory => Ok(Self::Memory),
            #[cfg(feature = "persistent")]
            Self::Persistent(location) => {
                if location.path.as_os_str().is_empty() {
                    return Err(ConfigError::invalid("store.path", "must not be empty"));
                }
                let settings = location.settings.validate()?;
                Ok(Self::Persistent(PersistentLocation {
                    path: location.path,
                    settings,
                }))
            }
        }
    }

    /// Open the configured store.
    ///
    /// # Errors
    /// Storage errors from opening a persistent database.
    pub fn open(&self) -> SeenResult<Arc<dyn IdentityStore>> {
        match self {
            Self::Memory => Ok(Arc::new(InMemoryIdentityStore::new())),
            #[cfg(feature = "persistent")]
            Self::Persistent(location) => {
                let store = open_database(&location.path, Some(location.settings.clone()))?;
                Ok(Arc::new(store))
            }
        }
    }
}

/// Configuration for the whole system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeenConfig {
    /// Identity store.
    pub store: StoreConfig,
    /// Name cache.
    pub cache: CacheConfig,
    /// Remote name authority.
    pub remote: RemoteConfig,
    /// Worker pools.
    pub runtime: RuntimeConfig,
}

impl SeenConfig {
    /// Parse and validate a JSON configuration.
    ///
    /// # Errors
    /// `ConfigError::Parse` for invalid JSON, or any section's validation error.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()
    }

    /// Read, parse and validate a JSON configuration file.
    ///
    /// # Errors
    /// `ConfigError::Read` if the file cannot be read, otherwise as [`Self::from_json_str`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&json)
    }

    /// Validate every section.
    ///
    /// # Errors
    /// The first invalid field found.
    pub fn validate(self) -> Result<Self, ConfigError> {
        Ok(Self {
            store: self.store.validate()?,
            cache: self.cache.validate()?,
            remote: self.remote.validate()?,
            runtime: self.runtime.validate()?,
        })
    }

    /// Assemble a service using the HTTP name authority.
    ///
    /// # Errors
    /// Configuration or storage errors.
    pub fn build_service(&self, presence: Arc<dyn ConnectionRegistry>) -> SeenResult<SeenService> {
        let authority = HttpNameAuthority::new(self.remote.clone())?;
        self.build_service_with(presence, Arc::new(authority))
    }

    /// Assemble a service around a caller-provided name authority.
    ///
    /// # Errors
    /// Configuration or storage errors.
    pub fn build_service_with(
        &self,
        presence: Arc<dyn ConnectionRegistry>,
        authority: Arc<dyn NameAuthority>,
    ) -> SeenResult<SeenService> {
        let cache = self.cache.clone().validate()?;
        let store = self.store.open()?;
        info!(
            store = ?self.store,
            ttl_secs = cache.ttl_secs,
            "seen service assembled"
        );
        let cache = Arc::new(NameCache::new(authority, &cache));
        Ok(SeenService::new(store, presence, cache))
    }

    /// Assemble a service and start its worker pools.
    ///
    /// # Errors
    /// Configuration, storage or thread spawn errors.
    pub fn start_runtime(&self, presence: Arc<dyn ConnectionRegistry>) -> SeenResult<SeenRuntime> {
        let service = Arc::new(self.build_service(presence)?);
        let runtime = self.runtime.clone().validate()?;
        Ok(SeenRuntime::start(service, &runtime)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::presence::NoConnections;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = SeenConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SeenConfig::default());
        assert_eq!(config.cache.ttl_secs, 600);
        assert_eq!(config.remote.timeout_ms, 5000);
        assert_eq!(config.store, StoreConfig::Memory);
    }

    #[test]
    fn test_partial_sections() {
        let config = SeenConfig::from_json_str(
            r#"{"cache": {"ttl_secs": 30}, "runtime": {"query_workers": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.cache.ttl_secs, 30);
        assert_eq!(config.runtime.query_workers, 2);
        assert_eq!(config.runtime.queue_capacity, RuntimeConfig::default().queue_capacity);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = SeenConfig::from_json_str(r#"{"cache": {"ttl_secs": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { field: "cache.ttl_secs", .. }));

        let err = SeenConfig::from_json_str(r#"{"remote": {"timeout_ms": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { field: "remote.timeout_ms", .. }));

        let err = SeenConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = SeenConfig::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[cfg(feature = "persistent")]
    #[test]
    fn test_persistent_store_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("seen.db");
        let json = format!(
            r#"{{"store": {{"backend": "persistent", "path": {:?}, "settings": {{"sync_on_write": false}}}}}}"#,
            db.display().to_string()
        );
        let file = dir.path().join("seen.json");
        std::fs::write(&file, json).unwrap();

        let config = SeenConfig::from_json_file(&file).unwrap();
        let StoreConfig::Persistent(location) = &config.store else {
            panic!("expected persistent store, got {:?}", config.store);
        };
        assert_eq!(location.path, db);
        assert!(!location.settings.sync_on_write);

        let service = config.build_service(Arc::new(NoConnections)).unwrap();
        service.on_connection_observed(crate::identity::IdentityId::new(), "Alice");
        assert_eq!(service.store().identity_count().unwrap(), 1);
    }

    #[cfg(feature = "persistent")]
    #[test]
    fn test_persistent_store_requires_path() {
        let err = SeenConfig::from_json_str(r#"{"store": {"backend": "persistent", "path": ""}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { field: "store.path", .. }));
    }
}
