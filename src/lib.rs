//! # SeenDB - "last seen" tracking with name disambiguation
//!
//! SeenDB records when identities connect and which names they used, and
//! answers "who is, or was, this name?" even after names have changed hands.
//!
//! ## Core Concepts
//!
//! - **Identity**: a stable id, distinct from any name it has used
//! - **Name history**: every distinct name an identity connected with, oldest first
//! - **Name cache**: a TTL cache over a remote authority for current names, with
//!   concurrent lookups for one identity collapsed into a single request
//! - **Disambiguation**: picking the one identity that holds a name *now* among
//!   several that held it in the past
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use seendb::{InMemoryConnectionRegistry, Query, SeenConfig};
//!
//! let presence = Arc::new(InMemoryConnectionRegistry::new());
//! let service = SeenConfig::default().build_service(presence.clone())?;
//!
//! service.on_connection_observed(id, "Alice");
//! let result = service.query(&Query::name("alice"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod identity;
pub mod time;

// Storage and remote lookups
pub mod cache;
pub mod remote;
pub mod storage;

// Resolution and orchestration
pub mod config;
pub mod presence;
pub mod resolver;
pub mod runtime;
pub mod service;

// Re-export primary types at crate root for convenience
pub use cache::{CacheConfig, CacheStats, NameCache};
pub use config::{SeenConfig, StoreConfig};
pub use error::{ConfigError, RuntimeError, SeenError, SeenResult};
pub use identity::{IdentityId, IdentityRecord, NameRecord};
pub use presence::{ConnectedIdentity, ConnectionRegistry, InMemoryConnectionRegistry, NoConnections};
pub use remote::{HttpNameAuthority, LookupError, NameAuthority, NameLookup, RemoteConfig};
pub use resolver::{Disambiguator, Resolution, ResolvedVia};
pub use runtime::{QueryHandle, RuntimeConfig, SeenRuntime};
pub use service::{AliasNotice, Query, QueryResult, QueryStatus, SeenService};
pub use storage::{ConnectionOutcome, IdentityStore, InMemoryIdentityStore, StorageError};
pub use time::{Clock, ManualClock, SystemClock};

#[cfg(feature = "persistent")]
pub use storage::{open_database, PersistentConfig, PersistentIdentityStore};
