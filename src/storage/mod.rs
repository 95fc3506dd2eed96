//! Identity storage.
//!
//! [`IdentityStore`] is the only component allowed to write identity records
//! and name history. Backends live in submodules.

mod index;
mod memory;
#[cfg(feature = "persistent")]
pub mod persistent;
mod traits;

pub use memory::InMemoryIdentityStore;
pub use traits::{ConnectionOutcome, IdentityStore, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{open_database, PersistentConfig, PersistentIdentityStore};
