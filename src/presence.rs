//! Currently-connected identities.
//!
//! The connection layer itself lives outside this crate; it is consumed through
//! [`ConnectionRegistry`]. [`InMemoryConnectionRegistry`] is a plain
//! implementation for embedding and tests.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::identity::{names_match, IdentityId};

/// An identity that is connected right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedIdentity {
    /// Who is connected.
    pub id: IdentityId,
    /// The name they connected with.
    pub name: String,
    /// Hidden identities are connected but must be reported as offline.
    pub hidden: bool,
}

/// Read-only view of the connection layer.
pub trait ConnectionRegistry: Send + Sync {
    /// The connected identity whose current name matches `name` (case-insensitive).
    fn connected_by_name(&self, name: &str) -> Option<ConnectedIdentity>;

    /// The connection for `id`, if connected.
    fn connected_by_id(&self, id: IdentityId) -> Option<ConnectedIdentity>;

    /// Returns true if `id` is connected, hidden or not.
    fn is_connected(&self, id: IdentityId) -> bool {
        self.connected_by_id(id).is_some()
    }

    /// Returns true if `id` is connected but hidden.
    fn is_hidden(&self, id: IdentityId) -> bool {
        self.connected_by_id(id).map_or(false, |c| c.hidden)
    }
}

/// A registry with nobody connected.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConnections;

impl ConnectionRegistry for NoConnections {
    fn connected_by_name(&self, _name: &str) -> Option<ConnectedIdentity> {
        None
    }

    fn connected_by_id(&self, _id: IdentityId) -> Option<ConnectedIdentity> {
        None
    }
}

/// In-memory connection registry.
#[derive(Debug, Default)]
pub struct InMemoryConnectionRegistry {
    connected: RwLock<HashMap<IdentityId, ConnectedIdentity>>,
}

impl InMemoryConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as connected under `name`. Replaces any existing connection.
    pub fn connect(&self, id: IdentityId, name: impl Into<String>) {
        let entry = ConnectedIdentity {
            id,
            name: name.into(),
            hidden: false,
        };
        self.connected
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entry);
    }

    /// Mark `id` as disconnected. Returns true if it was connected.
    pub fn disconnect(&self, id: IdentityId) -> bool {
        self.connected
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Hide or reveal a connected identity. Returns false if `id` is not connected.
    pub fn set_hidden(&self, id: IdentityId, hidden: bool) -> bool {
        let mut connected = self.connected.write().unwrap_or_else(PoisonError::into_inner);
        match connected.get_mut(&id) {
            Some(entry) => {
                entry.hidden = hidden;
                true
            }
            None => false,
        }
    }

    /// Number of connected identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connected.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if nobody is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConnectionRegistry for InMemoryConnectionRegistry {
    fn connected_by_name(&self, name: &str) -> Option<ConnectedIdentity> {
        self.connected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|c| names_match(&c.name, name))
            .cloned()
    }

    fn connected_by_id(&self, id: IdentityId) -> Option<ConnectedIdentity> {
        self.connected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}
