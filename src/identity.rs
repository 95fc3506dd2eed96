//! Identity types and name normalization.
//!
//! An identity is a stable anchor that outlives every name it has used.
//! Names are case-preserving when stored and case-insensitive when matched.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique, stable identity identifier.
///
/// Once observed, an `IdentityId` never changes and is never reused for a
/// different real-world identity.
///
/// # Examples
///
/// ```
/// use seendb::IdentityId;
///
/// let id = IdentityId::new();
/// assert!(!id.is_nil());
/// assert_eq!(id.simple().len(), 32);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(Uuid);

impl IdentityId {
    /// Creates a new random identity ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an identity ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true if this is a nil (all zeros) UUID.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Creates a nil identity ID (for testing or sentinel values).
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Lowercase hex form without separators, as used by the remote name authority.
    #[must_use]
    pub fn simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for IdentityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IdentityId {
    type Err = uuid::Error;

    /// Accepts both the hyphenated and the 32-character hex form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for IdentityId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<IdentityId> for Uuid {
    fn from(id: IdentityId) -> Self {
        id.0
    }
}

/// Normalized lookup key for a name.
#[must_use]
pub fn name_key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Case-insensitive name comparison.
#[must_use]
pub fn names_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// One row per identity ever observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// The identity this record describes.
    pub identity_id: IdentityId,

    /// First observed connection. Set once, never overwritten.
    pub first_seen: DateTime<Utc>,

    /// Most recent observed connection.
    pub last_seen: DateTime<Utc>,
}

impl IdentityRecord {
    /// Creates a record for an identity first seen at `at`.
    #[must_use]
    pub const fn first_seen_at(identity_id: IdentityId, at: DateTime<Utc>) -> Self {
        Self {
            identity_id,
            first_seen: at,
            last_seen: at,
        }
    }

    /// Advances `last_seen` to `at`. Never moves it backwards.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_seen {
            self.last_seen = at;
        }
    }
}

/// One row per distinct (identity, name) pair. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    /// Owner of the name at the time it was observed.
    pub identity_id: IdentityId,

    /// The name as observed (case preserved).
    pub name: String,

    /// Store-wide insertion order; higher is more recent.
    pub sequence: u64,
}
