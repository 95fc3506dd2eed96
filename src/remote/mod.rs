//! Remote name authority.
//!
//! The authority reports the name an identity currently holds. "Not found" is a
//! successful answer and is kept distinct from transport failures so the two can
//! be logged differently, even though the cache treats both as absent.

mod http;

pub use http::{parse_name_response, HttpNameAuthority, RemoteConfig};

use thiserror::Error;

use crate::identity::IdentityId;

/// Answer from the remote authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameLookup {
    /// The identity currently holds this name.
    Found(String),
    /// The authority explicitly does not know the identity.
    NotFound,
}

impl NameLookup {
    /// The found name, if any.
    #[must_use]
    pub fn into_name(self) -> Option<String> {
        match self {
            Self::Found(name) => Some(name),
            Self::NotFound => None,
        }
    }
}

/// Failure to obtain an answer from the remote authority.
#[derive(Debug, Clone, Error)]
pub enum LookupError {
    #[error("transport error: {message}")]
    Transport {
        message: String,
    },

    #[error("request timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("unexpected HTTP status {code}")]
    Status {
        code: u16,
    },

    #[error("malformed response: {message}")]
    Malformed {
        message: String,
    },
}

/// Source of truth for an identity's current name.
pub trait NameAuthority: Send + Sync {
    /// Look up the name `id` currently holds. May block for up to the request timeout.
    fn lookup(&self, id: IdentityId) -> Result<NameLookup, LookupError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_object_safe(_: &dyn NameAuthority) {}

    #[test]
    fn test_into_name() {
        assert_eq!(NameLookup::Found("Eve".to_string()).into_name().as_deref(), Some("Eve"));
        assert_eq!(NameLookup::NotFound.into_name(), None);
    }

    #[test]
    fn test_lookup_error_display() {
        assert!(LookupError::Status { code: 503 }.to_string().contains("503"));
        assert!(LookupError::Timeout { duration_ms: 5000 }.to_string().contains("5000ms"));
    }
}
