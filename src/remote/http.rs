//! HTTP client for the remote name authority.
//!
//! `GET {base_url}/{32-hex-id}` answers with a JSON object carrying either a
//! `name` (the current name) or a `status` of `"ERR"` (unknown identity).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::identity::IdentityId;

use super::{LookupError, NameAuthority, NameLookup};

/// Remote authority settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Endpoint prefix; the identity hex is appended as the last path segment.
    pub base_url: String,
    /// Connect/read/write timeout in milliseconds.
    pub timeout_ms: u64,
    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.minetools.eu/uuid".to_string(),
            timeout_ms: 5_000,
            user_agent: concat!("seendb/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl RemoteConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// `ConfigError::InvalidField` for an empty or non-HTTP base URL or a zero timeout.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "remote.base_url",
                format!("must be an http(s) URL (got '{}')", self.base_url),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::invalid("remote.timeout_ms", "must be > 0"));
        }
        Ok(self)
    }
}

/// Parse an authority response body.
///
/// # Errors
/// `LookupError::Malformed` if the body is not a JSON object or `name` is not a string.
pub fn parse_name_response(body: &str) -> Result<NameLookup, LookupError> {
    if body.trim().is_empty() {
        return Ok(NameLookup::NotFound);
    }

    let value: Value = serde_json::from_str(body).map_err(|e| LookupError::Malformed {
        message: format!("invalid JSON: {e}"),
    })?;
    let Value::Object(object) = value else {
        return Err(LookupError::Malformed {
            message: "response is not a JSON object".to_string(),
        });
    };

    if object
        .get("status")
        .and_then(Value::as_str)
        .map_or(false, |s| s.eq_ignore_ascii_case("ERR"))
    {
        return Ok(NameLookup::NotFound);
    }

    match object.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => Ok(NameLookup::Found(name.clone())),
        Some(Value::String(_) | Value::Null) | None => Ok(NameLookup::NotFound),
        Some(other) => Err(LookupError::Malformed {
            message: format!("'name' is not a string: {other}"),
        }),
    }
}

/// Blocking HTTP name authority.
#[derive(Debug, Clone)]
pub struct HttpNameAuthority {
    agent: ureq::Agent,
    base_url: String,
    timeout_ms: u64,
}

impl HttpNameAuthority {
    /// Build a client from validated settings.
    ///
    /// # Errors
    /// Propagates [`RemoteConfig::validate`] failures.
    pub fn new(config: RemoteConfig) -> Result<Self, ConfigError> {
        let config = config.validate()?;
        let timeout = Duration::from_millis(config.timeout_ms);
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(&config.user_agent)
            .build();
        Ok(Self {
            agent,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout_ms: config.timeout_ms,
        })
    }

    /// Request URL for an identity.
    #[must_use]
    pub fn url_for(&self, id: IdentityId) -> String {
        format!("{}/{}", self.base_url, id.simple())
    }

    fn transport_error(&self, transport: &ureq::Transport) -> LookupError {
        let detail = transport.to_string();
        let lower = detail.to_ascii_lowercase();
        if lower.contains("timed out") || lower.contains("timeout") {
            LookupError::Timeout {
                duration_ms: self.timeout_ms,
            }
        } else {
            LookupError::Transport { message: detail }
        }
    }
}

impl NameAuthority for HttpNameAuthority {
    fn lookup(&self, id: IdentityId) -> Result<NameLookup, LookupError> {
        let response = match self.agent.get(&self.url_for(id)).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(NameLookup::NotFound),
            Err(ureq::Error::Status(code, _)) => return Err(LookupError::Status { code }),
            Err(ureq::Error::Transport(transport)) => return Err(self.transport_error(&transport)),
        };

        if response.status() == 204 {
            return Ok(NameLookup::NotFound);
        }

        let body = response.into_string().map_err(|e| {
            let lower = e.to_string().to_ascii_lowercase();
            if lower.contains("timed out") {
                LookupError::Timeout {
                    duration_ms: self.timeout_ms,
                }
            } else {
                LookupError::Transport {
                    message: format!("failed to read body: {e}"),
                }
            }
        })?;
        parse_name_response(&body)
    }
}
