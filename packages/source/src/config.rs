//! Record source connection settings.

use std::time::Duration;

use serde::Deserialize;

use crate::SourceError;

/// Base URL used when `RELIEF_SOURCE_URL` is not set.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api";

/// Client-side timeout per request, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// How to reach the hosted record service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL that `/records`, `/records/count` and `/facets/*` hang off.
    pub base_url: String,
    /// Credential sent as a bearer token, if the deployment needs one.
    pub api_key: Option<String>,
    /// Client-side timeout per request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl SourceConfig {
    /// Reads `RELIEF_SOURCE_URL`, `RELIEF_SOURCE_KEY` and
    /// `RELIEF_REQUEST_TIMEOUT_SECS`, falling back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] if the timeout is not a positive
    /// integer.
    pub fn from_env() -> Result<Self, SourceError> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("RELIEF_SOURCE_URL") {
            config.base_url = url;
        }
        config.api_key = std::env::var("RELIEF_SOURCE_KEY")
            .ok()
            .filter(|k| !k.is_empty());
        if let Ok(raw) = std::env::var("RELIEF_REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = raw.parse().map_err(|_| SourceError::Config {
                message: format!("RELIEF_REQUEST_TIMEOUT_SECS must be an integer, got {raw:?}"),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the settings are usable.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] for an empty base URL or a zero
    /// timeout.
    pub fn validate(&self) -> Result<(), SourceError> {
        if self.base_url.trim().is_empty() {
            return Err(SourceError::Config {
                message: "base_url must not be empty".to_owned(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(SourceError::Config {
                message: "request_timeout_secs must be at least 1".to_owned(),
            });
        }
        Ok(())
    }

    /// The client-side request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Joins `path` onto the base URL without doubling slashes.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
