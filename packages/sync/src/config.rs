//! Sync run tuning and the settings file that carries it.
//!
//! Defaults reproduce the reference deployment: 20,000-row pages, three
//! attempts per page with `1s, 2s, 4s...` backoff capped at 8s, abort after
//! three straight page failures with nothing loaded, and a 300,000-row
//! estimate when the count probe fails.

use std::path::Path;
use std::time::Duration;

use relief_inventory_source::config::SourceConfig;
use relief_inventory_source::MAX_PAGE_SIZE;
use serde::Deserialize;

use crate::SyncError;

/// Tuning for one sync run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Rows requested per page.
    pub page_size: u64,
    /// Ceiling the remote source enforces; larger page sizes are clamped.
    pub max_page_size: u64,
    /// Attempts per page before it is recorded as permanently failed.
    pub max_attempts: u32,
    /// Delay before the first retry of a page, in milliseconds.
    pub backoff_base_ms: u64,
    /// Upper bound on any retry delay, in milliseconds.
    pub backoff_cap_ms: u64,
    /// Consecutive permanent page failures, with nothing loaded yet, that
    /// abort the run.
    pub abort_after_failures: u32,
    /// Estimated total used when the count probe fails or is disabled.
    pub fallback_estimate: u64,
    /// Whether to probe the row count before fetching.
    pub probe_total: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 8_000,
            abort_after_failures: 3,
            fallback_estimate: 300_000,
            probe_total: true,
        }
    }
}

impl SyncConfig {
    /// Overlays `RELIEF_PAGE_SIZE`, `RELIEF_MAX_ATTEMPTS`,
    /// `RELIEF_BACKOFF_BASE_MS`, `RELIEF_BACKOFF_CAP_MS` and
    /// `RELIEF_FALLBACK_ESTIMATE` on the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if a variable is not an integer
    /// or the result fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, SyncError> {
        let mut config = Self::default();
        if let Some(v) = env_u64("RELIEF_PAGE_SIZE")? {
            config.page_size = v;
        }
        if let Some(v) = env_u64("RELIEF_MAX_ATTEMPTS")? {
            config.max_attempts = u32::try_from(v).map_err(|_| SyncError::InvalidConfig {
                message: format!("RELIEF_MAX_ATTEMPTS out of range: {v}"),
            })?;
        }
        if let Some(v) = env_u64("RELIEF_BACKOFF_BASE_MS")? {
            config.backoff_base_ms = v;
        }
        if let Some(v) = env_u64("RELIEF_BACKOFF_CAP_MS")? {
            config.backoff_cap_ms = v;
        }
        if let Some(v) = env_u64("RELIEF_FALLBACK_ESTIMATE")? {
            config.fallback_estimate = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings can drive a run.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] for a zero page size, zero
    /// attempts, a zero abort threshold, or a backoff cap below the base.
    pub fn validate(&self) -> Result<(), SyncError> {
        let invalid = |message: &str| {
            Err(SyncError::InvalidConfig {
                message: message.to_owned(),
            })
        };
        if self.page_size == 0 || self.max_page_size == 0 {
            return invalid("page_size and max_page_size must be at least 1");
        }
        if self.max_attempts == 0 {
            return invalid("max_attempts must be at least 1");
        }
        if self.abort_after_failures == 0 {
            return invalid("abort_after_failures must be at least 1");
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return invalid("backoff_cap_ms must not be below backoff_base_ms");
        }
        if self.page_size > self.max_page_size {
            log::warn!(
                "page_size {} exceeds the source ceiling; clamping to {}",
                self.page_size,
                self.max_page_size
            );
        }
        Ok(())
    }

    /// Rows actually requested per page.
    #[must_use]
    pub fn effective_page_size(&self) -> u64 {
        self.page_size.min(self.max_page_size).max(1)
    }

    /// Delay before retrying a page that has failed `failed_attempts` times:
    /// `min(cap, base * 2^(failed_attempts - 1))`.
    #[must_use]
    pub fn backoff_delay(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let millis = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_cap_ms);
        Duration::from_millis(millis)
    }
}

fn env_u64(name: &str) -> Result<Option<u64>, SyncError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SyncError::InvalidConfig {
                message: format!("{name} must be a non-negative integer, got {raw:?}"),
            }),
        Err(_) => Ok(None),
    }
}

/// Contents of a settings file: a `[source]` and a `[sync]` table.
///
/// ```toml
/// [source]
/// base_url = "https://relief.example/api"
/// request_timeout_secs = 15
///
/// [sync]
/// page_size = 10000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Record source connection.
    pub source: SourceConfig,
    /// Run tuning.
    pub sync: SyncConfig,
}

impl Settings {
    /// Parses settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Toml`] if the text is malformed, or
    /// [`SyncError::InvalidConfig`] if the values are unusable.
    pub fn from_toml(text: &str) -> Result<Self, SyncError> {
        let settings: Self = toml::from_str(text)?;
        settings
            .source
            .validate()
            .map_err(|e| SyncError::InvalidConfig {
                message: e.to_string(),
            })?;
        settings.sync.validate()?;
        Ok(settings)
    }

    /// Reads settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml`](Self::from_toml).
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Builds settings from environment variables alone.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if any variable is unusable.
    pub fn from_env() -> Result<Self, SyncError> {
        let source = SourceConfig::from_env().map_err(|e| SyncError::InvalidConfig {
            message: e.to_string(),
        })?;
        Ok(Self {
            source,
            sync: SyncConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base_up_to_cap() {
        let config = SyncConfig::default();
        let delays: Vec<u64> = (1..=6)
            .map(|n| u64::try_from(config.backoff_delay(n).as_millis()).unwrap())
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 8_000, 8_000]);
    }

    #[test]
    fn backoff_saturates_on_huge_attempt_counts() {
        let config = SyncConfig::default();
        assert_eq!(config.backoff_delay(200), Duration::from_secs(8));
    }

    #[test]
    fn oversized_page_size_is_clamped() {
        let config = SyncConfig {
            page_size: 50_000,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_page_size(), 20_000);
    }

    #[test]
    fn rejects_zero_attempts_and_inverted_backoff() {
        let zero = SyncConfig {
            max_attempts: 0,
            ..SyncConfig::default()
        };
        assert!(zero.validate().is_err());

        let inverted = SyncConfig {
            backoff_base_ms: 5_000,
            backoff_cap_ms: 1_000,
            ..SyncConfig::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn settings_file_fills_missing_fields_with_defaults() {
        let settings = Settings::from_toml(
            r#"
            [source]
            base_url = "https://relief.example/api"

            [sync]
            page_size = 5000
            "#,
        )
        .unwrap();
        assert_eq!(settings.source.base_url, "https://relief.example/api");
        assert_eq!(settings.source.request_timeout_secs, 15);
        assert_eq!(settings.sync.page_size, 5_000);
        assert_eq!(settings.sync.max_attempts, 3);
        assert_eq!(settings.sync.fallback_estimate, 300_000);
    }

    #[test]
    fn settings_file_rejects_bad_values() {
        assert!(Settings::from_toml("[sync]\npage_size = 0\n").is_err());
        assert!(Settings::from_toml("[sync\n").is_err());
    }
}
