#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Paginated relief inventory record source.
//!
//! The [`RecordSource`] trait is the Page Fetcher seam: one call fetches one
//! bounded, filtered, deterministically sorted page. [`http::HttpRecordSource`]
//! talks to the hosted record service; [`memory::MemoryRecordSource`] serves
//! a static dataset with injectable failures for deterministic tests.
//!
//! The source is passed to the sync driver explicitly rather than held as
//! process-wide state.

pub mod config;
pub mod http;
pub mod memory;
pub mod wire;

use std::time::Duration;

use async_trait::async_trait;
use relief_inventory_models::{Facet, FacetScope, Page, RecordFilters};

/// Hard ceiling on rows per request enforced by the hosted record service.
pub const MAX_PAGE_SIZE: u64 = 20_000;

/// Errors that can occur while talking to a record source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The client-side timer expired before the call resolved.
    #[error("request timed out after {after:?}")]
    Timeout {
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The service answered but reported a failure.
    #[error("record source error: {message}")]
    Remote {
        /// Description of what went wrong.
        message: String,
    },

    /// An optional endpoint does not exist on this deployment.
    #[error("endpoint unavailable: {endpoint}")]
    Unavailable {
        /// The endpoint path that was requested.
        endpoint: String,
    },

    /// Source configuration is invalid.
    #[error("configuration error: {message}")]
    Config {
        /// Description of what is wrong.
        message: String,
    },
}

impl SourceError {
    /// Returns `true` if the failure is likely to clear on retry.
    ///
    /// The sync driver retries every page failure regardless; this only
    /// decides how loudly a failure is logged.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_body()
                    || e.status().is_some_and(|s| {
                        s.is_server_error() || s == reqwest::StatusCode::TOO_MANY_REQUESTS
                    })
            }
            Self::Remote { .. } => true,
            Self::Json(_) | Self::Unavailable { .. } | Self::Config { .. } => false,
        }
    }
}

/// A single page fetch that failed.
#[derive(Debug, thiserror::Error)]
#[error("fetch at offset {offset} failed: {cause}")]
pub struct FetchFailed {
    /// Offset of the page that failed.
    pub offset: u64,
    /// What went wrong.
    #[source]
    pub cause: SourceError,
}

impl FetchFailed {
    /// Wraps `cause` with the failing offset.
    #[must_use]
    pub const fn new(offset: u64, cause: SourceError) -> Self {
        Self { offset, cause }
    }
}

/// Parameters of one page fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Zero-based row offset.
    pub offset: u64,
    /// Rows requested, at most [`MAX_PAGE_SIZE`].
    pub limit: u64,
    /// Equality filters. Inactive filters are skipped.
    pub filters: RecordFilters,
}

impl PageRequest {
    /// Builds a request, clamping `limit` to `1..=MAX_PAGE_SIZE`.
    #[must_use]
    pub fn new(offset: u64, limit: u64, filters: RecordFilters) -> Self {
        Self {
            offset,
            limit: limit.clamp(1, MAX_PAGE_SIZE),
            filters,
        }
    }

    /// The inclusive `(first, last)` row range, as range headers and
    /// `range()` query builders express it.
    #[must_use]
    pub const fn range(&self) -> (u64, u64) {
        (self.offset, self.offset + self.limit - 1)
    }
}

/// An offset/limit paginated source of inventory records.
///
/// Implementations sort by `(state, district, department_type)` so repeated
/// runs see identical page boundaries.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Human-readable label for log messages.
    fn label(&self) -> &str;

    /// Fetches one page.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailed`] carrying the request offset if the call fails
    /// or its client-side timeout expires.
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, FetchFailed>;

    /// Counts the rows matching `filters` without fetching them.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the probe fails. Callers treat this as
    /// non-fatal.
    async fn count_records(&self, filters: &RecordFilters) -> Result<u64, SourceError>;

    /// Fetches the distinct values of `facet` within `scope` from a
    /// dedicated endpoint.
    ///
    /// The default implementation reports the endpoint as unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unavailable`] if the source has no facet
    /// endpoint, or any other [`SourceError`] if the call fails.
    async fn facet_values(
        &self,
        facet: Facet,
        _scope: &FacetScope,
    ) -> Result<Vec<String>, SourceError> {
        Err(SourceError::Unavailable {
            endpoint: format!("/facets/{}", facet.endpoint()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_clamps_limit() {
        assert_eq!(PageRequest::new(0, 50_000, RecordFilters::none()).limit, MAX_PAGE_SIZE);
        assert_eq!(PageRequest::new(0, 0, RecordFilters::none()).limit, 1);
    }

    #[test]
    fn page_request_range_is_inclusive() {
        let request = PageRequest::new(40, 20, RecordFilters::none());
        assert_eq!(request.range(), (40, 59));
    }

    #[test]
    fn timeouts_are_transient() {
        let err = SourceError::Timeout {
            after: Duration::from_secs(15),
        };
        assert!(err.is_transient());
        assert!(
            !SourceError::Unavailable {
                endpoint: "/facets/states".to_owned()
            }
            .is_transient()
        );
    }

    #[test]
    fn fetch_failed_mentions_offset() {
        let err = FetchFailed::new(
            40,
            SourceError::Remote {
                message: "boom".to_owned(),
            },
        );
        assert_eq!(err.to_string(), "fetch at offset 40 failed: record source error: boom");
    }
}
