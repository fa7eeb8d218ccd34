//! In-memory [`RecordSource`] over a static dataset.
//!
//! Behaves like the hosted service (sorting, filtering, range slicing,
//! first-page metadata) and lets callers inject failures per offset, break
//! the count probe, slow every call down, or expose a facet endpoint.
//! Every page request is logged so tests can assert which offsets were
//! fetched and in what order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use relief_inventory_models::{Facet, FacetScope, FacetSet, InventoryRecord, Page, RecordFilters};

use crate::http::with_timeout;
use crate::{FetchFailed, PageRequest, RecordSource, SourceError};

/// A scripted, static record source.
#[derive(Debug)]
pub struct MemoryRecordSource {
    records: Vec<InventoryRecord>,
    /// Offset -> number of upcoming fetches at that offset that fail.
    failures: Mutex<BTreeMap<u64, u32>>,
    fail_every_page: bool,
    fail_count_probe: bool,
    reported_total: Option<u64>,
    facet_endpoint: bool,
    latency: Option<Duration>,
    timeout: Option<Duration>,
    requests: Mutex<Vec<u64>>,
}

impl MemoryRecordSource {
    /// Creates a source serving `records` sorted by state, district, then
    /// department type.
    #[must_use]
    pub fn new(mut records: Vec<InventoryRecord>) -> Self {
        records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Self {
            records,
            failures: Mutex::new(BTreeMap::new()),
            fail_every_page: false,
            fail_count_probe: false,
            reported_total: None,
            facet_endpoint: false,
            latency: None,
            timeout: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Makes the next `times` fetches at `offset` fail.
    #[must_use]
    pub fn failing_at(self, offset: u64, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(offset, times);
        self
    }

    /// Makes every page fetch fail.
    #[must_use]
    pub const fn failing_every_page(mut self) -> Self {
        self.fail_every_page = true;
        self
    }

    /// Makes the count probe fail.
    #[must_use]
    pub const fn failing_count_probe(mut self) -> Self {
        self.fail_count_probe = true;
        self
    }

    /// Reports `total` from the count probe and the first-page hint instead
    /// of the real row count.
    #[must_use]
    pub const fn reporting_total(mut self, total: u64) -> Self {
        self.reported_total = Some(total);
        self
    }

    /// Serves `/facets/*` computed from the dataset instead of reporting the
    /// endpoint as unavailable.
    #[must_use]
    pub const fn with_facet_endpoint(mut self) -> Self {
        self.facet_endpoint = true;
        self
    }

    /// Delays every call by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Races every call against a client-side timer of `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Offsets of every page request received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<u64> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of records in the dataset.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the dataset is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn matching<'a>(
        &'a self,
        filters: &'a RecordFilters,
    ) -> impl Iterator<Item = &'a InventoryRecord> + 'a {
        self.records.iter().filter(move |r| filters.matches(r))
    }

    /// Consumes one scripted failure at `offset`, if any remain.
    fn take_failure(&self, offset: u64) -> bool {
        if self.fail_every_page {
            return true;
        }
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        match failures.get_mut(&offset) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn serve_page(&self, request: &PageRequest) -> Result<Page, SourceError> {
        self.delay().await;

        if self.take_failure(request.offset) {
            return Err(SourceError::Remote {
                message: format!("injected failure at offset {}", request.offset),
            });
        }

        let skip = usize::try_from(request.offset).unwrap_or(usize::MAX);
        let take = usize::try_from(request.limit).unwrap_or(usize::MAX);
        let records: Vec<InventoryRecord> = self
            .matching(&request.filters)
            .skip(skip)
            .take(take)
            .cloned()
            .collect();
        let has_more = records.len() == take;

        let mut page = Page::new(records, request.limit, has_more);
        if request.offset == 0 {
            let total = self
                .reported_total
                .unwrap_or_else(|| self.matching(&request.filters).count() as u64);
            let facets = FacetSet {
                states: distinct(&page.records, Facet::State),
                districts: distinct(&page.records, Facet::District),
                department_types: distinct(&page.records, Facet::DepartmentType),
            };
            page = page
                .with_total_hint(Some(total))
                .with_facet_hint(Some(facets));
        }
        Ok(page)
    }
}

fn distinct<'a>(
    records: impl IntoIterator<Item = &'a InventoryRecord>,
    facet: Facet,
) -> Vec<String> {
    records
        .into_iter()
        .map(|r| r.facet_value(facet))
        .filter(|v| !v.trim().is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_owned)
        .collect()
}

#[async_trait]
impl RecordSource for MemoryRecordSource {
    fn label(&self) -> &str {
        "memory"
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, FetchFailed> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.offset);

        let result = match self.timeout {
            Some(after) => with_timeout(after, self.serve_page(request)).await,
            None => self.serve_page(request).await,
        };
        result.map_err(|e| FetchFailed::new(request.offset, e))
    }

    async fn count_records(&self, filters: &RecordFilters) -> Result<u64, SourceError> {
        self.delay().await;
        if self.fail_count_probe {
            return Err(SourceError::Remote {
                message: "injected count probe failure".to_owned(),
            });
        }
        Ok(self
            .reported_total
            .unwrap_or_else(|| self.matching(filters).count() as u64))
    }

    async fn facet_values(
        &self,
        facet: Facet,
        scope: &FacetScope,
    ) -> Result<Vec<String>, SourceError> {
        if !self.facet_endpoint {
            return Err(SourceError::Unavailable {
                endpoint: format!("/facets/{}", facet.endpoint()),
            });
        }
        let scope = scope.for_facet(facet);
        Ok(distinct(
            self.records.iter().filter(|r| scope.contains(r)),
            facet,
        ))
    }
}
