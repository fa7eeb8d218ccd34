//! The accumulated record buffer, replaced wholesale.
//!
//! Readers take an [`Arc<Snapshot>`] and keep reading it for as long as
//! they like; a finished run swaps in a new snapshot atomically. Nobody
//! ever observes a half-loaded buffer.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use relief_inventory_models::{FacetScope, FacetSet, InventoryRecord, RecordFilters};

use crate::driver::SyncReport;
use crate::facets::facet_set;
use crate::view::{ViewPage, view_page};

/// One complete, immutable buffer.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    records: Vec<InventoryRecord>,
    filters: RecordFilters,
    generation: u64,
    loaded_at: Option<DateTime<Utc>>,
    summary: Option<String>,
}

impl Snapshot {
    /// The records, in source sort order.
    #[must_use]
    pub fn records(&self) -> &[InventoryRecord] {
        &self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the buffer holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Filters the buffer was loaded with.
    #[must_use]
    pub const fn filters(&self) -> &RecordFilters {
        &self.filters
    }

    /// Increments on every replacement; 0 is the initial empty buffer.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// When the buffer was loaded.
    #[must_use]
    pub const fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    /// Summary of the run that produced the buffer.
    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Filter options for the given selections.
    #[must_use]
    pub fn facets(&self, scope: &FacetScope) -> FacetSet {
        facet_set(&self.records, scope)
    }

    /// One page of the rows matching `filters`.
    #[must_use]
    pub fn view(&self, filters: &RecordFilters, page: usize, rows_per_page: usize) -> ViewPage<'_> {
        view_page(&self.records, filters, page, rows_per_page)
    }
}

/// Holder of the current [`Snapshot`].
#[derive(Debug, Default)]
pub struct InventoryStore {
    current: RwLock<Arc<Snapshot>>,
}

impl InventoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces the buffer with `records`, returning the new snapshot.
    pub fn replace(&self, records: Vec<InventoryRecord>, filters: RecordFilters) -> Arc<Snapshot> {
        self.swap(records, filters, None)
    }

    /// Installs the records of a finished run.
    ///
    /// A run that reached the end of the data replaces the buffer, even if
    /// some pages failed. An aborted run leaves the previous buffer in
    /// place and returns `None`.
    pub fn apply_report(&self, report: SyncReport) -> Option<Arc<Snapshot>> {
        if !report.is_complete() {
            log::warn!("Keeping previous buffer; run did not complete: {}", report.summary());
            return None;
        }
        let summary = report.summary();
        Some(self.swap(report.records, report.filters, Some(summary)))
    }

    fn swap(
        &self,
        records: Vec<InventoryRecord>,
        filters: RecordFilters,
        summary: Option<String>,
    ) -> Arc<Snapshot> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(Snapshot {
            records,
            filters,
            generation: current.generation + 1,
            loaded_at: Some(Utc::now()),
            summary,
        });
        *current = Arc::clone(&next);
        log::debug!(
            "Installed buffer generation {} with {} records",
            next.generation,
            next.len()
        );
        next
    }
}

#[cfg(test)]
mod tests {
    use relief_inventory_source::memory::MemoryRecordSource;

    use super::*;
    use crate::config::SyncConfig;
    use crate::driver::SyncDriver;

    fn record(id: &str, state: &str) -> InventoryRecord {
        InventoryRecord {
            id: id.to_owned(),
            state: state.to_owned(),
            district: "D".to_owned(),
            department_type: "Fire".to_owned(),
            department_name: "Depot".to_owned(),
            item_code: 1,
            item_name: "Lamp".to_owned(),
            quantity: Some(2),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn readers_keep_their_snapshot_across_replacement() {
        let store = InventoryStore::new();
        store.replace(vec![record("a", "A")], RecordFilters::none());
        let old = store.snapshot();

        store.replace(vec![record("b", "B"), record("c", "C")], RecordFilters::none());

        assert_eq!(old.len(), 1);
        assert_eq!(old.generation(), 1);
        let new = store.snapshot();
        assert_eq!(new.len(), 2);
        assert_eq!(new.generation(), 2);
        assert_eq!(
            new.facets(&FacetScope::unscoped()).states,
            vec!["B".to_owned(), "C".to_owned()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_run_keeps_previous_buffer() {
        let store = InventoryStore::new();
        store.replace(vec![record("a", "A")], RecordFilters::none());

        let broken = MemoryRecordSource::new(vec![record("b", "B")])
            .failing_every_page()
            .failing_count_probe();
        let report = SyncDriver::new(SyncConfig::default())
            .run(&broken, &RecordFilters::none())
            .await;

        assert!(store.apply_report(report).is_none());
        assert_eq!(store.snapshot().records()[0].id, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn all_pages_failing_within_the_estimate_keeps_previous_buffer() {
        let store = InventoryStore::new();
        store.replace(vec![record("old", "A")], RecordFilters::none());

        let broken = MemoryRecordSource::new(vec![record("b", "B"), record("c", "C")])
            .failing_every_page();
        let report = SyncDriver::new(SyncConfig::default())
            .run(&broken, &RecordFilters::none())
            .await;

        assert!(!report.is_complete());
        assert!(store.apply_report(report).is_none());
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.records()[0].id, "old");
    }

    #[tokio::test(start_paused = true)]
    async fn completed_run_replaces_buffer() {
        let store = InventoryStore::new();
        let source = MemoryRecordSource::new(vec![record("x", "A"), record("y", "B")]);
        let report = SyncDriver::new(SyncConfig::default())
            .run(&source, &RecordFilters::none())
            .await;

        let snapshot = store.apply_report(report).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.summary(), Some("loaded 2 of ~2 records; 0 pages failed"));
        assert_eq!(snapshot.view(&RecordFilters::none().with_state("B"), 1, 25).rows.len(), 1);
    }
}
