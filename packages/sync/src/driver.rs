//! Resilient Page Driver.
//!
//! Executes the effects of a [`RunState`] against a [`RecordSource`]: one
//! page in flight at a time, offsets strictly increasing, retries in place
//! before advancing. Page errors never escape a run; they become
//! [`FailedPage`] entries in the [`SyncReport`].

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use relief_inventory_models::{FacetSet, InventoryRecord, Page, RecordFilters};
use relief_inventory_source::{PageRequest, RecordSource, SourceError};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::SyncError;
use crate::config::SyncConfig;
use crate::machine::{AbortReason, Effect, Event, FailedPage, RunState};
use crate::progress::{EventSender, RunStatus, SyncEvent, SyncProgress, summary_line};

/// Outcome of a sync run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Accumulated records, in source sort order, unique by id.
    pub records: Vec<InventoryRecord>,
    /// Final progress.
    pub progress: SyncProgress,
    /// Pages that exhausted their attempts, in offset order.
    pub failed_pages: Vec<FailedPage>,
    /// Pages that returned data.
    pub pages_succeeded: u64,
    /// Rows dropped because their id was already accumulated.
    pub duplicates: u64,
    /// Accumulated rows failing [`InventoryRecord::validation_errors`].
    pub invalid_records: u64,
    /// Why the run stopped early, if it did.
    pub abort_reason: Option<AbortReason>,
    /// Filter options the source sent with the first page.
    pub facet_hint: Option<FacetSet>,
    /// Filters the run was made with.
    pub filters: RecordFilters,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended.
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    /// Returns `true` if the run reached the end of the data. Pages may
    /// still have failed; see [`failed_pages`](Self::failed_pages).
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.progress.status == RunStatus::Complete
    }

    /// Offsets of the permanently failed pages.
    #[must_use]
    pub fn failed_offsets(&self) -> Vec<u64> {
        self.failed_pages.iter().map(|p| p.offset).collect()
    }

    /// `loaded N of ~M records; K pages failed`.
    #[must_use]
    pub fn summary(&self) -> String {
        summary_line(
            self.records.len() as u64,
            self.progress.estimated_total,
            self.failed_pages.len(),
        )
    }

    /// Converts an aborted run into [`SyncError::RunAborted`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::RunAborted`] if the run did not complete.
    pub fn ensure_complete(self) -> Result<Self, SyncError> {
        match self.abort_reason {
            Some(reason) => Err(SyncError::RunAborted {
                reason,
                accumulated: self.records.len() as u64,
                failed_pages: self.failed_pages.len(),
            }),
            None => Ok(self),
        }
    }
}

/// Pulls whole datasets from a [`RecordSource`].
#[derive(Debug, Clone, Default)]
pub struct SyncDriver {
    config: SyncConfig,
    events: Option<EventSender>,
    cancel: Option<watch::Receiver<bool>>,
}

impl SyncDriver {
    /// Creates a driver with the given tuning.
    #[must_use]
    pub const fn new(config: SyncConfig) -> Self {
        Self {
            config,
            events: None,
            cancel: None,
        }
    }

    /// Publishes [`SyncEvent`]s on `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Stops runs once `cancel` holds `true`. The flag is checked before
    /// every page and during backoff sleeps; a page already in flight is
    /// allowed to resolve or time out.
    #[must_use]
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Runs a full sync of the rows matching `filters`.
    pub async fn run(&self, source: &dyn RecordSource, filters: &RecordFilters) -> SyncReport {
        let started_at = Utc::now();
        let mut cancel = self.cancel.clone();
        let mut buffer = Buffer::default();
        let mut facet_hint = None;

        log::info!("Starting sync from {}", source.label());

        let total = if is_cancelled(cancel.as_ref()) {
            None
        } else {
            self.probe_total(source, filters).await
        };

        let first = if is_cancelled(cancel.as_ref()) {
            Event::Cancelled
        } else {
            Event::Sized { total }
        };
        let mut queue = VecDeque::new();
        let mut state = step(RunState::new(&self.config), &mut queue, first);

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Emit(event) => self.emit(event),
                Effect::Sleep(delay) => {
                    if sleep_or_cancel(delay, cancel.as_mut()).await {
                        queue.clear();
                        state = step(state, &mut queue, Event::Cancelled);
                    }
                }
                Effect::Fetch { offset, limit } => {
                    if is_cancelled(cancel.as_ref()) {
                        state = step(state, &mut queue, Event::Cancelled);
                        continue;
                    }
                    let request = PageRequest::new(offset, limit, filters.clone());
                    let event = match source.fetch_page(&request).await {
                        Ok(page) => {
                            if facet_hint.is_none() {
                                facet_hint.clone_from(&page.facet_hint);
                            }
                            let total_hint = page.total_hint;
                            let fetched = page.len() as u64;
                            let appended = buffer.append(page);
                            if fetched < limit {
                                log::info!(
                                    "Page at offset {offset} returned {fetched} of {limit} rows; end of data"
                                );
                            } else {
                                log::debug!("Page at offset {offset} returned {fetched} rows");
                            }
                            Event::PageLoaded {
                                fetched,
                                appended,
                                total_hint,
                            }
                        }
                        Err(e) => {
                            log::log!(failure_level(&e.cause), "{e}");
                            Event::PageFailed {
                                reason: e.cause.to_string(),
                            }
                        }
                    };
                    state = step(state, &mut queue, event);
                }
            }
        }

        let progress = state.progress();
        let abort_reason = state.abort_reason();
        let pages_succeeded = state.pages_succeeded();
        let report = SyncReport {
            invalid_records: buffer.invalid,
            duplicates: buffer.duplicates,
            records: buffer.records,
            progress,
            failed_pages: state.into_failed_pages(),
            pages_succeeded,
            abort_reason,
            facet_hint,
            filters: filters.clone(),
            started_at,
            finished_at: Utc::now(),
        };

        match report.abort_reason {
            Some(reason) => log::error!("Sync aborted ({reason}): {}", report.summary()),
            None => log::info!("Sync finished: {}", report.summary()),
        }
        if report.duplicates > 0 {
            log::warn!("Dropped {} rows with already-seen ids", report.duplicates);
        }
        if report.invalid_records > 0 {
            log::warn!("{} accumulated rows fail validation", report.invalid_records);
        }

        report
    }

    /// Retries the failed pages of `report`, merging recovered rows in.
    ///
    /// Each page gets a fresh set of attempts. Pages that fail again stay in
    /// [`SyncReport::failed_pages`]; the run status is unchanged.
    pub async fn retry_pages(
        &self,
        source: &dyn RecordSource,
        mut report: SyncReport,
    ) -> SyncReport {
        let pending = std::mem::take(&mut report.failed_pages);
        if pending.is_empty() {
            return report;
        }
        log::info!("Retrying {} failed pages", pending.len());

        let mut cancel = self.cancel.clone();
        let mut buffer = Buffer::from_records(std::mem::take(&mut report.records));

        for failed in pending {
            if is_cancelled(cancel.as_ref()) {
                report.failed_pages.push(failed);
                continue;
            }
            let request = PageRequest::new(failed.offset, failed.limit, report.filters.clone());
            match self
                .fetch_with_retry(source, &request, cancel.as_mut())
                .await
            {
                Ok(page) => {
                    report.pages_succeeded += 1;
                    let appended = buffer.append(page);
                    log::info!("Recovered {appended} rows at offset {}", failed.offset);
                }
                Err((attempts, reason)) => {
                    log::error!("Page at offset {} failed again: {reason}", failed.offset);
                    report.failed_pages.push(FailedPage {
                        attempts,
                        reason,
                        ..failed
                    });
                }
            }
        }

        buffer
            .records
            .sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        report.duplicates += buffer.duplicates;
        report.invalid_records = buffer.records.iter().filter(|r| !r.is_valid()).count() as u64;

        let advanced = report
            .progress
            .advance(buffer.records.len() as u64, report.progress.estimated_total);
        report.progress = match report.progress.status {
            RunStatus::Complete => advanced.complete(),
            RunStatus::Aborted => advanced.abort(),
            RunStatus::InProgress => advanced,
        };
        report.records = buffer.records;
        report.finished_at = Utc::now();

        self.emit(SyncEvent::Finished {
            progress: report.progress,
            failed_pages: report.failed_pages.len(),
        });
        report
    }

    async fn probe_total(&self, source: &dyn RecordSource, filters: &RecordFilters) -> Option<u64> {
        if !self.config.probe_total {
            log::info!(
                "Count probe disabled; estimating {} rows",
                self.config.fallback_estimate
            );
            return None;
        }
        match source.count_records(filters).await {
            Ok(count) => {
                log::info!("Count probe reports {count} rows");
                Some(count)
            }
            Err(e) => {
                log::warn!(
                    "Count probe failed ({e}); estimating {} rows",
                    self.config.fallback_estimate
                );
                None
            }
        }
    }

    /// Fetches one page with the run's attempt budget and backoff, outside
    /// of a run. Returns the attempts made and the last failure on error.
    async fn fetch_with_retry(
        &self,
        source: &dyn RecordSource,
        request: &PageRequest,
        mut cancel: Option<&mut watch::Receiver<bool>>,
    ) -> Result<Page, (u32, String)> {
        let mut attempt = 1;
        loop {
            match source.fetch_page(request).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    log::log!(failure_level(&e.cause), "{e}");
                    let reason = e.cause.to_string();
                    if attempt >= self.config.max_attempts {
                        return Err((attempt, reason));
                    }
                    let delay = self.config.backoff_delay(attempt);
                    self.emit(SyncEvent::Retrying {
                        offset: request.offset,
                        attempt,
                        delay,
                        reason: reason.clone(),
                    });
                    if sleep_or_cancel(delay, cancel.as_deref_mut()).await {
                        return Err((attempt, reason));
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn emit(&self, event: SyncEvent) {
        match &event {
            SyncEvent::Started {
                estimated_total,
                page_size,
                expected_pages,
                probed,
            } => log::info!(
                "Sizing: ~{estimated_total} rows ({}), {expected_pages} pages of {page_size}",
                if *probed { "counted" } else { "estimated" }
            ),
            SyncEvent::Retrying {
                offset,
                attempt,
                delay,
                reason,
            } => log::warn!(
                "Attempt {attempt} at offset {offset} failed ({reason}); retrying in {delay:?}"
            ),
            SyncEvent::PageFailed {
                offset,
                attempts,
                reason,
                ..
            } => log::error!(
                "Giving up on page at offset {offset} after {attempts} attempts: {reason}"
            ),
            SyncEvent::PageLoaded { .. } | SyncEvent::Finished { .. } => {}
        }

        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is watching.
            let _ = events.send(event);
        }
    }
}

/// Accumulated rows of one run, unique by id.
#[derive(Debug, Default)]
struct Buffer {
    records: Vec<InventoryRecord>,
    seen: HashSet<String>,
    duplicates: u64,
    invalid: u64,
}

impl Buffer {
    fn from_records(records: Vec<InventoryRecord>) -> Self {
        let seen = records.iter().map(|r| r.id.clone()).collect();
        Self {
            records,
            seen,
            duplicates: 0,
            invalid: 0,
        }
    }

    /// Appends the rows of `page` whose id is new, returning how many were
    /// appended.
    fn append(&mut self, page: Page) -> u64 {
        let mut appended = 0;
        for record in page.records {
            if !self.seen.insert(record.id.clone()) {
                self.duplicates += 1;
                continue;
            }
            if !record.is_valid() {
                self.invalid += 1;
            }
            self.records.push(record);
            appended += 1;
        }
        appended
    }
}

fn step(state: RunState, queue: &mut VecDeque<Effect>, event: Event) -> RunState {
    let (next, effects) = state.transition(event);
    queue.extend(effects);
    next
}

fn is_cancelled(cancel: Option<&watch::Receiver<bool>>) -> bool {
    cancel.is_some_and(|rx| *rx.borrow())
}

/// Sleeps for `delay`, returning `true` early if the run is cancelled
/// meanwhile.
async fn sleep_or_cancel(delay: Duration, cancel: Option<&mut watch::Receiver<bool>>) -> bool {
    let deadline = Instant::now() + delay;
    let Some(rx) = cancel else {
        tokio::time::sleep_until(deadline).await;
        return false;
    };
    if *rx.borrow() {
        return true;
    }
    let cancelled = tokio::select! {
        () = tokio::time::sleep_until(deadline) => return false,
        changed = rx.wait_for(|cancelled| *cancelled) => changed.is_ok(),
    };
    if !cancelled {
        // Sender gone: nobody can cancel any more.
        tokio::time::sleep_until(deadline).await;
    }
    cancelled
}

/// Failures that cannot clear on retry are logged louder than transient ones.
fn failure_level(cause: &SourceError) -> log::Level {
    if cause.is_transient() {
        log::Level::Debug
    } else {
        log::Level::Warn
    }
}
