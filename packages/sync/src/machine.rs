//! The sync run as a pure state machine.
//!
//! [`RunState::transition`] maps `(state, event)` to `(state, effects)` and
//! never touches the network or the clock. The driver feeds it the outcome
//! of each effect it executes, so every retry, early-stop and abort rule is
//! testable here without a record source.
//!
//! ```text
//! Sizing --Sized--> Fetching(0, 1) --PageLoaded(full)--> Fetching(1, 1) ...
//!                        |  \--PageLoaded(short|empty)--> Done
//!                        \--PageFailed--> Fetching(0, 2) | next page | Done | Aborted
//! ```

use std::time::Duration;

use serde::Serialize;
use strum_macros::{AsRefStr, Display};

use crate::config::SyncConfig;
use crate::progress::{SyncEvent, SyncProgress};

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the total estimate.
    Sizing,
    /// Waiting for the outcome of attempt `attempt` (1-based) at page
    /// index `page`.
    Fetching {
        /// Zero-based page index; the offset is `page * page_size`.
        page: u64,
        /// Attempt in flight, starting at 1.
        attempt: u32,
    },
    /// The end of the data was reached.
    Done,
    /// The run stopped early.
    Aborted,
}

/// Why a run stopped before reaching the end of the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AbortReason {
    /// No page succeeded before the failure threshold was reached or the
    /// computed page range ran out.
    Unreachable,
    /// The caller cancelled the run.
    Cancelled,
}

/// A page that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedPage {
    /// Offset of the page.
    pub offset: u64,
    /// Rows the page would have carried.
    pub limit: u64,
    /// Attempts made.
    pub attempts: u32,
    /// Why the last attempt failed.
    pub reason: String,
}

/// Outcome of an effect, fed back into [`RunState::transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The total estimate is known. `None` means the count probe failed or
    /// was skipped.
    Sized {
        /// Probed row count.
        total: Option<u64>,
    },
    /// The in-flight fetch returned a page.
    PageLoaded {
        /// Rows the source returned.
        fetched: u64,
        /// Rows actually appended (after dropping already-seen ids).
        appended: u64,
        /// Total-row hint carried by the page.
        total_hint: Option<u64>,
    },
    /// The in-flight fetch failed.
    PageFailed {
        /// Why.
        reason: String,
    },
    /// The caller asked the run to stop.
    Cancelled,
}

/// Work the driver must carry out, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Fetch one page and report [`Event::PageLoaded`] or
    /// [`Event::PageFailed`].
    Fetch {
        /// Row offset.
        offset: u64,
        /// Rows to request.
        limit: u64,
    },
    /// Wait before the next effect. Report [`Event::Cancelled`] instead of
    /// continuing if the run is cancelled meanwhile.
    Sleep(Duration),
    /// Publish a progress event.
    Emit(SyncEvent),
}

/// The complete state of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    phase: Phase,
    config: SyncConfig,
    page_size: u64,
    estimated_total: u64,
    probed: bool,
    expected_pages: u64,
    accumulated: u64,
    pages_succeeded: u64,
    consecutive_failures: u32,
    failed_pages: Vec<FailedPage>,
    progress: SyncProgress,
    abort_reason: Option<AbortReason>,
}

impl RunState {
    /// A run in [`Phase::Sizing`].
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            phase: Phase::Sizing,
            config: config.clone(),
            page_size: config.effective_page_size(),
            estimated_total: config.fallback_estimate,
            probed: false,
            expected_pages: 1,
            accumulated: 0,
            pages_succeeded: 0,
            consecutive_failures: 0,
            failed_pages: Vec::new(),
            progress: SyncProgress::start(config.fallback_estimate),
            abort_reason: None,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Rows requested per page.
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Current total estimate.
    #[must_use]
    pub const fn estimated_total(&self) -> u64 {
        self.estimated_total
    }

    /// `ceil(estimated_total / page_size)`, at least 1, extended while full
    /// pages keep arriving past the estimate.
    #[must_use]
    pub const fn expected_pages(&self) -> u64 {
        self.expected_pages
    }

    /// Records appended so far.
    #[must_use]
    pub const fn accumulated(&self) -> u64 {
        self.accumulated
    }

    /// Pages that returned data.
    #[must_use]
    pub const fn pages_succeeded(&self) -> u64 {
        self.pages_succeeded
    }

    /// Permanent page failures since the last successful page.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Pages that exhausted their attempts, in offset order.
    #[must_use]
    pub fn failed_pages(&self) -> &[FailedPage] {
        &self.failed_pages
    }

    /// Latest progress snapshot.
    #[must_use]
    pub const fn progress(&self) -> SyncProgress {
        self.progress
    }

    /// Why the run aborted, if it did.
    #[must_use]
    pub const fn abort_reason(&self) -> Option<AbortReason> {
        self.abort_reason
    }

    /// Returns `true` once the run is [`Phase::Done`] or [`Phase::Aborted`].
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Done | Phase::Aborted)
    }

    /// Consumes the state, returning the failed pages.
    #[must_use]
    pub fn into_failed_pages(self) -> Vec<FailedPage> {
        self.failed_pages
    }

    /// Applies `event`, returning the next state and the effects to run.
    ///
    /// Events that do not apply to the current phase leave the state
    /// unchanged and yield no effects.
    #[must_use]
    pub fn transition(mut self, event: Event) -> (Self, Vec<Effect>) {
        let effects = match (self.phase, event) {
            (Phase::Done | Phase::Aborted, _) => Vec::new(),
            (_, Event::Cancelled) => self.abort(AbortReason::Cancelled),
            (Phase::Sizing, Event::Sized { total }) => self.sized(total),
            (
                Phase::Fetching { page, .. },
                Event::PageLoaded {
                    fetched,
                    appended,
                    total_hint,
                },
            ) => self.page_loaded(page, fetched, appended, total_hint),
            (Phase::Fetching { page, attempt }, Event::PageFailed { reason }) => {
                self.page_failed(page, attempt, reason)
            }
            (Phase::Sizing, _) | (Phase::Fetching { .. }, Event::Sized { .. }) => Vec::new(),
        };
        (self, effects)
    }

    fn sized(&mut self, total: Option<u64>) -> Vec<Effect> {
        self.probed = total.is_some();
        self.set_estimate(total.unwrap_or(self.config.fallback_estimate));
        self.progress = SyncProgress::start(self.estimated_total);
        self.phase = Phase::Fetching { page: 0, attempt: 1 };

        vec![
            Effect::Emit(SyncEvent::Started {
                estimated_total: self.estimated_total,
                page_size: self.page_size,
                expected_pages: self.expected_pages,
                probed: self.probed,
            }),
            self.fetch(0),
        ]
    }

    fn page_loaded(
        &mut self,
        page: u64,
        fetched: u64,
        appended: u64,
        total_hint: Option<u64>,
    ) -> Vec<Effect> {
        self.pages_succeeded += 1;
        self.consecutive_failures = 0;
        self.accumulated += appended;

        if page == 0
            && !self.probed
            && let Some(hint) = total_hint
        {
            self.set_estimate(hint);
        }

        self.progress = self
            .progress
            .advance(self.accumulated, self.estimated_total);
        self.estimated_total = self.progress.estimated_total;

        let mut effects = vec![Effect::Emit(SyncEvent::PageLoaded {
            offset: self.offset(page),
            records: fetched,
            progress: self.progress,
        })];

        if fetched < self.page_size {
            effects.extend(self.done());
        } else {
            // A full page means the data may continue past the estimate.
            self.expected_pages = self.expected_pages.max(page + 2);
            effects.push(self.advance_to(page + 1));
        }
        effects
    }

    fn page_failed(&mut self, page: u64, attempt: u32, reason: String) -> Vec<Effect> {
        let offset = self.offset(page);

        if attempt < self.config.max_attempts {
            let delay = self.config.backoff_delay(attempt);
            self.phase = Phase::Fetching {
                page,
                attempt: attempt + 1,
            };
            return vec![
                Effect::Emit(SyncEvent::Retrying {
                    offset,
                    attempt,
                    delay,
                    reason,
                }),
                Effect::Sleep(delay),
                self.fetch(page),
            ];
        }

        self.consecutive_failures += 1;
        self.failed_pages.push(FailedPage {
            offset,
            limit: self.page_size,
            attempts: attempt,
            reason: reason.clone(),
        });

        let mut effects = vec![Effect::Emit(SyncEvent::PageFailed {
            offset,
            attempts: attempt,
            reason,
            progress: self.progress,
        })];

        let exhausted = page + 1 >= self.expected_pages;
        let threshold_reached = self.consecutive_failures >= self.config.abort_after_failures;

        // Nothing loaded means the source never answered; an empty buffer
        // must not pass for the complete dataset.
        if self.pages_succeeded == 0 && (threshold_reached || exhausted) {
            effects.extend(self.abort(AbortReason::Unreachable));
        } else if exhausted {
            effects.extend(self.done());
        } else {
            effects.push(self.advance_to(page + 1));
        }
        effects
    }

    fn done(&mut self) -> Vec<Effect> {
        self.phase = Phase::Done;
        self.progress = self.progress.complete();
        vec![self.finished()]
    }

    fn abort(&mut self, reason: AbortReason) -> Vec<Effect> {
        self.phase = Phase::Aborted;
        self.abort_reason = Some(reason);
        self.progress = self.progress.abort();
        vec![self.finished()]
    }

    fn finished(&self) -> Effect {
        Effect::Emit(SyncEvent::Finished {
            progress: self.progress,
            failed_pages: self.failed_pages.len(),
        })
    }

    fn advance_to(&mut self, page: u64) -> Effect {
        self.phase = Phase::Fetching { page, attempt: 1 };
        self.fetch(page)
    }

    fn fetch(&self, page: u64) -> Effect {
        Effect::Fetch {
            offset: self.offset(page),
            limit: self.page_size,
        }
    }

    const fn offset(&self, page: u64) -> u64 {
        page.saturating_mul(self.page_size)
    }

    fn set_estimate(&mut self, estimate: u64) {
        self.estimated_total = estimate;
        self.expected_pages = estimate.div_ceil(self.page_size).max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::RunStatus;

    fn config(page_size: u64) -> SyncConfig {
        SyncConfig {
            page_size,
            ..SyncConfig::default()
        }
    }

    fn loaded(fetched: u64) -> Event {
        Event::PageLoaded {
            fetched,
            appended: fetched,
            total_hint: None,
        }
    }

    fn failed() -> Event {
        Event::PageFailed {
            reason: "boom".to_owned(),
        }
    }

    fn fetches(effects: &[Effect]) -> Vec<u64> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Fetch { offset, .. } => Some(*offset),
                _ => None,
            })
            .collect()
    }

    fn sleeps(effects: &[Effect]) -> Vec<Duration> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Sleep(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    fn drive(mut state: RunState, events: Vec<Event>) -> (RunState, Vec<Effect>) {
        let mut all = Vec::new();
        for event in events {
            let (next, effects) = state.transition(event);
            state = next;
            all.extend(effects);
        }
        (state, all)
    }

    #[test]
    fn sizing_computes_expected_pages() {
        let (state, effects) =
            RunState::new(&config(20)).transition(Event::Sized { total: Some(45) });
        assert_eq!(state.expected_pages(), 3);
        assert_eq!(state.phase(), Phase::Fetching { page: 0, attempt: 1 });
        assert_eq!(fetches(&effects), vec![0]);
    }

    #[test]
    fn failed_probe_falls_back_to_configured_estimate() {
        let (state, effects) =
            RunState::new(&config(20_000)).transition(Event::Sized { total: None });
        assert_eq!(state.estimated_total(), 300_000);
        assert_eq!(state.expected_pages(), 15);
        assert!(matches!(
            effects[0],
            Effect::Emit(SyncEvent::Started { probed: false, .. })
        ));
    }

    #[test]
    fn zero_count_still_fetches_one_page() {
        let (state, effects) = drive(
            RunState::new(&config(20)),
            vec![Event::Sized { total: Some(0) }, loaded(0)],
        );
        assert_eq!(fetches(&effects), vec![0]);
        assert_eq!(state.phase(), Phase::Done);
        assert_eq!(state.progress().percent, 100);
    }

    #[test]
    fn short_page_stops_regardless_of_estimate() {
        let (state, effects) = drive(
            RunState::new(&config(20)),
            vec![Event::Sized { total: Some(1_000) }, loaded(20), loaded(7)],
        );
        assert_eq!(fetches(&effects), vec![0, 20]);
        assert_eq!(state.phase(), Phase::Done);
        assert_eq!(state.accumulated(), 27);
    }

    #[test]
    fn full_pages_past_the_estimate_keep_fetching() {
        let (state, effects) = drive(
            RunState::new(&config(20)),
            vec![Event::Sized { total: Some(20) }, loaded(20), loaded(20), loaded(0)],
        );
        assert_eq!(fetches(&effects), vec![0, 20, 40]);
        assert_eq!(state.phase(), Phase::Done);
        assert_eq!(state.estimated_total(), 40);
    }

    #[test]
    fn retries_with_doubling_backoff() {
        let (state, effects) = drive(
            RunState::new(&config(20)),
            vec![Event::Sized { total: Some(45) }, failed(), failed(), loaded(20)],
        );
        assert_eq!(sleeps(&effects), vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(fetches(&effects), vec![0, 0, 0, 20]);
        assert!(state.failed_pages().is_empty());
    }

    #[test]
    fn exhausted_page_is_skipped() {
        let (state, effects) = drive(
            RunState::new(&config(20)),
            vec![
                Event::Sized { total: Some(45) },
                loaded(20),
                failed(),
                failed(),
                failed(),
            ],
        );
        assert_eq!(fetches(&effects), vec![0, 20, 20, 20, 40]);
        assert_eq!(state.phase(), Phase::Fetching { page: 2, attempt: 1 });
        assert_eq!(
            state.failed_pages(),
            [FailedPage {
                offset: 20,
                limit: 20,
                attempts: 3,
                reason: "boom".to_owned(),
            }]
        );
    }

    #[test]
    fn aborts_after_three_failed_pages_with_nothing_loaded() {
        let mut events = vec![Event::Sized { total: None }];
        events.extend(std::iter::repeat_with(failed).take(9));
        let (state, effects) = drive(RunState::new(&config(20)), events);

        let mut offsets = fetches(&effects);
        offsets.dedup();
        assert_eq!(offsets, vec![0, 20, 40]);
        assert_eq!(state.phase(), Phase::Aborted);
        assert_eq!(state.abort_reason(), Some(AbortReason::Unreachable));
        assert_eq!(state.progress().status, RunStatus::Aborted);
        assert!(state.progress().percent < 100);
    }

    #[test]
    fn failures_after_a_success_never_abort() {
        let mut events = vec![Event::Sized { total: Some(100) }, loaded(20)];
        events.extend(std::iter::repeat_with(failed).take(12));
        let (state, _) = drive(RunState::new(&config(20)), events);
        assert_eq!(state.phase(), Phase::Done);
        assert_eq!(state.failed_pages().len(), 4);
    }

    #[test]
    fn failed_final_page_finishes_the_run() {
        let mut events = vec![Event::Sized { total: Some(40) }, loaded(20)];
        events.extend(std::iter::repeat_with(failed).take(3));
        let (state, effects) = drive(RunState::new(&config(20)), events);
        assert_eq!(state.phase(), Phase::Done);
        assert_eq!(state.progress().percent, 100);
        assert!(matches!(
            effects.last(),
            Some(Effect::Emit(SyncEvent::Finished { failed_pages: 1, .. }))
        ));
    }

    #[test]
    fn every_computed_page_failing_aborts_below_threshold() {
        let mut events = vec![Event::Sized { total: Some(2) }];
        events.extend(std::iter::repeat_with(failed).take(3));
        let (state, effects) = drive(RunState::new(&config(20)), events);

        assert_eq!(fetches(&effects), vec![0, 0, 0]);
        assert_eq!(state.phase(), Phase::Aborted);
        assert_eq!(state.abort_reason(), Some(AbortReason::Unreachable));
        assert_eq!(state.progress().status, RunStatus::Aborted);
        assert!(state.progress().percent < 100);
        assert_eq!(state.failed_pages().len(), 1);
    }

    #[test]
    fn first_page_hint_revises_fallback_estimate() {
        let (state, _) = drive(
            RunState::new(&config(20)),
            vec![
                Event::Sized { total: None },
                Event::PageLoaded {
                    fetched: 20,
                    appended: 20,
                    total_hint: Some(45),
                },
            ],
        );
        assert_eq!(state.estimated_total(), 45);
        assert_eq!(state.expected_pages(), 3);
        assert_eq!(state.progress().percent, 44);
    }

    #[test]
    fn cancellation_aborts_from_any_live_phase() {
        let (state, effects) = drive(
            RunState::new(&config(20)),
            vec![Event::Sized { total: Some(45) }, loaded(20), Event::Cancelled],
        );
        assert_eq!(state.abort_reason(), Some(AbortReason::Cancelled));
        assert!(matches!(effects.last(), Some(Effect::Emit(SyncEvent::Finished { .. }))));

        let (after, effects) = state.clone().transition(loaded(20));
        assert_eq!(after, state);
        assert!(effects.is_empty());
    }

    #[test]
    fn progress_snapshots_never_decrease() {
        let (_, effects) = drive(
            RunState::new(&config(20)),
            vec![
                Event::Sized { total: Some(30) },
                loaded(20),
                failed(),
                loaded(20),
                loaded(20),
                loaded(3),
            ],
        );
        let snapshots: Vec<SyncProgress> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::Emit(event) => event.progress(),
                _ => None,
            })
            .collect();
        assert!(snapshots.windows(2).all(|w| {
            w[0].accumulated <= w[1].accumulated && w[0].percent <= w[1].percent
        }));
        assert!(
            snapshots
                .iter()
                .all(|p| p.percent < 100 || p.status == RunStatus::Complete)
        );
        assert_eq!(snapshots.last().map(|p| p.percent), Some(100));
    }
}
