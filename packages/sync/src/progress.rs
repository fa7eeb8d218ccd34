//! Typed progress events emitted by a sync run, and the rendering seam they
//! feed.
//!
//! The driver sends [`SyncEvent`]s on a [`tokio::sync::mpsc`] channel. Each
//! carries an immutable [`SyncProgress`] snapshot, so a UI task can read
//! them without sharing any state with the run. [`forward_events`] bridges
//! the channel to a [`ProgressCallback`], which the CLI implements with an
//! `indicatif` bar.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use tokio::sync::mpsc;

/// Highest percentage shown before a run is done. Estimates are imprecise,
/// so an in-progress run must not look finished.
pub const IN_PROGRESS_PERCENT_CEILING: u8 = 99;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    /// Pages are still being fetched.
    InProgress,
    /// The run reached the end of the data.
    Complete,
    /// The run gave up early or was cancelled.
    Aborted,
}

/// Snapshot of a run's progress.
///
/// Within one run `accumulated` and `percent` never decrease, and `percent`
/// is 100 only once `status` is [`RunStatus::Complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    /// Records accumulated so far.
    pub accumulated: u64,
    /// Current estimate of the total; revised upward if exceeded.
    pub estimated_total: u64,
    /// Derived percentage, `0..=100`.
    pub percent: u8,
    /// Run status.
    pub status: RunStatus,
}

impl SyncProgress {
    /// Progress at the start of a run.
    #[must_use]
    pub const fn start(estimated_total: u64) -> Self {
        Self {
            accumulated: 0,
            estimated_total,
            percent: 0,
            status: RunStatus::InProgress,
        }
    }

    /// Progress after `accumulated` records against `estimated_total`.
    ///
    /// The estimate is raised to `accumulated` if exceeded, and the
    /// percentage is `min(99, round(accumulated / estimate * 100))`, never
    /// lower than the previous snapshot's.
    #[must_use]
    pub fn advance(&self, accumulated: u64, estimated_total: u64) -> Self {
        let accumulated = accumulated.max(self.accumulated);
        let estimated_total = estimated_total.max(accumulated);
        Self {
            accumulated,
            estimated_total,
            percent: in_progress_percent(accumulated, estimated_total).max(self.percent),
            status: RunStatus::InProgress,
        }
    }

    /// Final snapshot of a run that reached the end of the data.
    #[must_use]
    pub const fn complete(&self) -> Self {
        Self {
            percent: 100,
            status: RunStatus::Complete,
            ..*self
        }
    }

    /// Final snapshot of a run that gave up.
    #[must_use]
    pub const fn abort(&self) -> Self {
        Self {
            status: RunStatus::Aborted,
            ..*self
        }
    }

    /// Returns `true` once the run has ended either way.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        !matches!(self.status, RunStatus::InProgress)
    }
}

/// `min(99, round(accumulated / estimated_total * 100))`, in integer
/// arithmetic. An unknown (zero) estimate yields 0.
#[must_use]
pub fn in_progress_percent(accumulated: u64, estimated_total: u64) -> u8 {
    if estimated_total == 0 {
        return 0;
    }
    let scaled = u128::from(accumulated) * 100;
    let total = u128::from(estimated_total);
    let rounded = (scaled + total / 2) / total;
    u8::try_from(rounded.min(u128::from(IN_PROGRESS_PERCENT_CEILING)))
        .unwrap_or(IN_PROGRESS_PERCENT_CEILING)
}

/// The user-facing one-line outcome of a run.
#[must_use]
pub fn summary_line(accumulated: u64, estimated_total: u64, failed_pages: usize) -> String {
    let pages = if failed_pages == 1 { "page" } else { "pages" };
    format!("loaded {accumulated} of ~{estimated_total} records; {failed_pages} {pages} failed")
}

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Sizing finished and the first page is about to be requested.
    Started {
        /// Estimated total rows.
        estimated_total: u64,
        /// Rows per page.
        page_size: u64,
        /// `ceil(estimated_total / page_size)`, at least 1.
        expected_pages: u64,
        /// Whether the estimate came from the count probe.
        probed: bool,
    },
    /// A page arrived and its records were appended.
    PageLoaded {
        /// Offset of the page.
        offset: u64,
        /// Rows the page carried.
        records: u64,
        /// Progress after appending.
        progress: SyncProgress,
    },
    /// A page attempt failed and will be retried after `delay`.
    Retrying {
        /// Offset of the page.
        offset: u64,
        /// Failed attempts so far.
        attempt: u32,
        /// Backoff before the next attempt.
        delay: Duration,
        /// Why the attempt failed.
        reason: String,
    },
    /// A page exhausted its attempts; the run moves past it.
    PageFailed {
        /// Offset of the page.
        offset: u64,
        /// Attempts made.
        attempts: u32,
        /// Why the last attempt failed.
        reason: String,
        /// Progress after giving up on the page.
        progress: SyncProgress,
    },
    /// The run ended.
    Finished {
        /// Final progress.
        progress: SyncProgress,
        /// Pages that permanently failed.
        failed_pages: usize,
    },
}

impl SyncEvent {
    /// The progress snapshot this event carries, if any.
    #[must_use]
    pub const fn progress(&self) -> Option<SyncProgress> {
        match self {
            Self::PageLoaded { progress, .. }
            | Self::PageFailed { progress, .. }
            | Self::Finished { progress, .. } => Some(*progress),
            Self::Started { .. } | Self::Retrying { .. } => None,
        }
    }
}

/// Sender half a driver emits events on.
pub type EventSender = mpsc::UnboundedSender<SyncEvent>;

/// Receiver half a UI subscribes with.
pub type EventReceiver = mpsc::UnboundedReceiver<SyncEvent>;

/// Creates a connected event channel.
#[must_use]
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Trait for rendering progress of long-running operations.
///
/// Implementations must be `Send + Sync` to support use across spawned
/// tokio tasks and `Arc`-based sharing.
pub trait ProgressCallback: Send + Sync {
    /// Set the total expected units of work (enables percentage/ETA).
    fn set_total(&self, total: u64);

    /// Set the current position (absolute, not delta).
    fn set_position(&self, pos: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);
}

/// Renders one event onto `progress`.
pub fn apply_event(progress: &dyn ProgressCallback, event: &SyncEvent) {
    match event {
        SyncEvent::Started {
            estimated_total,
            expected_pages,
            probed,
            ..
        } => {
            progress.set_total(*estimated_total);
            let source = if *probed { "counted" } else { "estimated" };
            progress.set_message(format!(
                "Syncing ~{estimated_total} records ({source}, {expected_pages} pages)"
            ));
        }
        SyncEvent::PageLoaded { progress: p, .. } => {
            progress.set_total(p.estimated_total);
            progress.set_position(p.accumulated);
            progress.set_message(format!("Syncing records ({}%)", p.percent));
        }
        SyncEvent::Retrying {
            offset,
            attempt,
            delay,
            ..
        } => {
            progress.set_message(format!(
                "Retrying page at offset {offset} in {delay:?} (attempt {attempt} failed)"
            ));
        }
        SyncEvent::PageFailed {
            offset,
            progress: p,
            ..
        } => {
            progress.set_position(p.accumulated);
            progress.set_message(format!("Skipped page at offset {offset}"));
        }
        SyncEvent::Finished {
            progress: p,
            failed_pages,
        } => {
            progress.set_position(p.accumulated);
            progress.finish(summary_line(p.accumulated, p.estimated_total, *failed_pages));
        }
    }
}

/// Drains `events` onto `progress` until the sending side is dropped.
pub async fn forward_events(mut events: EventReceiver, progress: Arc<dyn ProgressCallback>) {
    while let Some(event) = events.recv().await {
        apply_event(progress.as_ref(), &event);
    }
}
