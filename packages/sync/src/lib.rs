#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Bulk synchronization of relief inventory records.
//!
//! [`driver::SyncDriver`] pulls a whole (optionally filtered) dataset through
//! a [`RecordSource`](relief_inventory_source::RecordSource) one page at a
//! time, retrying failed pages with capped exponential backoff and moving
//! past pages that keep failing. The run itself is modelled as a pure state
//! machine in [`machine`]; the driver only executes its effects.
//!
//! Around the run sit the [`facets`] extractor, the client-side
//! [`view`] over an accumulated buffer, and the [`store`] that swaps
//! buffers wholesale.

pub mod config;
pub mod driver;
pub mod facets;
pub mod machine;
pub mod progress;
pub mod store;
pub mod view;

pub use config::{Settings, SyncConfig};
pub use driver::{SyncDriver, SyncReport};
pub use machine::{AbortReason, FailedPage};
pub use progress::{RunStatus, SyncEvent, SyncProgress};

/// Errors surfaced by the sync crate.
///
/// Individual page failures never appear here; the driver folds them into
/// the run's [`SyncReport`].
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Settings are present but unusable.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of what is wrong.
        message: String,
    },

    /// Settings file parsing failed.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O error reading a settings file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run ended before reaching the end of the data.
    #[error("sync aborted ({reason}) after loading {accumulated} records; {failed_pages} pages failed")]
    RunAborted {
        /// Why the run stopped.
        reason: AbortReason,
        /// Records accumulated before stopping.
        accumulated: u64,
        /// Pages that permanently failed.
        failed_pages: usize,
    },
}
