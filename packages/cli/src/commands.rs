//! Operations shared by the subcommands and the interactive menu.

use std::path::Path;

use relief_inventory_cli_utils::{IndicatifProgress, MultiProgress};
use relief_inventory_models::{Facet, FacetScope, FacetSet, RecordFilters};
use relief_inventory_source::RecordSource;
use relief_inventory_source::http::HttpRecordSource;
use relief_inventory_sync::facets::resolve_facet_set;
use relief_inventory_sync::progress::{event_channel, forward_events};
use relief_inventory_sync::view::ViewPage;
use relief_inventory_sync::{Settings, SyncDriver, SyncReport};
use tokio::sync::watch;

/// Reads `path` if given, otherwise builds settings from the environment.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a value is unusable.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, Box<dyn std::error::Error>> {
    let settings = match path {
        Some(path) => {
            log::info!("Loading settings from {}", path.display());
            Settings::load(path)?
        }
        None => Settings::from_env()?,
    };
    Ok(settings)
}

/// Builds the HTTP record source described by `settings`.
///
/// # Errors
///
/// Returns an error if the source configuration is invalid.
pub fn connect(settings: &Settings) -> Result<HttpRecordSource, Box<dyn std::error::Error>> {
    Ok(HttpRecordSource::new(settings.source.clone())?)
}

/// Runs a full sync with a progress bar, cancelling on Ctrl-C. With
/// `retry_failed`, failed pages of a completed run get a second round.
///
/// # Errors
///
/// Returns an error if the progress task panics.
pub async fn sync_with_progress(
    settings: &Settings,
    source: &dyn RecordSource,
    filters: &RecordFilters,
    multi: &MultiProgress,
    retry_failed: bool,
) -> Result<SyncReport, Box<dyn std::error::Error>> {
    let (events, receiver) = event_channel();
    let bar = IndicatifProgress::records_bar(multi, "Counting records...");
    let forwarder = tokio::spawn(forward_events(receiver, bar));

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted; stopping after the current page");
            let _ = cancel_tx.send(true);
        }
    });

    let driver = SyncDriver::new(settings.sync.clone())
        .with_events(events)
        .with_cancel(cancel_rx);
    let mut report = driver.run(source, filters).await;
    if retry_failed && report.is_complete() && !report.failed_pages.is_empty() {
        report = driver.retry_pages(source, report).await;
    }

    // Dropping the driver closes the event channel and ends the forwarder.
    drop(driver);
    forwarder.await?;
    interrupt.abort();

    Ok(report)
}

/// Prints the outcome of a run, including each failed range.
pub fn print_report(report: &SyncReport) {
    println!("{}", report.summary());
    for page in &report.failed_pages {
        println!(
            "  failed: rows {}-{} after {} attempts ({})",
            page.offset,
            page.offset + page.limit - 1,
            page.attempts,
            page.reason
        );
    }
    if report.duplicates > 0 {
        println!("  {} duplicate rows dropped", report.duplicates);
    }
    if report.invalid_records > 0 {
        println!("  {} rows fail validation", report.invalid_records);
    }
    if let Some(reason) = report.abort_reason {
        println!("  run aborted: {reason}");
    }
}

/// Writes `report` as pretty JSON to `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_report(
    report: &SyncReport,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), report)?;
    log::info!("Wrote {} records to {}", report.records.len(), path.display());
    Ok(())
}

/// Probes the row count; a failed probe reports the fallback estimate.
pub async fn count(settings: &Settings, source: &dyn RecordSource, filters: &RecordFilters) {
    match source.count_records(filters).await {
        Ok(count) => println!("{count} records"),
        Err(e) => {
            log::warn!("Count probe failed: {e}");
            println!(
                "~{} records (estimate; count unavailable)",
                settings.sync.fallback_estimate
            );
        }
    }
}

/// Resolves every facet list within `scope`, using `report` as the local
/// fallback when the source has no facet endpoint.
pub async fn facets(
    source: &dyn RecordSource,
    report: Option<&SyncReport>,
    scope: &FacetScope,
) -> FacetSet {
    let records = report.map_or(&[][..], |r| r.records.as_slice());
    resolve_facet_set(source, records, scope).await
}

/// Prints each facet list under a heading.
pub fn print_facets(set: &FacetSet) {
    for facet in Facet::ALL {
        let values = set.values(*facet);
        println!("{facet} ({})", values.len());
        for value in values {
            println!("  {value}");
        }
    }
}

/// Prints one page of the client-side view as a table.
pub fn print_view(page: &ViewPage<'_>) {
    println!(
        "{:<16} {:<18} {:<14} {:<24} {:>8} {:<24} {:>8}",
        "STATE", "DISTRICT", "DEPT TYPE", "DEPARTMENT", "CODE", "ITEM", "QTY"
    );
    println!("{}", "-".repeat(118));
    for record in &page.rows {
        let quantity = record
            .quantity
            .map_or_else(|| "-".to_owned(), |q| q.to_string());
        println!(
            "{:<16} {:<18} {:<14} {:<24} {:>8} {:<24} {:>8}",
            truncate(&record.state, 16),
            truncate(&record.district, 18),
            truncate(&record.department_type, 14),
            truncate(&record.department_name, 24),
            record.item_code,
            truncate(&record.item_name, 24),
            quantity
        );
    }
    println!();
    println!("{} (page {} of {})", page.caption(), page.page, page.page_count);
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_owned();
    }
    let mut cut: String = value.chars().take(width.saturating_sub(1)).collect();
    cut.push('\u{2026}');
    cut
}
