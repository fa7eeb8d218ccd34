#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the relief inventory sync tool.
//!
//! Runs a subcommand when one is given, otherwise falls back to an
//! interactive menu. Uses `indicatif-log-bridge` (via
//! [`relief_inventory_cli_utils::init_logger`]) so log lines and progress
//! bars never fight for the terminal.

mod commands;
mod interactive;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use relief_inventory_models::{FacetScope, RecordFilters};
use relief_inventory_sync::view::DEFAULT_ROWS_PER_PAGE;

#[derive(Parser)]
#[command(name = "relief_inventory", about = "Relief inventory sync tool")]
struct Cli {
    /// TOML settings file with `[source]` and `[sync]` tables. Without it,
    /// settings come from `RELIEF_*` environment variables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Equality filters; `all` or an empty value means unfiltered.
#[derive(Args, Clone, Default)]
struct FilterArgs {
    /// Only records in this state
    #[arg(long)]
    state: Option<String>,
    /// Only records in this district
    #[arg(long)]
    district: Option<String>,
    /// Only records of this department type
    #[arg(long)]
    department_type: Option<String>,
    /// Only records held by this department
    #[arg(long)]
    department_name: Option<String>,
    /// Only records with this item code (0 means unfiltered)
    #[arg(long)]
    item_code: Option<i64>,
    /// Only records with this item name
    #[arg(long)]
    item_name: Option<String>,
}

impl FilterArgs {
    fn to_filters(&self) -> RecordFilters {
        RecordFilters {
            state: self.state.clone(),
            district: self.district.clone(),
            department_type: self.department_type.clone(),
            department_name: self.department_name.clone(),
            item_code: self.item_code,
            item_name: self.item_name.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Pull every matching record from the record source
    Sync {
        #[command(flatten)]
        filters: FilterArgs,
        /// Rows per request (clamped to the source ceiling)
        #[arg(long)]
        page_size: Option<u64>,
        /// Give failed pages of a completed run a second round of attempts
        #[arg(long)]
        retry_failed: bool,
        /// Write the full report, records included, as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Probe the number of matching records
    Count {
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// List filter options (states, districts, department types)
    Facets {
        /// Scope districts and department types to this state
        #[arg(long)]
        state: Option<String>,
        /// Scope department types to this district
        #[arg(long)]
        district: Option<String>,
        /// Sync the dataset and compute the lists locally when the source has
        /// no facet endpoint
        #[arg(long)]
        sync: bool,
    },
    /// Sync everything, then show one page of a client-side filtered view
    Browse {
        #[command(flatten)]
        filters: FilterArgs,
        /// 1-based page number
        #[arg(long, default_value = "1")]
        page: usize,
        /// Rows per page
        #[arg(long, default_value_t = DEFAULT_ROWS_PER_PAGE)]
        per_page: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = relief_inventory_cli_utils::init_logger();
    let cli = Cli::parse();
    let mut settings = commands::load_settings(cli.config.as_deref())?;

    let Some(command) = cli.command else {
        return interactive::run(&settings, &multi).await;
    };

    let source = commands::connect(&settings)?;

    match command {
        Commands::Sync {
            filters,
            page_size,
            retry_failed,
            output,
        } => {
            if let Some(page_size) = page_size {
                settings.sync.page_size = page_size;
                settings.sync.validate()?;
            }
            let report = commands::sync_with_progress(
                &settings,
                &source,
                &filters.to_filters(),
                &multi,
                retry_failed,
            )
            .await?;
            commands::print_report(&report);
            if let Some(path) = output {
                commands::write_report(&report, &path)?;
            }
            report.ensure_complete()?;
        }
        Commands::Count { filters } => {
            commands::count(&settings, &source, &filters.to_filters()).await;
        }
        Commands::Facets {
            state,
            district,
            sync,
        } => {
            let report = if sync {
                Some(
                    commands::sync_with_progress(
                        &settings,
                        &source,
                        &RecordFilters::none(),
                        &multi,
                        false,
                    )
                    .await?,
                )
            } else {
                None
            };
            let scope = FacetScope::new(state.as_deref(), district.as_deref());
            let set = commands::facets(&source, report.as_ref(), &scope).await;
            commands::print_facets(&set);
        }
        Commands::Browse {
            filters,
            page,
            per_page,
        } => {
            let report = commands::sync_with_progress(
                &settings,
                &source,
                &RecordFilters::none(),
                &multi,
                false,
            )
            .await?;
            println!("{}", report.summary());
            let view = relief_inventory_sync::view::view_page(
                &report.records,
                &filters.to_filters(),
                page,
                per_page,
            );
            commands::print_view(&view);
        }
    }

    Ok(())
}
