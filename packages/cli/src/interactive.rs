//! Interactive menu for the relief inventory tool.
//!
//! Provides a menu-driven interface using `dialoguer` so records can be
//! synced, counted and browsed without memorizing CLI flags. The loaded
//! buffer lives in an [`InventoryStore`] and is replaced wholesale by every
//! completed reload.

use dialoguer::{Confirm, Input, Select};
use relief_inventory_cli_utils::MultiProgress;
use relief_inventory_models::{ALL_SENTINEL, Facet, FacetScope, InventoryRecord, RecordFilters};
use relief_inventory_source::RecordSource;
use relief_inventory_sync::Settings;
use relief_inventory_sync::facets::{facet_values, resolve_facet, resolve_facet_set};
use relief_inventory_sync::store::InventoryStore;
use relief_inventory_sync::view::DEFAULT_ROWS_PER_PAGE;

use crate::commands;

/// Top-level actions available in the interactive menu.
enum Action {
    ReloadAll,
    SyncFiltered,
    Count,
    Facets,
    Browse,
    Quit,
}

impl Action {
    const ALL: &[Self] = &[
        Self::ReloadAll,
        Self::SyncFiltered,
        Self::Count,
        Self::Facets,
        Self::Browse,
        Self::Quit,
    ];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::ReloadAll => "Reload all records",
            Self::SyncFiltered => "Sync a filtered subset",
            Self::Count => "Count records",
            Self::Facets => "Show filter options",
            Self::Browse => "Browse loaded records",
            Self::Quit => "Quit",
        }
    }
}

/// Navigation choices while browsing.
enum Nav {
    Next,
    Previous,
    Refilter,
    Back,
}

impl Nav {
    const ALL: &[Self] = &[Self::Next, Self::Previous, Self::Refilter, Self::Back];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::Next => "Next page",
            Self::Previous => "Previous page",
            Self::Refilter => "Change filters",
            Self::Back => "Back to menu",
        }
    }
}

/// Runs the interactive menu loop until the user quits.
///
/// # Errors
///
/// Returns an error if a prompt fails or the record source cannot be
/// configured.
pub async fn run(
    settings: &Settings,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Relief Inventory Sync");
    println!();

    let source = commands::connect(settings)?;
    let store = InventoryStore::new();
    let labels: Vec<&str> = Action::ALL.iter().map(Action::label).collect();

    loop {
        let idx = Select::new()
            .with_prompt("What would you like to do?")
            .items(&labels)
            .default(0)
            .interact()?;

        match Action::ALL[idx] {
            Action::ReloadAll => {
                reload(settings, &source, &store, &RecordFilters::none(), multi).await?;
            }
            Action::SyncFiltered => {
                let filters = prompt_remote_filters(&source, &store).await?;
                reload(settings, &source, &store, &filters, multi).await?;
            }
            Action::Count => {
                let filters = prompt_remote_filters(&source, &store).await?;
                commands::count(settings, &source, &filters).await;
            }
            Action::Facets => {
                let snapshot = store.snapshot();
                let set =
                    resolve_facet_set(&source, snapshot.records(), &FacetScope::unscoped()).await;
                commands::print_facets(&set);
            }
            Action::Browse => browse(&store)?,
            Action::Quit => break,
        }
    }

    Ok(())
}

async fn reload(
    settings: &Settings,
    source: &dyn RecordSource,
    store: &InventoryStore,
    filters: &RecordFilters,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = commands::sync_with_progress(settings, source, filters, multi, false).await?;
    commands::print_report(&report);

    let report = if report.is_complete()
        && !report.failed_pages.is_empty()
        && Confirm::new()
            .with_prompt(format!("Retry {} failed pages?", report.failed_pages.len()))
            .default(true)
            .interact()?
    {
        let retried = relief_inventory_sync::SyncDriver::new(settings.sync.clone())
            .retry_pages(source, report)
            .await;
        commands::print_report(&retried);
        retried
    } else {
        report
    };

    if store.apply_report(report).is_none() {
        println!("Keeping the previously loaded records.");
    }
    Ok(())
}

/// Prompts for state, district and department type, offering the options
/// the source (or the loaded buffer) knows about.
async fn prompt_remote_filters(
    source: &dyn RecordSource,
    store: &InventoryStore,
) -> Result<RecordFilters, Box<dyn std::error::Error>> {
    let snapshot = store.snapshot();
    let records = snapshot.records();

    let state = select_value(
        "State",
        resolve_facet(source, records, Facet::State, &FacetScope::unscoped()).await,
    )?;
    let scope = FacetScope::new(state.as_deref(), None);
    let district = select_value(
        "District",
        resolve_facet(source, records, Facet::District, &scope).await,
    )?;
    let scope = FacetScope::new(state.as_deref(), district.as_deref());
    let department_type = select_value(
        "Department type",
        resolve_facet(source, records, Facet::DepartmentType, &scope).await,
    )?;

    Ok(RecordFilters {
        state,
        district,
        department_type,
        ..RecordFilters::none()
    })
}

/// Prompts for filters over the loaded buffer; options come from the buffer
/// itself.
fn prompt_local_filters(
    records: &[InventoryRecord],
) -> Result<RecordFilters, Box<dyn std::error::Error>> {
    let state = select_value(
        "State",
        facet_values(records, Facet::State, &FacetScope::unscoped()),
    )?;
    let scope = FacetScope::new(state.as_deref(), None);
    let district = select_value("District", facet_values(records, Facet::District, &scope))?;
    let scope = FacetScope::new(state.as_deref(), district.as_deref());
    let department_type = select_value(
        "Department type",
        facet_values(records, Facet::DepartmentType, &scope),
    )?;

    Ok(RecordFilters {
        state,
        district,
        department_type,
        ..RecordFilters::none()
    })
}

/// Offers `all` followed by `values`; an empty list falls back to free text.
fn select_value(
    prompt: &str,
    values: Vec<String>,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    if values.is_empty() {
        let raw: String = Input::new()
            .with_prompt(format!("{prompt} (empty for all)"))
            .allow_empty(true)
            .interact_text()?;
        let raw = raw.trim();
        return Ok((!raw.is_empty()).then(|| raw.to_owned()));
    }

    let mut items = vec![ALL_SENTINEL.to_owned()];
    items.extend(values);
    let idx = Select::new()
        .with_prompt(prompt)
        .items(&items)
        .default(0)
        .max_length(20)
        .interact()?;

    Ok((idx > 0).then(|| items[idx].clone()))
}

fn browse(store: &InventoryStore) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = store.snapshot();
    if snapshot.is_empty() {
        println!("Nothing loaded yet; reload first.");
        return Ok(());
    }
    if let Some(summary) = snapshot.summary() {
        println!("Buffer #{}: {summary}", snapshot.generation());
    }

    let mut filters = prompt_local_filters(snapshot.records())?;
    let mut page = 1;
    let labels: Vec<&str> = Nav::ALL.iter().map(Nav::label).collect();

    loop {
        let view = snapshot.view(&filters, page, DEFAULT_ROWS_PER_PAGE);
        commands::print_view(&view);
        page = view.page;

        let idx = Select::new()
            .with_prompt("Navigate")
            .items(&labels)
            .default(0)
            .interact()?;

        match Nav::ALL[idx] {
            Nav::Next => page += 1,
            Nav::Previous => page = page.saturating_sub(1),
            Nav::Refilter => {
                filters = prompt_local_filters(snapshot.records())?;
                page = 1;
            }
            Nav::Back => break,
        }
    }

    Ok(())
}
