//! Client-side filtered, paginated view over an accumulated buffer.
//!
//! A view is a pure derivation: recompute it whenever the buffer or the
//! selection changes. It borrows the buffer and holds no state of its own.

use relief_inventory_models::{InventoryRecord, RecordFilters};
use serde::Serialize;

/// Rows per page when none is chosen.
pub const DEFAULT_ROWS_PER_PAGE: usize = 25;

/// One page of a filtered view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewPage<'a> {
    /// Rows on this page.
    pub rows: Vec<&'a InventoryRecord>,
    /// 1-based page number, clamped to `1..=page_count`.
    pub page: usize,
    /// Number of pages, at least 1.
    pub page_count: usize,
    /// Rows matching the selection across all pages.
    pub total_matching: usize,
    /// Rows per page.
    pub rows_per_page: usize,
}

impl ViewPage<'_> {
    /// 1-based index of the first row shown, or 0 when nothing matches.
    #[must_use]
    pub fn first_row(&self) -> usize {
        ((self.page - 1) * self.rows_per_page + 1).min(self.total_matching)
    }

    /// 1-based index of the last row shown.
    #[must_use]
    pub fn last_row(&self) -> usize {
        (self.page * self.rows_per_page).min(self.total_matching)
    }

    /// `Showing X to Y of Z items`.
    #[must_use]
    pub fn caption(&self) -> String {
        format!(
            "Showing {} to {} of {} items",
            self.first_row(),
            self.last_row(),
            self.total_matching
        )
    }

    /// Returns `true` if a previous page exists.
    #[must_use]
    pub const fn has_previous(&self) -> bool {
        self.page > 1
    }

    /// Returns `true` if a next page exists.
    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.page < self.page_count
    }
}

/// Rows of `records` matching every active filter, in buffer order.
#[must_use]
pub fn filter_records<'a>(
    records: &'a [InventoryRecord],
    filters: &RecordFilters,
) -> Vec<&'a InventoryRecord> {
    records.iter().filter(|r| filters.matches(r)).collect()
}

/// Page `page` (1-based) of the rows matching `filters`.
///
/// Out-of-range pages clamp to the nearest valid page; a `rows_per_page` of
/// zero is treated as [`DEFAULT_ROWS_PER_PAGE`].
#[must_use]
pub fn view_page<'a>(
    records: &'a [InventoryRecord],
    filters: &RecordFilters,
    page: usize,
    rows_per_page: usize,
) -> ViewPage<'a> {
    let rows_per_page = if rows_per_page == 0 {
        DEFAULT_ROWS_PER_PAGE
    } else {
        rows_per_page
    };
    let matching = filter_records(records, filters);
    let total_matching = matching.len();
    let page_count = total_matching.div_ceil(rows_per_page).max(1);
    let page = page.clamp(1, page_count);

    let rows = matching
        .into_iter()
        .skip((page - 1) * rows_per_page)
        .take(rows_per_page)
        .collect();

    ViewPage {
        rows,
        page,
        page_count,
        total_matching,
        rows_per_page,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;

    fn records(n: usize) -> Vec<InventoryRecord> {
        (0..n)
            .map(|i| InventoryRecord {
                id: format!("r{i}"),
                state: if i % 2 == 0 { "Assam" } else { "Bihar" }.to_owned(),
                district: "Any".to_owned(),
                department_type: "Fire".to_owned(),
                department_name: "Depot".to_owned(),
                item_code: 1,
                item_name: "Rope".to_owned(),
                quantity: None,
                created_at: DateTime::<Utc>::UNIX_EPOCH,
            })
            .collect()
    }

    #[test]
    fn pages_through_filtered_rows() {
        let data = records(100);
        let filters = RecordFilters::none()
            .with_state("Assam")
            .with_district("all");
        let page = view_page(&data, &filters, 2, DEFAULT_ROWS_PER_PAGE);

        assert_eq!(page.total_matching, 50);
        assert_eq!(page.page_count, 2);
        assert_eq!(page.rows.len(), 25);
        assert_eq!(page.rows[0].id, "r50");
        assert_eq!(page.caption(), "Showing 26 to 50 of 50 items");
        assert!(page.has_previous());
        assert!(!page.has_next());
    }

    #[test]
    fn out_of_range_page_is_clamped() {
        let data = records(30);
        let page = view_page(&data, &RecordFilters::none(), 9, 25);
        assert_eq!(page.page, 2);
        assert_eq!(page.rows.len(), 5);

        let page = view_page(&data, &RecordFilters::none(), 0, 25);
        assert_eq!(page.page, 1);
    }

    #[test]
    fn empty_selection_shows_one_empty_page() {
        let data = records(10);
        let page = view_page(&data, &RecordFilters::none().with_state("Kerala"), 1, 25);
        assert_eq!(page.page_count, 1);
        assert!(page.rows.is_empty());
        assert_eq!(page.caption(), "Showing 0 to 0 of 0 items");
    }

    #[test]
    fn filtering_leaves_buffer_untouched() {
        let data = records(4);
        let before = data.clone();
        let _ = filter_records(&data, &RecordFilters::none().with_state("Bihar"));
        assert_eq!(data, before);
    }
}
