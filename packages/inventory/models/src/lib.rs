#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Relief inventory record types shared by the sync engine and its callers.
//!
//! An [`InventoryRecord`] is one relief-supply line item as the remote
//! record source stores it. Records are read and accumulated, never
//! mutated. [`RecordFilters`] describes the equality filters a fetch or a
//! client-side view applies, [`Page`] is one bounded fetch result, and
//! [`Facet`] / [`FacetScope`] / [`FacetSet`] describe the derived
//! filter-option lists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Filter value meaning "do not filter on this field".
pub const ALL_SENTINEL: &str = "all";

/// Returns `true` if `value` is absent, blank, or the [`ALL_SENTINEL`].
#[must_use]
pub fn is_unfiltered(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty() || v.eq_ignore_ascii_case(ALL_SENTINEL))
}

/// One relief-supply line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    /// Opaque identifier, unique across an accumulated record set.
    pub id: String,
    /// State the supplies are held in.
    pub state: String,
    /// District within the state.
    pub district: String,
    /// Department category (e.g. `"Fire"`, `"Health"`).
    pub department_type: String,
    /// Holding department's name.
    pub department_name: String,
    /// Numeric catalogue code of the item.
    pub item_code: i64,
    /// Human-readable item name.
    pub item_name: String,
    /// Quantity on hand. The source legitimately emits `null`.
    pub quantity: Option<i64>,
    /// When the row was created server-side.
    pub created_at: DateTime<Utc>,
}

impl InventoryRecord {
    /// The `(state, district, department_type)` key the remote source sorts
    /// pages by.
    #[must_use]
    pub fn sort_key(&self) -> (&str, &str, &str) {
        (&self.state, &self.district, &self.department_type)
    }

    /// Returns the value of the given facet field for this record.
    #[must_use]
    pub fn facet_value(&self, facet: Facet) -> &str {
        match facet {
            Facet::State => &self.state,
            Facet::District => &self.district,
            Facet::DepartmentType => &self.department_type,
        }
    }

    /// Lists every way this record violates the data-quality rules.
    ///
    /// An empty list means the record is valid.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<&'static str> {
        let mut errors = Vec::new();

        if self.state.trim().is_empty() {
            errors.push("State is required");
        }
        if self.district.trim().is_empty() {
            errors.push("District is required");
        }
        if self.department_type.trim().is_empty() {
            errors.push("Department type is required");
        }
        if self.department_name.trim().is_empty() {
            errors.push("Department name is required");
        }
        if self.item_name.trim().is_empty() {
            errors.push("Item name is required");
        }
        if self.quantity.is_some_and(|q| q < 0) {
            errors.push("Quantity must not be negative");
        }

        errors
    }

    /// Returns `true` if [`validation_errors`](Self::validation_errors) is
    /// empty.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation_errors().is_empty()
    }
}

/// A filterable record field. The string form is the query parameter name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum FilterField {
    /// `state`
    State,
    /// `district`
    District,
    /// `department_type`
    DepartmentType,
    /// `department_name`
    DepartmentName,
    /// `item_code`
    ItemCode,
    /// `item_name`
    ItemName,
}

/// Equality filters applied to a fetch or to the client-side view.
///
/// Text filters holding [`ALL_SENTINEL`] (or blank) are inactive; an
/// `item_code` of zero is inactive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilters {
    /// Only records in this state.
    #[serde(default)]
    pub state: Option<String>,
    /// Only records in this district.
    #[serde(default)]
    pub district: Option<String>,
    /// Only records of this department type.
    #[serde(default)]
    pub department_type: Option<String>,
    /// Only records held by this department.
    #[serde(default)]
    pub department_name: Option<String>,
    /// Only records with this item code.
    #[serde(default)]
    pub item_code: Option<i64>,
    /// Only records with this item name.
    #[serde(default)]
    pub item_name: Option<String>,
}

impl RecordFilters {
    /// No filters at all.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Sets the state filter.
    #[must_use]
    pub fn with_state(mut self, state: &str) -> Self {
        self.state = Some(state.to_owned());
        self
    }

    /// Sets the district filter.
    #[must_use]
    pub fn with_district(mut self, district: &str) -> Self {
        self.district = Some(district.to_owned());
        self
    }

    /// Sets the department type filter.
    #[must_use]
    pub fn with_department_type(mut self, department_type: &str) -> Self {
        self.department_type = Some(department_type.to_owned());
        self
    }

    /// Sets the department name filter.
    #[must_use]
    pub fn with_department_name(mut self, department_name: &str) -> Self {
        self.department_name = Some(department_name.to_owned());
        self
    }

    /// Sets the item code filter.
    #[must_use]
    pub const fn with_item_code(mut self, item_code: i64) -> Self {
        self.item_code = Some(item_code);
        self
    }

    /// Sets the item name filter.
    #[must_use]
    pub fn with_item_name(mut self, item_name: &str) -> Self {
        self.item_name = Some(item_name.to_owned());
        self
    }

    /// Returns the active `(field, value)` pairs in a fixed field order,
    /// skipping inactive filters.
    #[must_use]
    pub fn active(&self) -> Vec<(FilterField, String)> {
        let text = [
            (FilterField::State, &self.state),
            (FilterField::District, &self.district),
            (FilterField::DepartmentType, &self.department_type),
            (FilterField::DepartmentName, &self.department_name),
        ];

        let mut active: Vec<(FilterField, String)> = text
            .into_iter()
            .filter(|(_, value)| !is_unfiltered(value.as_deref()))
            .filter_map(|(field, value)| value.clone().map(|v| (field, v)))
            .collect();

        if let Some(code) = self.item_code
            && code != 0
        {
            active.push((FilterField::ItemCode, code.to_string()));
        }

        if !is_unfiltered(self.item_name.as_deref())
            && let Some(name) = &self.item_name
        {
            active.push((FilterField::ItemName, name.clone()));
        }

        active
    }

    /// Returns `true` if no filter is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active().is_empty()
    }

    /// Returns `true` if `record` satisfies every active filter.
    #[must_use]
    pub fn matches(&self, record: &InventoryRecord) -> bool {
        self.active().iter().all(|(field, value)| match field {
            FilterField::State => record.state == *value,
            FilterField::District => record.district == *value,
            FilterField::DepartmentType => record.department_type == *value,
            FilterField::DepartmentName => record.department_name == *value,
            FilterField::ItemCode => record.item_code.to_string() == *value,
            FilterField::ItemName => record.item_name == *value,
        })
    }
}

/// One bounded fetch result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Records in source sort order. Never longer than the requested limit.
    pub records: Vec<InventoryRecord>,
    /// Whether more data may remain after this page.
    pub has_more: bool,
    /// Total matching rows, only meaningful on the first page of a run.
    pub total_hint: Option<u64>,
    /// Filter options the source computed alongside the first page.
    pub facet_hint: Option<FacetSet>,
}

impl Page {
    /// Builds a page for a request of `limit` rows.
    ///
    /// Truncates `records` to `limit` and forces `has_more` to `false` for a
    /// short page, so the size invariants hold whatever the source claimed.
    #[must_use]
    pub fn new(mut records: Vec<InventoryRecord>, limit: u64, has_more: bool) -> Self {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        records.truncate(limit);
        let has_more = has_more && records.len() == limit;
        Self {
            records,
            has_more,
            total_hint: None,
            facet_hint: None,
        }
    }

    /// Attaches a total-count hint.
    #[must_use]
    pub const fn with_total_hint(mut self, total: Option<u64>) -> Self {
        self.total_hint = total;
        self
    }

    /// Attaches first-page filter options.
    #[must_use]
    pub fn with_facet_hint(mut self, facets: Option<FacetSet>) -> Self {
        self.facet_hint = facets;
        self
    }

    /// Number of records on the page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the page carries no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// An inventory attribute that filter selectors are populated from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Facet {
    /// Distinct states.
    State,
    /// Distinct districts, optionally scoped by state.
    District,
    /// Distinct department types, optionally scoped by state and district.
    DepartmentType,
}

impl Facet {
    /// Every facet, in selector order.
    pub const ALL: &[Self] = &[Self::State, Self::District, Self::DepartmentType];

    /// Path segment of the remote facet endpoint (`/facets/{segment}`).
    #[must_use]
    pub const fn endpoint(self) -> &'static str {
        match self {
            Self::State => "states",
            Self::District => "districts",
            Self::DepartmentType => "department-types",
        }
    }
}

/// Upstream selections a facet list is scoped by.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FacetScope {
    /// Selected state, if any.
    pub state: Option<String>,
    /// Selected district, if any.
    pub district: Option<String>,
}

impl FacetScope {
    /// No upstream selection.
    #[must_use]
    pub fn unscoped() -> Self {
        Self::default()
    }

    /// Scope with the given selections. [`ALL_SENTINEL`] and blank values
    /// are treated as "not selected".
    #[must_use]
    pub fn new(state: Option<&str>, district: Option<&str>) -> Self {
        let keep = |v: Option<&str>| (!is_unfiltered(v)).then(|| v.map(str::to_owned)).flatten();
        Self {
            state: keep(state),
            district: keep(district),
        }
    }

    /// Narrows the scope to what actually applies to `facet`: states are
    /// never scoped, districts only by state, department types by both.
    #[must_use]
    pub fn for_facet(&self, facet: Facet) -> Self {
        match facet {
            Facet::State => Self::unscoped(),
            Facet::District => Self {
                state: self.state.clone(),
                district: None,
            },
            Facet::DepartmentType => self.clone(),
        }
    }

    /// Returns `true` if nothing is selected.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.state.is_none() && self.district.is_none()
    }

    /// Returns `true` if `record` lies within the scope.
    #[must_use]
    pub fn contains(&self, record: &InventoryRecord) -> bool {
        self.state.as_deref().is_none_or(|s| record.state == s)
            && self
                .district
                .as_deref()
                .is_none_or(|d| record.district == d)
    }
}

/// The three filter-option lists, each sorted and deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacetSet {
    /// Distinct states.
    #[serde(default)]
    pub states: Vec<String>,
    /// Distinct districts.
    #[serde(default)]
    pub districts: Vec<String>,
    /// Distinct department types.
    #[serde(default)]
    pub department_types: Vec<String>,
}

impl FacetSet {
    /// Returns the list for `facet`.
    #[must_use]
    pub fn values(&self, facet: Facet) -> &[String] {
        match facet {
            Facet::State => &self.states,
            Facet::District => &self.districts,
            Facet::DepartmentType => &self.department_types,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, state: &str, district: &str) -> InventoryRecord {
        InventoryRecord {
            id: id.to_owned(),
            state: state.to_owned(),
            district: district.to_owned(),
            department_type: "Health".to_owned(),
            department_name: "District Hospital".to_owned(),
            item_code: 101,
            item_name: "Stretcher".to_owned(),
            quantity: Some(4),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn all_sentinel_filters_are_inactive() {
        let filters = RecordFilters::none()
            .with_state("all")
            .with_district("ALL")
            .with_department_type("  ")
            .with_item_code(0);
        assert!(filters.is_empty());
    }

    #[test]
    fn active_filters_keep_field_order() {
        let filters = RecordFilters::none()
            .with_item_name("Tent")
            .with_state("Assam")
            .with_item_code(7);
        let active = filters.active();
        assert_eq!(
            active,
            vec![
                (FilterField::State, "Assam".to_owned()),
                (FilterField::ItemCode, "7".to_owned()),
                (FilterField::ItemName, "Tent".to_owned()),
            ]
        );
        assert_eq!(active[0].0.as_ref(), "state");
        assert_eq!(FilterField::DepartmentType.as_ref(), "department_type");
    }

    #[test]
    fn filters_match_by_equality() {
        let filters = RecordFilters::none()
            .with_state("Assam")
            .with_district("all");
        assert!(filters.matches(&record("1", "Assam", "Kamrup")));
        assert!(!filters.matches(&record("2", "Bihar", "Patna")));
    }

    #[test]
    fn validation_reports_blank_fields_and_negative_quantity() {
        let mut bad = record("1", " ", "Kamrup");
        bad.quantity = Some(-3);
        assert_eq!(
            bad.validation_errors(),
            vec!["State is required", "Quantity must not be negative"]
        );
        assert!(record("2", "Assam", "Kamrup").is_valid());
    }

    #[test]
    fn null_quantity_is_valid() {
        let mut r = record("1", "Assam", "Kamrup");
        r.quantity = None;
        assert!(r.is_valid());
    }

    #[test]
    fn short_page_never_claims_more() {
        let page = Page::new(vec![record("1", "A", "X")], 20, true);
        assert!(!page.has_more);
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn oversized_page_is_truncated() {
        let records = (0..5).map(|i| record(&i.to_string(), "A", "X")).collect();
        let page = Page::new(records, 3, true);
        assert_eq!(page.len(), 3);
        assert!(page.has_more);
    }

    #[test]
    fn facet_scope_narrows_per_facet() {
        let scope = FacetScope::new(Some("Assam"), Some("Kamrup"));
        assert!(scope.for_facet(Facet::State).is_empty());
        assert_eq!(scope.for_facet(Facet::District).district, None);
        assert_eq!(scope.for_facet(Facet::District).state.as_deref(), Some("Assam"));
        assert_eq!(scope.for_facet(Facet::DepartmentType), scope);
    }

    #[test]
    fn facet_scope_ignores_all_sentinel() {
        assert!(FacetScope::new(Some("all"), Some("")).is_empty());
    }

    #[test]
    fn facet_parses_kebab_case() {
        assert_eq!("department-type".parse::<Facet>().ok(), Some(Facet::DepartmentType));
        assert_eq!(Facet::District.endpoint(), "districts");
    }

    #[test]
    fn facet_set_uses_camel_case_wire_names() {
        let json = r#"{"states":["A"],"districts":["X"],"departmentTypes":["Fire"]}"#;
        let set: FacetSet = serde_json::from_str(json).unwrap();
        assert_eq!(set.values(Facet::DepartmentType), ["Fire".to_owned()]);
    }
}
