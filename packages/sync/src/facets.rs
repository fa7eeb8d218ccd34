//! Facet Extractor.
//!
//! Distinct, sorted filter-option lists computed from an accumulated
//! buffer, scoped by upstream selections. A scoped list that comes out
//! empty (a stale selection, say) falls back to the unscoped list so a
//! selector is never left blank while data exists.
//!
//! [`resolve_facet`] prefers a source's dedicated facet endpoint and only
//! scans the buffer when that endpoint is unavailable or fails.

use std::collections::BTreeSet;

use relief_inventory_models::{Facet, FacetScope, FacetSet, InventoryRecord};
use relief_inventory_source::{RecordSource, SourceError};

/// Distinct non-blank values of `facet` among `records`, ordinal ascending.
#[must_use]
pub fn distinct_values<'a, I>(records: I, facet: Facet) -> Vec<String>
where
    I: IntoIterator<Item = &'a InventoryRecord>,
{
    records
        .into_iter()
        .map(|r| r.facet_value(facet))
        .filter(|v| !v.trim().is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_owned)
        .collect()
}

/// Values of `facet` within `scope`, or the unscoped list if the scope
/// matches nothing.
///
/// Only the selections that apply to `facet` are used: states ignore the
/// scope, districts are scoped by state, department types by state and
/// district.
#[must_use]
pub fn facet_values(records: &[InventoryRecord], facet: Facet, scope: &FacetScope) -> Vec<String> {
    let scope = scope.for_facet(facet);
    if scope.is_empty() {
        return distinct_values(records, facet);
    }

    let scoped = distinct_values(records.iter().filter(|r| scope.contains(r)), facet);
    if scoped.is_empty() {
        log::info!("No {facet} values within {scope:?}; showing the unscoped list");
        return distinct_values(records, facet);
    }
    scoped
}

/// All three lists for the given selections.
#[must_use]
pub fn facet_set(records: &[InventoryRecord], scope: &FacetScope) -> FacetSet {
    FacetSet {
        states: facet_values(records, Facet::State, scope),
        districts: facet_values(records, Facet::District, scope),
        department_types: facet_values(records, Facet::DepartmentType, scope),
    }
}

/// Values of `facet` within `scope`, from the source's facet endpoint when
/// it answers with a non-empty list, otherwise computed from `records`.
pub async fn resolve_facet(
    source: &dyn RecordSource,
    records: &[InventoryRecord],
    facet: Facet,
    scope: &FacetScope,
) -> Vec<String> {
    match source.facet_values(facet, scope).await {
        Ok(values) if !values.is_empty() => normalize(values),
        Ok(_) => {
            log::info!("Facet endpoint returned no {facet} values; computing locally");
            facet_values(records, facet, scope)
        }
        Err(SourceError::Unavailable { endpoint }) => {
            log::debug!("{endpoint} unavailable; computing {facet} values locally");
            facet_values(records, facet, scope)
        }
        Err(e) => {
            log::warn!("Facet endpoint failed ({e}); computing {facet} values locally");
            facet_values(records, facet, scope)
        }
    }
}

/// [`resolve_facet`] for all three facets.
pub async fn resolve_facet_set(
    source: &dyn RecordSource,
    records: &[InventoryRecord],
    scope: &FacetScope,
) -> FacetSet {
    FacetSet {
        states: resolve_facet(source, records, Facet::State, scope).await,
        districts: resolve_facet(source, records, Facet::District, scope).await,
        department_types: resolve_facet(source, records, Facet::DepartmentType, scope).await,
    }
}

/// Sorts, deduplicates and drops blank entries from a list a remote
/// endpoint returned.
fn normalize(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .filter(|v| !v.trim().is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use relief_inventory_source::memory::MemoryRecordSource;

    use super::*;

    fn record(state: &str, district: &str, department_type: &str) -> InventoryRecord {
        InventoryRecord {
            id: format!("{state}-{district}-{department_type}"),
            state: state.to_owned(),
            district: district.to_owned(),
            department_type: department_type.to_owned(),
            department_name: "Depot".to_owned(),
            item_code: 1,
            item_name: "Blanket".to_owned(),
            quantity: Some(1),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    fn sample() -> Vec<InventoryRecord> {
        vec![
            record("A", "Y", "Fire"),
            record("B", "Z", "Police"),
            record("A", "X", "Health"),
        ]
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    #[test]
    fn districts_scoped_by_state() {
        let records = sample();
        let scoped = facet_values(&records, Facet::District, &FacetScope::new(Some("A"), None));
        assert_eq!(scoped, strings(&["X", "Y"]));

        let unscoped = facet_values(&records, Facet::District, &FacetScope::unscoped());
        assert_eq!(unscoped, strings(&["X", "Y", "Z"]));
    }

    #[test]
    fn empty_scope_falls_back_to_unscoped_list() {
        let records = sample();
        let values = facet_values(&records, Facet::District, &FacetScope::new(Some("Q"), None));
        assert_eq!(values, strings(&["X", "Y", "Z"]));
    }

    #[test]
    fn department_types_scope_by_state_and_district() {
        let records = sample();
        let scope = FacetScope::new(Some("A"), Some("X"));
        assert_eq!(facet_values(&records, Facet::DepartmentType, &scope), strings(&["Health"]));
        assert_eq!(facet_values(&records, Facet::State, &scope), strings(&["A", "B"]));
    }

    #[test]
    fn blank_values_and_duplicates_are_dropped() {
        let mut records = sample();
        records.push(record(" ", "X", "Fire"));
        records.push(record("A", "X", "Fire"));
        assert_eq!(
            distinct_values(&records, Facet::State),
            strings(&["A", "B"])
        );
    }

    #[test]
    fn empty_buffer_yields_empty_lists() {
        assert_eq!(facet_set(&[], &FacetScope::new(Some("A"), None)), FacetSet::default());
    }

    #[tokio::test]
    async fn prefers_facet_endpoint_when_available() {
        let source = MemoryRecordSource::new(sample()).with_facet_endpoint();
        // The local buffer disagrees with the source; the endpoint wins.
        let local = vec![record("C", "W", "Fire")];
        let values = resolve_facet(&source, &local, Facet::State, &FacetScope::unscoped()).await;
        assert_eq!(values, strings(&["A", "B"]));
    }

    #[tokio::test]
    async fn computes_locally_when_endpoint_is_missing() {
        let source = MemoryRecordSource::new(Vec::new());
        let set = resolve_facet_set(&source, &sample(), &FacetScope::new(Some("A"), None)).await;
        assert_eq!(set.states, strings(&["A", "B"]));
        assert_eq!(set.districts, strings(&["X", "Y"]));
        assert_eq!(set.department_types, strings(&["Fire", "Health"]));
    }

    #[tokio::test]
    async fn empty_endpoint_answer_falls_back_to_buffer() {
        let source = MemoryRecordSource::new(sample()).with_facet_endpoint();
        let local = sample();
        let values = resolve_facet(
            &source,
            &local,
            Facet::District,
            &FacetScope::new(Some("Q"), None),
        )
        .await;
        assert_eq!(values, strings(&["X", "Y", "Z"]));
    }
}
