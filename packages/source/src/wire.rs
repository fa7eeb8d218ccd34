//! JSON shapes of the hosted record service and their normalization into
//! [`InventoryRecord`]s.
//!
//! Rows arrive loosely typed: identifiers and item codes may be numbers or
//! strings, identifiers and timestamps may be missing. [`RawInventoryRecord`]
//! accepts all of that and [`RawInventoryRecord::normalize`] fills the gaps
//! deterministically.

use chrono::{DateTime, NaiveDateTime, Utc};
use relief_inventory_models::{FacetSet, InventoryRecord};
use serde::Deserialize;

/// Response body of `GET /records`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordsResponse {
    /// Whether the service handled the request.
    pub success: bool,
    /// Rows of this page.
    #[serde(default)]
    pub items: Vec<RawInventoryRecord>,
    /// Whether the service believes more rows follow.
    #[serde(default)]
    pub has_more: bool,
    /// Total matching rows. Only populated when `offset == 0`.
    #[serde(default)]
    pub total_count: Option<u64>,
    /// Filter options computed from the first page. Only populated when
    /// `offset == 0`.
    #[serde(default)]
    pub filter_options: Option<FacetSet>,
    /// Error summary on failure.
    #[serde(default)]
    pub error: Option<String>,
    /// Alternative error summary some routes use.
    #[serde(default)]
    pub message: Option<String>,
    /// Error detail on failure.
    #[serde(default)]
    pub details: Option<String>,
}

/// Response body of `GET /records/count`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountResponse {
    /// Whether the service handled the request.
    pub success: bool,
    /// Matching row count.
    #[serde(default)]
    pub count: Option<u64>,
    /// The service approximated the count.
    #[serde(default)]
    pub is_estimate: bool,
    /// The service gave up and returned its own hardcoded constant.
    #[serde(default)]
    pub is_fallback: bool,
}

/// Response body of `GET /facets/*`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacetResponse {
    /// Whether the service handled the request.
    pub success: bool,
    /// Distinct values.
    #[serde(
        default,
        alias = "states",
        alias = "districts",
        alias = "departmentTypes"
    )]
    pub values: Vec<String>,
}

/// Builds a human-readable failure message from the optional error fields of
/// a response.
#[must_use]
pub fn failure_message(error: Option<&str>, details: Option<&str>) -> String {
    match (error, details) {
        (Some(e), Some(d)) => format!("{e}: {d}"),
        (Some(m), None) | (None, Some(m)) => m.to_owned(),
        (None, None) => "service reported failure without a message".to_owned(),
    }
}

/// One row as the service emits it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInventoryRecord {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    district: Option<String>,
    #[serde(default)]
    department_type: Option<String>,
    #[serde(default)]
    department_name: Option<String>,
    #[serde(default)]
    item_code: Option<serde_json::Value>,
    #[serde(default)]
    item_name: Option<String>,
    #[serde(default)]
    quantity: Option<serde_json::Value>,
    #[serde(default)]
    created_at: Option<String>,
}

impl RecordsResponse {
    /// Human-readable reason for a `success: false` body.
    #[must_use]
    pub fn failure(&self) -> String {
        failure_message(
            self.error.as_deref().or(self.message.as_deref()),
            self.details.as_deref(),
        )
    }
}

impl RawInventoryRecord {
    /// Converts the row into an [`InventoryRecord`].
    ///
    /// `position` is the absolute row position (`offset + index`) and seeds
    /// a `temp-{position}` identifier for rows without one. Rows without a
    /// parseable creation timestamp get `fetched_at`.
    #[must_use]
    pub fn normalize(self, position: u64, fetched_at: DateTime<Utc>) -> InventoryRecord {
        let id = self
            .id
            .as_ref()
            .and_then(value_as_string)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("temp-{position}"));

        InventoryRecord {
            id,
            state: self.state.unwrap_or_default(),
            district: self.district.unwrap_or_default(),
            department_type: self.department_type.unwrap_or_default(),
            department_name: self.department_name.unwrap_or_default(),
            item_code: self.item_code.as_ref().and_then(value_as_i64).unwrap_or(0),
            item_name: self.item_name.unwrap_or_default(),
            quantity: self.quantity.as_ref().and_then(value_as_i64),
            created_at: self
                .created_at
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or(fetched_at),
        }
    }
}

/// Parses an RFC 3339 timestamp, or a zone-less `timestamp` column value
/// (assumed UTC) with or without fractional seconds.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn value_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_i64(value: &serde_json::Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str()?.trim().parse::<i64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[test]
    fn numeric_id_and_item_code_are_accepted() {
        let raw: RawInventoryRecord = serde_json::from_str(
            r#"{"id": 42, "state": "Assam", "district": "Kamrup",
                "department_type": "Fire", "department_name": "Fire Station 1",
                "item_code": "17", "item_name": "Hose", "quantity": 3,
                "created_at": "2024-03-01T10:00:00+00:00"}"#,
        )
        .unwrap();
        let record = raw.normalize(0, epoch());
        assert_eq!(record.id, "42");
        assert_eq!(record.item_code, 17);
        assert_eq!(record.quantity, Some(3));
        assert_eq!(record.created_at.to_string(), "2024-03-01 10:00:00 UTC");
    }

    #[test]
    fn missing_id_gets_positional_temp_id() {
        let record = RawInventoryRecord::default().normalize(40_007, epoch());
        assert_eq!(record.id, "temp-40007");
        assert_eq!(record.created_at, epoch());
    }

    #[test]
    fn null_quantity_stays_null() {
        let raw: RawInventoryRecord =
            serde_json::from_str(r#"{"id": "a", "quantity": null}"#).unwrap();
        assert_eq!(raw.normalize(0, epoch()).quantity, None);
    }

    #[test]
    fn parses_zone_less_timestamp_with_fraction() {
        let dt = parse_timestamp("2024-01-15T14:30:00.123456").unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-01-15 14:30:00");
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn records_response_parses_first_page_metadata() {
        let body = r#"{
            "success": true,
            "items": [{"id": "a", "state": "Assam"}],
            "hasMore": false,
            "totalCount": 1,
            "filterOptions": {"states": ["Assam"], "districts": [], "departmentTypes": []}
        }"#;
        let response: RecordsResponse = serde_json::from_str(body).unwrap();
        assert!(response.success);
        assert_eq!(response.items.len(), 1);
        assert_eq!(response.total_count, Some(1));
        assert_eq!(response.filter_options.unwrap().states, vec!["Assam".to_owned()]);
    }

    #[test]
    fn records_failure_prefers_error_over_message() {
        let response: RecordsResponse = serde_json::from_str(
            r#"{"success": false, "message": "Error fetching inventory items", "error": "timeout"}"#,
        )
        .unwrap();
        assert_eq!(response.failure(), "timeout");
    }

    #[test]
    fn facet_response_accepts_legacy_key() {
        let response: FacetResponse =
            serde_json::from_str(r#"{"success": true, "districts": ["Kamrup"]}"#).unwrap();
        assert_eq!(response.values, vec!["Kamrup".to_owned()]);
    }

    #[test]
    fn failure_message_combines_fields() {
        assert_eq!(
            failure_message(Some("Database error"), Some("permission denied")),
            "Database error: permission denied"
        );
        assert_eq!(failure_message(None, None), "service reported failure without a message");
    }
}
