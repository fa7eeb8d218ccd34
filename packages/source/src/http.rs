//! Page Fetcher over the hosted record service's HTTP/JSON API.
//!
//! Every call races the request against a client-side timer
//! ([`SourceConfig::request_timeout`]); timer expiry surfaces as
//! [`SourceError::Timeout`], which the sync driver retries like any other
//! page failure. No retry happens at this layer.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use relief_inventory_models::{Facet, FacetScope, Page, RecordFilters};

use crate::config::SourceConfig;
use crate::wire::{CountResponse, FacetResponse, RecordsResponse};
use crate::{FetchFailed, PageRequest, RecordSource, SourceError};

/// Sort order requested from the service so page boundaries are stable.
pub const SORT_ORDER: &str = "state,district,department_type";

/// [`RecordSource`] backed by `GET /records`, `GET /records/count` and
/// `GET /facets/*`.
#[derive(Debug, Clone)]
pub struct HttpRecordSource {
    client: reqwest::Client,
    config: SourceConfig,
}

impl HttpRecordSource {
    /// Creates a source with its own [`reqwest::Client`].
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] if `config` is invalid, or
    /// [`SourceError::Http`] if the client cannot be built.
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        config.validate()?;
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, config })
    }

    fn get(&self, path: &str, query: &[(String, String)]) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .get(self.config.endpoint(path))
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    /// Sends `builder` and decodes its JSON body, racing the whole exchange
    /// against the client-side timeout.
    async fn send_json<T>(
        &self,
        path: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, SourceError>
    where
        T: serde::de::DeserializeOwned,
    {
        with_timeout(self.config.request_timeout(), async {
            let response = builder.send().await?;
            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND
                || status == reqwest::StatusCode::NOT_IMPLEMENTED
            {
                return Err(SourceError::Unavailable {
                    endpoint: path.to_owned(),
                });
            }
            let text = response.error_for_status()?.text().await?;
            Ok(serde_json::from_str(&text)?)
        })
        .await
    }
}

/// Races `fut` against a timer of `after`.
///
/// # Errors
///
/// Returns [`SourceError::Timeout`] if the timer wins, otherwise whatever
/// `fut` resolved to.
pub async fn with_timeout<T, F>(after: Duration, fut: F) -> Result<T, SourceError>
where
    F: Future<Output = Result<T, SourceError>>,
{
    tokio::time::timeout(after, fut)
        .await
        .unwrap_or(Err(SourceError::Timeout { after }))
}

/// Query parameters for a page request: range, sort order, then every
/// active filter.
#[must_use]
pub fn page_query(request: &PageRequest) -> Vec<(String, String)> {
    let mut query = vec![
        ("offset".to_owned(), request.offset.to_string()),
        ("limit".to_owned(), request.limit.to_string()),
        ("order".to_owned(), SORT_ORDER.to_owned()),
    ];
    query.extend(filter_query(&request.filters));
    query
}

/// Query parameters for the active filters.
#[must_use]
pub fn filter_query(filters: &RecordFilters) -> Vec<(String, String)> {
    filters
        .active()
        .into_iter()
        .map(|(field, value)| (field.as_ref().to_owned(), value))
        .collect()
}

/// Query parameters for a facet request, restricted to the selections that
/// apply to `facet`.
#[must_use]
pub fn facet_query(facet: Facet, scope: &FacetScope) -> Vec<(String, String)> {
    let scope = scope.for_facet(facet);
    let mut query = Vec::new();
    if let Some(state) = scope.state {
        query.push(("state".to_owned(), state));
    }
    if let Some(district) = scope.district {
        query.push(("district".to_owned(), district));
    }
    query
}

#[async_trait]
impl RecordSource for HttpRecordSource {
    fn label(&self) -> &str {
        &self.config.base_url
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, FetchFailed> {
        let (first, last) = request.range();
        log::debug!("Fetching rows {first}-{last} from {}", self.config.base_url);

        let query = page_query(request);
        let body: RecordsResponse = self
            .send_json("/records", self.get("/records", &query))
            .await
            .map_err(|e| FetchFailed::new(request.offset, e))?;

        if !body.success {
            return Err(FetchFailed::new(
                request.offset,
                SourceError::Remote {
                    message: body.failure(),
                },
            ));
        }

        let fetched_at = chrono::Utc::now();
        let returned = body.items.len() as u64;
        if returned > request.limit {
            log::warn!(
                "Service returned {returned} rows for a {}-row request at offset {}; truncating",
                request.limit,
                request.offset,
            );
        }

        let records = body
            .items
            .into_iter()
            .zip(request.offset..)
            .map(|(raw, position)| raw.normalize(position, fetched_at))
            .collect();

        let first_page = request.offset == 0;
        Ok(Page::new(records, request.limit, body.has_more)
            .with_total_hint(body.total_count.filter(|_| first_page))
            .with_facet_hint(body.filter_options.filter(|_| first_page)))
    }

    async fn count_records(&self, filters: &RecordFilters) -> Result<u64, SourceError> {
        let query = filter_query(filters);
        let body: CountResponse = self
            .send_json("/records/count", self.get("/records/count", &query))
            .await?;

        if !body.success || body.is_fallback {
            return Err(SourceError::Remote {
                message: "count endpoint could not determine a row count".to_owned(),
            });
        }
        if body.is_estimate {
            log::info!("Row count from {} is an estimate", self.config.base_url);
        }
        body.count.ok_or_else(|| SourceError::Remote {
            message: "count response carried no count".to_owned(),
        })
    }

    async fn facet_values(
        &self,
        facet: Facet,
        scope: &FacetScope,
    ) -> Result<Vec<String>, SourceError> {
        let path = format!("/facets/{}", facet.endpoint());
        let query = facet_query(facet, scope);
        let body: FacetResponse = self.send_json(&path, self.get(&path, &query)).await?;

        if !body.success {
            return Err(SourceError::Remote {
                message: format!("facet endpoint {path} reported failure"),
            });
        }
        Ok(body.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(query: &[(String, String)]) -> Vec<(&str, &str)> {
        query.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }

    #[test]
    fn page_query_skips_all_sentinel() {
        let filters = RecordFilters::none()
            .with_state("Assam")
            .with_district("all")
            .with_department_type("Fire");
        let request = PageRequest::new(20, 20, filters);
        assert_eq!(
            pairs(&page_query(&request)),
            vec![
                ("offset", "20"),
                ("limit", "20"),
                ("order", "state,district,department_type"),
                ("state", "Assam"),
                ("department_type", "Fire"),
            ]
        );
    }

    #[test]
    fn facet_query_drops_selections_that_do_not_apply() {
        let scope = FacetScope::new(Some("Assam"), Some("Kamrup"));
        assert!(facet_query(Facet::State, &scope).is_empty());
        assert_eq!(pairs(&facet_query(Facet::District, &scope)), vec![("state", "Assam")]);
        assert_eq!(
            pairs(&facet_query(Facet::DepartmentType, &scope)),
            vec![("state", "Assam"), ("district", "Kamrup")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timer_expiry_becomes_timeout_error() {
        let result: Result<(), SourceError> = with_timeout(Duration::from_secs(15), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(
            result,
            Err(SourceError::Timeout { after }) if after == Duration::from_secs(15)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_call_beats_timer() {
        let result = with_timeout(Duration::from_secs(15), async { Ok(7) }).await;
        assert_eq!(result.ok(), Some(7));
    }

    #[test]
    fn rejects_invalid_config() {
        let config = SourceConfig {
            base_url: String::new(),
            ..SourceConfig::default()
        };
        assert!(HttpRecordSource::new(config).is_err());
    }
}
