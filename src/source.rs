//! Structured-data API client (SWAPI).
//!
//! Resource listings are paginated:
//!
//! ```json
//! { "count": 60, "next": "https://swapi.dev/api/planets/?page=2",
//!   "previous": null, "results": [ { "name": "Tatooine", "url": "…/planets/1/" } ] }
//! ```
//!
//! The first page of a resource is `{base}{resource}/?page=1`; every later page
//! is whatever the previous page named in `next`. `next: null` ends the listing.
//!
//! Transport failures and 429/5xx responses are retried with backoff before
//! surfacing as [`SyncError::FetchFailed`]. A 2xx reply that is not a listing
//! is a [`SyncError::ProtocolViolation`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::SwapiConfig;
use crate::error::{Result, SyncError};
use crate::http::{backoff_delay, is_retryable, truncate, with_trailing_slash};
use crate::models::{Page, PageToken, RawItem, Resource};

/// A paginated source of raw items.
///
/// Implementations only fetch; cycle detection and page sequencing belong to
/// the pipeline.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page of `resource`. Items keep the order the API returned.
    async fn fetch_page(&self, resource: Resource, token: &PageToken) -> Result<Page>;

    /// Identity of the page `token` resolves to. Two tokens naming the same
    /// page must give the same key.
    fn page_key(&self, resource: Resource, token: &PageToken) -> String {
        format!("{}:{}", resource, token)
    }
}

/// HTTP client for the structured-data API.
pub struct SwapiClient {
    base_url: String,
    client: reqwest::Client,
    max_retries: u32,
    retry_base_ms: u64,
}

impl SwapiClient {
    pub fn new(config: &SwapiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: with_trailing_slash(&config.url),
            client,
            max_retries: config.max_retries,
            retry_base_ms: config.retry_base_ms,
        })
    }

    /// URL a token resolves to.
    pub fn page_url(&self, resource: Resource, token: &PageToken) -> String {
        match token {
            PageToken::Start => format!("{}{}/?page=1", self.base_url, resource.path()),
            PageToken::Next(url) => url.clone(),
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt, self.retry_base_ms)).await;
            }

            let response = match self.client.get(url).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(url, attempt, error = %e, "page request failed");
                    last_err = Some(SyncError::fetch(url, e.to_string()));
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let err = SyncError::fetch(url, format!("HTTP {}: {}", status, truncate(&body)));
                if is_retryable(status) {
                    warn!(url, attempt, %status, "page request will be retried");
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }

            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    last_err = Some(SyncError::fetch(url, e.to_string()));
                    continue;
                }
            };

            return serde_json::from_slice(&bytes).map_err(|e| {
                SyncError::ProtocolViolation(format!("{} returned a non-JSON body: {}", url, e))
            });
        }

        Err(last_err.unwrap_or_else(|| SyncError::fetch(url, "request failed after retries")))
    }
}

#[async_trait]
impl PageSource for SwapiClient {
    async fn fetch_page(&self, resource: Resource, token: &PageToken) -> Result<Page> {
        let url = self.page_url(resource, token);
        let json = self.get_json(&url).await?;
        let page = parse_page(&url, &json)?;
        debug!(%resource, %url, items = page.items.len(), "fetched page");
        Ok(page)
    }

    fn page_key(&self, resource: Resource, token: &PageToken) -> String {
        self.page_url(resource, token)
    }
}

/// Parse a listing body into a [`Page`].
pub fn parse_page(url: &str, json: &Value) -> Result<Page> {
    let results = json
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            SyncError::ProtocolViolation(format!("{} response has no results array", url))
        })?;

    let mut items = Vec::with_capacity(results.len());
    for (i, entry) in results.iter().enumerate() {
        let item = entry
            .as_object()
            .cloned()
            .and_then(RawItem::from_json)
            .ok_or_else(|| {
                SyncError::ProtocolViolation(format!(
                    "{} result #{} is missing its url identifier",
                    url, i
                ))
            })?;
        items.push(item);
    }

    let next = match json.get("next") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(PageToken::Next(s.clone())),
        Some(other) => {
            return Err(SyncError::ProtocolViolation(format!(
                "{} has a non-string next link: {}",
                url, other
            )))
        }
    };

    let total = json.get("count").and_then(Value::as_u64).map(|c| c as usize);

    Ok(Page { items, next, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const URL: &str = "https://swapi.dev/api/planets/?page=1";

    #[test]
    fn parses_results_and_next() {
        let body = json!({
            "count": 3,
            "next": "https://swapi.dev/api/planets/?page=2",
            "previous": null,
            "results": [
                {"name": "Tatooine", "url": "https://swapi.dev/api/planets/1/"},
                {"name": "Alderaan", "url": "https://swapi.dev/api/planets/2/"}
            ]
        });
        let page = parse_page(URL, &body).unwrap();
        let ids: Vec<_> = page.items.iter().map(|i| i.source_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(
            page.next,
            Some(PageToken::Next("https://swapi.dev/api/planets/?page=2".into()))
        );
        assert_eq!(page.total, Some(3));
    }

    #[test]
    fn null_next_ends_pagination() {
        let body = json!({"count": 0, "next": null, "results": []});
        let page = parse_page(URL, &body).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next.is_none());
    }

    #[test]
    fn missing_results_is_protocol_violation() {
        let err = parse_page(URL, &json!({"detail": "Not found"})).unwrap_err();
        assert!(matches!(err, SyncError::ProtocolViolation(_)));
    }

    #[test]
    fn item_without_url_is_protocol_violation() {
        let body = json!({"next": null, "results": [{"name": "Nameless"}]});
        let err = parse_page(URL, &body).unwrap_err();
        assert!(err.to_string().contains("result #0"));
    }

    #[test]
    fn start_token_requests_first_page() {
        let client = SwapiClient::new(&SwapiConfig {
            url: "https://swapi.dev/api".into(),
            timeout_secs: 5,
            max_retries: 0,
            retry_base_ms: 1,
        })
        .unwrap();
        assert_eq!(
            client.page_url(Resource::People, &PageToken::Start),
            "https://swapi.dev/api/people/?page=1"
        );
        assert_eq!(
            client.page_url(Resource::People, &PageToken::Next("x".into())),
            "x"
        );
    }

    #[test]
    fn first_page_and_its_next_link_share_a_key() {
        let client = SwapiClient::new(&SwapiConfig {
            url: "https://swapi.dev/api/".into(),
            timeout_secs: 5,
            max_retries: 0,
            retry_base_ms: 1,
        })
        .unwrap();
        let link = PageToken::Next("https://swapi.dev/api/planets/?page=1".into());
        assert_eq!(
            client.page_key(Resource::Planets, &PageToken::Start),
            client.page_key(Resource::Planets, &link)
        );
        assert_ne!(
            client.page_key(Resource::Planets, &PageToken::Start),
            client.page_key(Resource::People, &PageToken::Start)
        );
    }
}
