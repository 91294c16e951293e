//! Keyword search through the Google Custom Search JSON API.
//!
//! The time window becomes a `sort=date:r:START:END` restriction and the
//! filter flags become query refinements (excluded or added terms).

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::error::ScrapeError;
use crate::models::Filters;

pub const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

/// The API returns at most this many results per request.
pub const MAX_RESULTS: usize = 10;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    link: String,
}

/// The search query for `keyword` with the filter refinements applied.
pub fn refine_query(keyword: &str, filters: &Filters) -> String {
    let mut query = keyword.trim().to_string();
    let refinements = [
        (filters.exclude_ads, "-publicité -sponsorisé"),
        (filters.exclude_professional, "-site:linkedin.com"),
        (filters.target_press, "actualités"),
        (filters.exclude_jobs, "-emploi -recrutement"),
        (filters.exclude_training, "-formation"),
    ];
    for (_, terms) in refinements.iter().filter(|(on, _)| *on) {
        query.push(' ');
        query.push_str(terms);
    }
    query
}

#[derive(Debug, Clone)]
pub struct GoogleSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    engine_id: String,
}

impl GoogleSearch {
    pub fn new(client: reqwest::Client, api_key: &str, engine_id: &str) -> Self {
        Self::with_endpoint(client, DEFAULT_ENDPOINT, api_key, engine_id)
    }

    pub fn with_endpoint(client: reqwest::Client, endpoint: &str, api_key: &str, engine_id: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            engine_id: engine_id.to_string(),
        }
    }

    /// Full request URL for one keyword; `today` anchors the date range.
    pub fn query_url(&self, keyword: &str, filters: &Filters, num: usize, today: NaiveDate) -> String {
        let (start, end) = filters.window().date_range(today);
        format!(
            "{}?q={}&key={}&cx={}&num={}&sort=date:r:{}:{}",
            self.endpoint,
            urlencoding::encode(&refine_query(keyword, filters)),
            urlencoding::encode(&self.api_key),
            urlencoding::encode(&self.engine_id),
            num.clamp(1, MAX_RESULTS),
            start.format("%Y%m%d"),
            end.format("%Y%m%d"),
        )
    }

    /// Result links for `keyword` within the filters' time window.
    #[instrument(level = "info", skip_all, fields(%keyword, num))]
    pub async fn fetch_results(&self, keyword: &str, filters: &Filters, num: usize) -> Result<Vec<String>, ScrapeError> {
        let today = chrono::Local::now().date_naive();
        let resp = self
            .client
            .get(self.query_url(keyword, filters, num, today))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Search request rejected");
            return Err(ScrapeError::Search(format!("HTTP {status}: {body}")));
        }

        let links: Vec<String> = resp
            .json::<SearchResponse>()
            .await?
            .items
            .into_iter()
            .map(|i| i.link)
            .collect();
        info!(count = links.len(), "Search results");
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeUnit;

    fn engine() -> GoogleSearch {
        GoogleSearch::new(reqwest::Client::new(), "KEY", "CX")
    }

    #[test]
    fn test_query_url_encodes_window() {
        let filters = Filters {
            time_unit: TimeUnit::Months,
            time_value: 3,
            ..Filters::default()
        };
        let today = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let url = engine().query_url("intelligence artificielle", &filters, 10, today);
        assert_eq!(
            url,
            "https://www.googleapis.com/customsearch/v1?q=intelligence%20artificielle&key=KEY&cx=CX&num=10&sort=date:r:20250401:20250630"
        );
    }

    #[test]
    fn test_years_window_and_num_clamp() {
        let filters = Filters {
            time_unit: TimeUnit::Years,
            time_value: 1,
            ..Filters::default()
        };
        let today = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let url = engine().query_url("ai", &filters, 50, today);
        assert!(url.contains("&num=10&"));
        assert!(url.ends_with("sort=date:r:20240630:20250630"));
    }

    #[test]
    fn test_huge_stored_window_still_builds_a_query() {
        let filters = Filters {
            time_unit: TimeUnit::Years,
            time_value: 1_000_000,
            ..Filters::default()
        };
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let url = engine().query_url("ai", &filters, 10, today);
        assert!(url.ends_with(":20261018"));
    }

    #[test]
    fn test_refine_query_flags() {
        assert_eq!(refine_query(" ai ", &Filters::default()), "ai");

        let filters = Filters {
            exclude_jobs: true,
            exclude_training: true,
            ..Filters::default()
        };
        assert_eq!(refine_query("ai", &filters), "ai -emploi -recrutement -formation");
    }

    #[test]
    fn test_response_without_items_is_empty() {
        let parsed: SearchResponse = serde_json::from_str(r#"{"kind": "customsearch#search"}"#).unwrap();
        assert!(parsed.items.is_empty());
    }
}
