//! Collecting articles: search, source indexing, page fetching, documents.
//!
//! Work is split in two phases, as for any news source:
//!
//! 1. **Indexing**: discover article URLs, either from a keyword search
//!    ([`search`]) or from source pages and feeds ([`sources`])
//! 2. **Fetching**: download and parse each article ([`page`]), or take the
//!    text of an uploaded file ([`documents`])
//!
//! The orchestrator only sees the [`Fetcher`] and [`Searcher`] traits, so
//! tests can replace the network with canned pages.

pub mod documents;
pub mod page;
pub mod search;
pub mod sources;

use std::time::Duration;
use tracing::{instrument, warn};

use crate::error::ScrapeError;
use crate::models::{Filters, Page};
use crate::outputs::json::PageArchive;

/// Browser-like headers; some publishers reject unknown agents.
const USER_AGENT: &str = "Mozilla/5.0";
const ACCEPT_LANGUAGE: &str = "fr-FR,fr;q=0.9";

/// Fetches article pages and indexes source sites.
pub trait Fetcher {
    async fn fetch_page(&self, url: &str) -> Result<Page, ScrapeError>;

    /// Up to `limit` article links found on `source`.
    async fn index_links(&self, source: &str, limit: usize) -> Result<Vec<String>, ScrapeError>;
}

/// Finds article URLs for a keyword.
pub trait Searcher {
    async fn search(&self, keyword: &str, filters: &Filters, num: usize) -> Result<Vec<String>, ScrapeError>;
}

impl Searcher for search::GoogleSearch {
    async fn search(&self, keyword: &str, filters: &Filters, num: usize) -> Result<Vec<String>, ScrapeError> {
        self.fetch_results(keyword, filters, num).await
    }
}

/// HTTP client used for all scraping requests.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ScrapeError> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        reqwest::header::HeaderValue::from_static(ACCEPT_LANGUAGE),
    );
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .timeout(timeout)
        .build()?)
}

/// [`Fetcher`] over plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Fetcher for HttpFetcher {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn fetch_page(&self, url: &str) -> Result<Page, ScrapeError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(ScrapeError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let html = resp.text().await?;
        page::extract_page(&html, url)
    }

    async fn index_links(&self, source: &str, limit: usize) -> Result<Vec<String>, ScrapeError> {
        sources::index_source(&self.client, source, limit).await
    }
}

/// Decorator that copies every fetched page into a [`PageArchive`].
///
/// Archive failures are logged and do not fail the fetch.
#[derive(Debug, Clone)]
pub struct ArchivingFetcher<F> {
    inner: F,
    archive: PageArchive,
}

impl<F: Fetcher> ArchivingFetcher<F> {
    pub fn new(inner: F, archive: PageArchive) -> Self {
        Self { inner, archive }
    }
}

impl<F: Fetcher> Fetcher for ArchivingFetcher<F> {
    async fn fetch_page(&self, url: &str) -> Result<Page, ScrapeError> {
        let page = self.inner.fetch_page(url).await?;
        if let Err(e) = self.archive.upsert(&page).await {
            warn!(%url, error = %e, "Failed to archive page");
        }
        Ok(page)
    }

    async fn index_links(&self, source: &str, limit: usize) -> Result<Vec<String>, ScrapeError> {
        self.inner.index_links(source, limit).await
    }
}
