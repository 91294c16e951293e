//! Article discovery on source sites.
//!
//! A source is either a listing page (blog or magazine front page) whose
//! article links are picked with a fixed selector list, or an RSS/Atom feed.

use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::ScrapeError;

/// Article links on the listing pages of common WordPress themes.
static ARTICLE_LINKS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("h2.entry-title.ast-blog-single-element a, div.td-module-thumb a, div.tds_module_loop_1 a")
        .unwrap()
});

/// Whether a fetched body is a syndication feed rather than HTML.
pub fn looks_like_feed(content_type: Option<&str>, body: &str) -> bool {
    if content_type.is_some_and(|ct| ct.contains("xml") && !ct.contains("html")) {
        return true;
    }
    let head = body.trim_start();
    head.starts_with("<?xml") || head.starts_with("<rss") || head.starts_with("<feed")
}

fn resolve_all<'a>(base: &Url, hrefs: impl Iterator<Item = &'a str>, limit: usize) -> Vec<String> {
    hrefs
        .filter_map(|href| base.join(href.trim()).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(|u| u.to_string())
        .unique()
        .take(limit)
        .collect()
}

/// Up to `limit` distinct absolute article links from a listing page.
#[instrument(level = "debug", skip_all, fields(base = %base))]
pub fn html_links(html: &str, base: &Url, limit: usize) -> Vec<String> {
    let doc = Html::parse_document(html);
    let links = resolve_all(
        base,
        doc.select(&ARTICLE_LINKS).filter_map(|a| a.value().attr("href")),
        limit,
    );
    debug!(count = links.len(), "Listing links extracted");
    links
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl AtomEntry {
    /// The `alternate` link, which is also the default when `rel` is absent.
    fn article_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel.as_deref().is_none_or(|rel| rel == "alternate"))
            .map(|l| l.href.as_str())
    }
}

/// Up to `limit` distinct article links from an RSS 2.0 or Atom feed.
#[instrument(level = "debug", skip_all, fields(base = %base))]
pub fn feed_links(xml: &str, base: &Url, limit: usize) -> Result<Vec<String>, ScrapeError> {
    let de_err = |e: quick_xml::DeError| ScrapeError::Feed(e.to_string());
    let hrefs: Vec<String> = if xml.contains("<rss") {
        let rss: Rss = quick_xml::de::from_str(xml).map_err(de_err)?;
        rss.channel.items.into_iter().filter_map(|i| i.link).collect()
    } else if xml.contains("<feed") {
        let atom: AtomFeed = quick_xml::de::from_str(xml).map_err(de_err)?;
        atom.entries
            .iter()
            .filter_map(AtomEntry::article_link)
            .map(str::to_string)
            .collect()
    } else {
        return Err(ScrapeError::Feed("neither RSS nor Atom".to_string()));
    };

    let links = resolve_all(base, hrefs.iter().map(String::as_str), limit);
    debug!(count = links.len(), "Feed links extracted");
    Ok(links)
}

/// Fetch `source` and return up to `limit` article links from it.
#[instrument(level = "info", skip_all, fields(%source, limit))]
pub async fn index_source(
    client: &reqwest::Client,
    source: &str,
    limit: usize,
) -> Result<Vec<String>, ScrapeError> {
    let base = Url::parse(source).map_err(|_| ScrapeError::InvalidUrl(source.to_string()))?;
    let resp = client.get(base.clone()).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(ScrapeError::Status {
            url: source.to_string(),
            status: status.as_u16(),
        });
    }

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = resp.text().await?;

    let links = if looks_like_feed(content_type.as_deref(), &body) {
        feed_links(&body, &base, limit)?
    } else {
        html_links(&body, &base, limit)
    };
    info!(count = links.len(), "Indexed source");
    Ok(links)
}
