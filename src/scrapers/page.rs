//! Generic article extraction.
//!
//! Pages come from arbitrary publishers, so each field is read through a
//! fallback chain of selectors and the first non-empty match wins. Body text
//! is built from paragraphs of the first content selector that yields any
//! substantial paragraph; short fragments (captions, bylines, share buttons)
//! are dropped.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::ScrapeError;
use crate::models::Page;
use crate::utils::collapse_whitespace;

/// Paragraphs shorter than this many characters are not body text.
const MIN_PARAGRAPH_CHARS: usize = 50;

/// A selector plus the attribute to read, or `None` for the element text.
struct Probe {
    selector: Selector,
    attr: Option<&'static str>,
}

fn probes(specs: &[(&str, Option<&'static str>)]) -> Vec<Probe> {
    specs
        .iter()
        .map(|(css, attr)| Probe {
            selector: Selector::parse(css).unwrap(),
            attr: *attr,
        })
        .collect()
}

static TITLE: Lazy<Vec<Probe>> = Lazy::new(|| {
    probes(&[
        ("h1", None),
        ("meta[property='og:title']", Some("content")),
        ("title", None),
    ])
});

static AUTHOR: Lazy<Vec<Probe>> = Lazy::new(|| {
    probes(&[
        ("meta[name='author']", Some("content")),
        ("span.author", None),
        ("[rel='author']", None),
    ])
});

static DATE: Lazy<Vec<Probe>> = Lazy::new(|| {
    probes(&[
        ("time[datetime]", Some("datetime")),
        ("meta[property='article:published_time']", Some("content")),
        ("time", None),
    ])
});

static DESCRIPTION: Lazy<Vec<Probe>> = Lazy::new(|| {
    probes(&[
        ("meta[name='description']", Some("content")),
        ("meta[property='og:description']", Some("content")),
    ])
});

static IMAGE: Lazy<Vec<Probe>> = Lazy::new(|| {
    probes(&[
        ("meta[property='og:image']", Some("content")),
        ("img.featured-image", Some("src")),
        ("div.td-module-thumb img", Some("src")),
        ("img.entry-thumb", Some("src")),
    ])
});

static CONTENT: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["article p", "div.content p", "p"]
        .iter()
        .map(|css| Selector::parse(css).unwrap())
        .collect()
});

fn first_match(doc: &Html, probes: &[Probe]) -> Option<String> {
    for probe in probes {
        for element in doc.select(&probe.selector) {
            let value = match probe.attr {
                Some(attr) => element.value().attr(attr).map(collapse_whitespace),
                None => Some(collapse_whitespace(&element.text().collect::<String>())),
            };
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                return Some(value);
            }
        }
    }
    None
}

fn body_text(doc: &Html) -> String {
    for selector in CONTENT.iter() {
        let paragraphs: Vec<String> = doc
            .select(selector)
            .map(|p| collapse_whitespace(&p.text().collect::<String>()))
            .filter(|p| p.chars().count() > MIN_PARAGRAPH_CHARS)
            .collect();
        if !paragraphs.is_empty() {
            return paragraphs.join(" ");
        }
    }
    String::new()
}

/// Extract a [`Page`] from the HTML served at `url`.
///
/// Fails with [`ScrapeError::NoContent`] when no paragraph of body text is
/// found, since such a page has nothing to summarize.
#[instrument(level = "debug", skip_all, fields(%url))]
pub fn extract_page(html: &str, url: &str) -> Result<Page, ScrapeError> {
    let base = Url::parse(url).map_err(|_| ScrapeError::InvalidUrl(url.to_string()))?;
    let doc = Html::parse_document(html);

    let content = body_text(&doc);
    if content.is_empty() {
        warn!("No body text found");
        return Err(ScrapeError::NoContent(url.to_string()));
    }

    let image_url = first_match(&doc, &IMAGE)
        .and_then(|src| base.join(&src).ok())
        .map(|u| u.to_string());

    let page = Page {
        date: first_match(&doc, &DATE),
        title: first_match(&doc, &TITLE).unwrap_or_else(|| url.to_string()),
        link: url.to_string(),
        description: first_match(&doc, &DESCRIPTION).unwrap_or_default(),
        content,
        author: first_match(&doc, &AUTHOR),
        image_url,
    };
    debug!(title = %page.title, bytes = page.content.len(), "Parsed article");
    Ok(page)
}
