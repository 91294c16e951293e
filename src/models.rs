//! Data models shared across the pipeline.
//!
//! This module defines the records that flow between collaborators:
//! - [`Page`]: an article as scraped from the web
//! - [`SourceItem`]: one unit of work handed to the orchestrator
//! - [`ArticleSummary`] and [`CorpusSynthesis`]: the cached artifacts
//! - [`Filters`], [`TimeUnit`] and [`TimeWindow`]: search settings
//!
//! Field names of the cached artifacts match the JSON already stored in
//! existing cache rows, so old payloads keep deserializing.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// An article as scraped from a web page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Publication date as found in the page, if any.
    pub date: Option<String>,
    pub title: String,
    /// The URL the page was fetched from; identity in the page archive.
    pub link: String,
    pub description: String,
    /// Extracted body text.
    pub content: String,
    pub author: Option<String>,
    /// Absolute URL of the lead image.
    pub image_url: Option<String>,
}

/// One unit of work handed to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceItem {
    /// An article URL to scrape.
    Url {
        url: String,
        /// The keyword whose search produced this URL, if any.
        keyword: Option<String>,
    },
    /// An uploaded file, decoded when scanned.
    Document(Document),
}

/// An uploaded file: its name and raw bytes (text, PDF or DOCX).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub data: Vec<u8>,
}

impl Document {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

impl SourceItem {
    pub fn url(url: impl Into<String>) -> Self {
        SourceItem::Url {
            url: url.into(),
            keyword: None,
        }
    }

    /// Human-readable label used in logs and failure reports.
    pub fn label(&self) -> &str {
        match self {
            SourceItem::Url { url, .. } => url,
            SourceItem::Document(doc) => &doc.name,
        }
    }
}

/// A per-article summary record; the `summaries` payload is a list of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub title: String,
    /// Article URL, or `"#"` for uploaded documents.
    #[serde(alias = "link")]
    pub url: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// The search keyword that surfaced the article.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_source: Option<String>,
}

impl ArticleSummary {
    /// Extract the domain name (before .com/.org/etc) from the article URL.
    /// For example: "https://www.lemonde.fr/article" -> "lemonde"
    pub fn source_tag(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.url).ok()?;
        let host = parsed.host_str()?;
        let parts: Vec<&str> = host.split('.').collect();
        if parts.len() >= 2 {
            return Some(parts[parts.len() - 2].to_string());
        }
        None
    }
}

/// The `synthesis` payload: one text covering a whole corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusSynthesis {
    pub synthesis: String,
    /// Links of the articles that made it into the synthesis.
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Unit of a search time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    #[serde(rename = "mois")]
    Months,
    #[serde(rename = "années", alias = "annees")]
    Years,
}

impl TimeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Months => "mois",
            TimeUnit::Years => "années",
        }
    }

    /// Days counted per unit when turning a window into a date range.
    pub fn days(&self) -> i64 {
        match self {
            TimeUnit::Months => 30,
            TimeUnit::Years => 365,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mois" => Ok(TimeUnit::Months),
            "années" | "annees" => Ok(TimeUnit::Years),
            other => Err(ParseError::UnknownTimeUnit(other.to_string())),
        }
    }
}

/// Largest `time_value` accepted from users (a century in months).
pub const MAX_TIME_VALUE: u32 = 1200;

/// How far back a search looks, e.g. 3 `mois`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    pub unit: TimeUnit,
    pub value: u32,
}

impl TimeWindow {
    pub fn new(unit: TimeUnit, value: u32) -> Self {
        Self { unit, value }
    }

    pub fn days(&self) -> i64 {
        self.unit.days() * i64::from(self.value)
    }

    /// Inclusive `(start, end)` date range ending at `today`.
    ///
    /// A window reaching past the earliest representable date starts there.
    pub fn date_range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let start = Duration::try_days(self.days())
            .and_then(|span| today.checked_sub_signed(span))
            .unwrap_or(NaiveDate::MIN);
        (start, today)
    }
}

/// Search filter settings; a singleton record in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    pub exclude_ads: bool,
    pub exclude_professional: bool,
    pub target_press: bool,
    pub time_unit: TimeUnit,
    pub time_value: u32,
    pub exclude_jobs: bool,
    pub exclude_training: bool,
}

impl Filters {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.time_unit, self.time_value)
    }
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            exclude_ads: false,
            exclude_professional: false,
            target_press: false,
            time_unit: TimeUnit::Months,
            time_value: 1,
            exclude_jobs: false,
            exclude_training: false,
        }
    }
}
