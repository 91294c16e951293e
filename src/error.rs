//! Error types for each layer of the pipeline.
//!
//! The cache layer distinguishes a plain miss ([`StoreError::NotFound`]) from
//! a backing store that cannot be reached ([`StoreError::Unavailable`]) so the
//! gateway can fall back to recomputation while still reporting the outage.
//! Everything above the cache degrades per item; only
//! [`WorkflowError::NothingProduced`] is meant to reach the operator as a
//! blocking failure.

use thiserror::Error;

use crate::fingerprint::Fingerprint;
use crate::kind::ResultKind;

/// Failures of a [`CacheStore`](crate::store::CacheStore) operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No entry exists for this `(fingerprint, kind)` pair. Expected on first use.
    #[error("no cached {kind} for {fingerprint}")]
    NotFound {
        fingerprint: Fingerprint,
        kind: ResultKind,
    },

    /// The backing store could not be reached or refused the operation.
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Errors raised while parsing values received at a boundary (HTTP, CLI).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown result kind: {0:?} (expected \"summaries\" or \"synthesis\")")]
    UnknownKind(String),

    #[error("malformed fingerprint {0:?}: expected 32 hex characters")]
    MalformedFingerprint(String),

    #[error("unknown time unit: {0:?}")]
    UnknownTimeUnit(String),

    #[error("unknown vote: {0:?}")]
    UnknownVote(String),
}

/// Failures of the relational side: catalog and feedback tables.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored value is invalid: {0}")]
    Invalid(#[from] ParseError),

    #[error("background task failed: {0}")]
    Join(String),
}

/// Failures talking to the language model.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LLM returned an empty answer")]
    EmptyAnswer,

    #[error("LLM call exhausted {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: String },
}

/// Failures fetching or extracting a single page or document.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("invalid URL {0:?}")]
    InvalidUrl(String),

    #[error("no readable content at {0}")]
    NoContent(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("cannot extract text from {name}: {reason}")]
    Extract { name: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("feed parse error: {0}")]
    Feed(String),

    #[error("search API error: {0}")]
    Search(String),
}

/// Failures of a whole workflow run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Every item of the batch failed; nothing was produced or cached.
    #[error("no {what} could be produced ({failures} item(s) failed)")]
    NothingProduced { what: &'static str, failures: usize },

    #[error("nothing to process: {0}")]
    EmptyInput(&'static str),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Failures loading [`Settings`](crate::config::Settings).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}
