//! # veille
//!
//! A news-watch pipeline with an idempotent result cache. Requests (keyword
//! watch, source watch, article lists, corpora) are fingerprinted; a request
//! already answered for a given result kind is served from the cache instead
//! of being scraped and summarized again.
//!
//! ## Modules
//!
//! - [`fingerprint`], [`kind`]: request identity
//! - [`store`], [`gateway`]: cache persistence and the resolve-or-compute boundary
//! - [`scrapers`], [`api`], [`orchestrator`]: collecting, summarizing, workflows
//! - [`catalog`], [`feedback`]: saved sources, keywords, filters and votes
//! - [`server`]: the HTTP API, [`cli`] and [`config`]: the binary's surface

pub mod api;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod feedback;
pub mod fingerprint;
pub mod gateway;
pub mod kind;
pub mod models;
pub mod orchestrator;
pub mod outputs;
pub mod retry;
pub mod scrapers;
pub mod server;
pub mod store;
pub mod utils;

pub use fingerprint::{CanonicalInput, Fingerprint, fingerprint};
pub use gateway::{CacheGateway, CacheWarning, Resolved};
pub use kind::ResultKind;
pub use store::{CacheStore, HttpCacheStore, SqliteCacheStore};
