//! Outputs of the pipeline besides the cache.
//!
//! - [`json`]: the page archive, one JSON document per scraped page
//! - [`markdown`]: rendering of summaries, syntheses and answers

pub mod json;
pub mod markdown;
