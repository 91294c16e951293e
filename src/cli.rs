//! Command-line interface definitions for `veille`.
//!
//! Global options can also come from the environment (or a `.env` file).
//!
//! ```sh
//! # Serve the cache and catalog API
//! veille serve
//!
//! # Keyword watch over the saved keywords and filters
//! veille keywords
//!
//! # Summaries of explicit articles and local documents, forcing a re-run
//! veille summarize https://www.lemonde.fr/article notes.md --refresh
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::feedback::Vote;
use crate::models::{Filters, MAX_TIME_VALUE, TimeUnit};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML settings file
    #[arg(short, long, env = "VEILLE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database (overrides the settings file)
    #[arg(long, env = "VEILLE_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Use the cache of a remote `veille serve` instead of the local database
    #[arg(long, env = "API_URL", global = true)]
    pub api_url: Option<String>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP API
    Serve {
        /// Listen address (overrides the settings file)
        #[arg(long)]
        bind: Option<std::net::SocketAddr>,
    },

    /// Keyword watch: search, scrape and summarize recent articles
    Keywords {
        /// Keywords to watch; the saved keywords when omitted
        keywords: Vec<String>,

        /// Save the given keywords as the new list
        #[arg(long, requires = "keywords")]
        save: bool,

        #[command(flatten)]
        window: WindowArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Source watch: summarize the latest articles of news sites or feeds
    Sources {
        /// Source URLs; the saved sources when omitted
        sources: Vec<String>,

        /// Save the given sources as the new list
        #[arg(long, requires = "sources")]
        save: bool,

        #[command(flatten)]
        window: WindowArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Summarize articles (URLs) and documents (.txt, .md, .pdf, .docx files)
    Summarize {
        #[arg(required = true)]
        inputs: Vec<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// One synthesis across articles and documents
    Synthesize {
        #[arg(required = true)]
        inputs: Vec<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Ask a question about articles and documents
    Ask {
        question: String,

        #[arg(required = true)]
        inputs: Vec<String>,

        /// Write the Markdown result to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Record a vote on a produced result
    Feedback {
        /// View the result came from, e.g. "keywords"
        #[arg(long)]
        view: String,

        #[arg(long)]
        title: String,

        #[arg(long, default_value = "")]
        content: String,

        /// Article URL(s) the result is about
        #[arg(long)]
        reference: String,

        /// up / down
        #[arg(long)]
        vote: Vote,

        #[arg(long)]
        time_unit: Option<TimeUnit>,
    },

    /// Inspect or write cache entries directly
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Print the payload stored under a fingerprint and kind
    Get { input_hash: String, result_key: String },
    /// Store a payload (a JSON document) under a fingerprint and kind
    Put {
        input_hash: String,
        result_key: String,
        data: String,
    },
}

/// Time window; the saved filters are used for anything not given.
#[derive(Args, Debug, Default)]
pub struct WindowArgs {
    /// mois / années
    #[arg(long)]
    pub time_unit: Option<TimeUnit>,

    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=MAX_TIME_VALUE as i64))]
    pub time_value: Option<u32>,
}

impl WindowArgs {
    /// `saved` with the window given on the command line, if any.
    pub fn over(&self, saved: Filters) -> Filters {
        Filters {
            time_unit: self.time_unit.unwrap_or(saved.time_unit),
            time_value: self.time_value.unwrap_or(saved.time_value),
            ..saved
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Recompute even when a cached result exists, and overwrite it
    #[arg(long)]
    pub refresh: bool,

    /// Write the Markdown result to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Split inputs into article URLs and document paths.
pub fn split_inputs(inputs: &[String]) -> (Vec<String>, Vec<PathBuf>) {
    let (urls, paths): (Vec<&String>, Vec<&String>) = inputs
        .iter()
        .partition(|i| i.starts_with("http://") || i.starts_with("https://"));
    (
        urls.into_iter().cloned().collect(),
        paths.into_iter().map(PathBuf::from).collect(),
    )
}
