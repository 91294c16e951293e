//! # veille
//!
//! Command-line front end of the news-watch pipeline. Every workflow goes
//! through the result cache: a request already answered is printed straight
//! from the cache, anything else is searched, scraped and summarized, then
//! cached for next time.
//!
//! ```sh
//! veille serve                                   # HTTP API for the cache and catalog
//! veille keywords ai finance --time-value 3      # keyword watch
//! veille summarize https://a.fr/x notes.md -o veille.md
//! ```
//!
//! ## Architecture
//!
//! 1. **Settings**: `.env`, then the YAML file, then the environment and flags
//! 2. **Wiring**: database, cache store (local or remote), fetcher, search, LLM
//! 3. **Workflow**: the orchestrator resolves the request through the cache
//! 4. **Output**: Markdown on stdout or in a file, progress on stderr

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

use veille::api::{AskAsync, OllamaClient, RetryAsk, Summarizer};
use veille::catalog::Catalog;
use veille::cli::{CacheAction, Cli, Command, split_inputs};
use veille::config::Settings;
use veille::db::Database;
use veille::feedback::{FeedbackRecord, FeedbackSink, SqliteFeedbackSink};
use veille::models::Document;
use veille::orchestrator::{Orchestrator, Progress, WorkflowReport};
use veille::outputs::json::PageArchive;
use veille::outputs::markdown;
use veille::scrapers::search::{DEFAULT_ENDPOINT, GoogleSearch};
use veille::scrapers::{ArchivingFetcher, Fetcher, HttpFetcher, documents, http_client};
use veille::server::{self, ApiState};
use veille::utils::ensure_writable_dir;
use veille::{CacheGateway, CacheStore, Fingerprint, HttpCacheStore, ResultKind, SqliteCacheStore};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339());
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env must be loaded before clap reads its env fallbacks.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let start_time = Instant::now();
    info!("veille starting up");
    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Ignoring unreadable .env"),
    }

    let mut settings = Settings::load(cli.config.as_deref())?;
    settings.apply_env(|name| std::env::var(name).ok());
    if let Some(db) = cli.db {
        settings.database = db;
    }
    if let Some(url) = cli.api_url {
        settings.api_url = Some(url);
    }
    debug!(database = %settings.database.display(), api_url = ?settings.api_url, "Settings resolved");

    let result = run(cli.command, &settings).await;
    match &result {
        Ok(()) => info!(elapsed_ms = start_time.elapsed().as_millis(), "veille finished"),
        Err(e) => error!(error = %e, "veille failed"),
    }
    result
}

async fn run(command: Command, settings: &Settings) -> Result<()> {
    let db = Database::open(&settings.database)
        .with_context(|| format!("cannot open database {}", settings.database.display()))?;
    let catalog = Catalog::new(db.clone());

    match command {
        Command::Serve { bind } => {
            let state = ApiState {
                store: Arc::new(SqliteCacheStore::new(db.clone())),
                catalog,
                feedback: Arc::new(SqliteFeedbackSink::new(db)),
            };
            server::serve(bind.unwrap_or(settings.bind), state).await?;
        }
        Command::Feedback {
            view,
            title,
            content,
            reference,
            vote,
            time_unit,
        } => {
            let record = FeedbackRecord {
                timestamp: Utc::now(),
                view,
                time_unit,
                title,
                content,
                reference,
                vote,
            };
            SqliteFeedbackSink::new(db).record(&record).await?;
            info!(view = %record.view, vote = record.vote.as_str(), "Feedback recorded");
        }
        Command::Cache { action } => {
            let store = cache_store(settings, &db)?;
            cache_command(action, store.as_ref()).await?;
        }
        workflow => {
            let store = cache_store(settings, &db)?;
            let client = http_client(settings.scrape.timeout())?;
            let fetcher = HttpFetcher::new(client.clone());
            match &settings.archive_dir {
                Some(dir) => {
                    ensure_writable_dir(dir)
                        .await
                        .with_context(|| format!("archive directory {} is not writable", dir.display()))?;
                    let fetcher = ArchivingFetcher::new(fetcher, PageArchive::new(dir));
                    run_workflow(workflow, settings, &catalog, store, fetcher, client).await?;
                }
                None => run_workflow(workflow, settings, &catalog, store, fetcher, client).await?,
            }
        }
    }
    Ok(())
}

fn cache_store(settings: &Settings, db: &Database) -> Result<Arc<dyn CacheStore>> {
    Ok(match &settings.api_url {
        Some(url) => {
            info!(%url, "Using remote cache");
            Arc::new(HttpCacheStore::new(
                url,
                settings.scrape.api_timeout(),
                settings.scrape.api_retry.clone(),
            )?)
        }
        None => Arc::new(SqliteCacheStore::new(db.clone())),
    })
}

async fn cache_command(action: CacheAction, store: &dyn CacheStore) -> Result<()> {
    match action {
        CacheAction::Get { input_hash, result_key } => {
            let fingerprint: Fingerprint = input_hash.parse()?;
            let kind: ResultKind = result_key.parse()?;
            let data = store.get(fingerprint, kind).await?;
            println!("{data}");
        }
        CacheAction::Put {
            input_hash,
            result_key,
            data,
        } => {
            let fingerprint: Fingerprint = input_hash.parse()?;
            let kind: ResultKind = result_key.parse()?;
            serde_json::from_str::<serde_json::Value>(&data).context("payload is not valid JSON")?;
            store.put(fingerprint, kind, &data).await?;
            info!(%fingerprint, %kind, "Cache entry stored");
        }
    }
    Ok(())
}

#[instrument(level = "debug", skip_all)]
async fn run_workflow<F: Fetcher>(
    command: Command,
    settings: &Settings,
    catalog: &Catalog,
    store: Arc<dyn CacheStore>,
    fetcher: F,
    client: reqwest::Client,
) -> Result<()> {
    let search = GoogleSearch::with_endpoint(
        client,
        settings.search.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT),
        settings.search.api_key.as_deref().unwrap_or_default(),
        settings.search.engine_id.as_deref().unwrap_or_default(),
    );
    let llm = RetryAsk::new(
        OllamaClient::new(&settings.llm.base_url, &settings.llm.model, settings.llm.timeout())?,
        settings.llm.retry.clone(),
    );
    let gateway = if settings.single_flight {
        CacheGateway::new(store)
    } else {
        CacheGateway::without_single_flight(store)
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(print_progress(rx));
    let orchestrator = Orchestrator::new(
        fetcher,
        search,
        Summarizer::new(llm),
        gateway,
        settings.orchestrator.clone(),
    )
    .with_progress(tx);

    let result = dispatch(command, settings, catalog, &orchestrator).await;
    // Closes the progress channel.
    drop(orchestrator);
    let _ = progress.await;

    let (md, output) = result?;
    write_output(&md, output.as_deref()).await
}

async fn dispatch<F: Fetcher, A: AskAsync>(
    command: Command,
    settings: &Settings,
    catalog: &Catalog,
    orchestrator: &Orchestrator<F, GoogleSearch, A>,
) -> Result<(String, Option<PathBuf>)> {
    Ok(match command {
        Command::Keywords {
            keywords,
            save,
            window,
            run,
        } => {
            if settings.search.api_key.is_none() || settings.search.engine_id.is_none() {
                bail!("keyword watch needs GOOGLE_API_KEY and GOOGLE_CX");
            }
            let keywords = if keywords.is_empty() {
                catalog.keywords().await?
            } else {
                if save {
                    let count = catalog.replace_keywords(&keywords).await?;
                    info!(count, "Keywords saved");
                }
                keywords
            };
            let filters = window.over(catalog.filters().await?);
            let report = orchestrator.keyword_watch(&keywords, &filters, run.refresh).await?;
            let heading = format!("Veille par mots-clés ({} {})", filters.time_value, filters.time_unit.as_str());
            (render(markdown::summaries_to_markdown(&heading, &report.value), &report), run.output)
        }
        Command::Sources {
            sources,
            save,
            window,
            run,
        } => {
            let sources = if sources.is_empty() {
                catalog.sources().await?
            } else {
                if save {
                    let count = catalog.replace_sources(&sources).await?;
                    info!(count, "Sources saved");
                }
                sources
            };
            let filters = window.over(catalog.filters().await?);
            let report = orchestrator.source_watch(&sources, filters.window(), run.refresh).await?;
            (render(markdown::summaries_to_markdown("Veille des sources", &report.value), &report), run.output)
        }
        Command::Summarize { inputs, run } => {
            let (urls, docs) = load_inputs(&inputs).await?;
            let report = orchestrator.summarize_articles(&urls, docs, run.refresh).await?;
            (render(markdown::summaries_to_markdown("Résumés", &report.value), &report), run.output)
        }
        Command::Synthesize { inputs, run } => {
            let (urls, docs) = load_inputs(&inputs).await?;
            let report = orchestrator.synthesize_corpus(&urls, docs, run.refresh).await?;
            (render(markdown::synthesis_to_markdown(&report.value), &report), run.output)
        }
        Command::Ask {
            question,
            inputs,
            output,
        } => {
            let (urls, docs) = load_inputs(&inputs).await?;
            let report = orchestrator.ask_corpus(&question, &urls, docs).await?;
            (render(markdown::answer_to_markdown(&question, &report.value), &report), output)
        }
        Command::Serve { .. } | Command::Feedback { .. } | Command::Cache { .. } => {
            bail!("not a workflow command")
        }
    })
}

/// URLs as given, documents read from disk.
async fn load_inputs(inputs: &[String]) -> Result<(Vec<String>, Vec<Document>)> {
    let (urls, paths) = split_inputs(inputs);
    let mut docs = Vec::with_capacity(paths.len());
    for path in &paths {
        let doc = documents::read_document(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        docs.push(doc);
    }
    Ok((urls, docs))
}

fn render<T>(body: String, report: &WorkflowReport<T>) -> String {
    if report.was_cached {
        info!(fingerprint = ?report.fingerprint, "Served from cache");
    }
    for warning in &report.warnings {
        warn!(%warning, "Cache warning");
    }
    let mut md = body;
    let failures = markdown::failures_to_markdown(&report.failures);
    if !failures.is_empty() {
        md.push('\n');
        md.push_str(&failures);
    }
    md
}

async fn write_output(md: &str, output: Option<&Path>) -> Result<()> {
    let Some(path) = output else {
        print!("{md}");
        return Ok(());
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        ensure_writable_dir(dir)
            .await
            .with_context(|| format!("output directory {} is not writable", dir.display()))?;
    }
    tokio::fs::write(path, md)
        .await
        .with_context(|| format!("failed writing {}", path.display()))?;
    info!(path = %path.display(), "Wrote Markdown");
    Ok(())
}

async fn print_progress(mut rx: UnboundedReceiver<Progress>) {
    while let Some(event) = rx.recv().await {
        match event {
            Progress::Discovered { origin, links } => eprintln!("{origin}: {links} link(s)"),
            Progress::Scraped {
                collected, cap, label, ..
            } if cap != usize::MAX => eprintln!("[{collected}/{cap}] {label}"),
            Progress::Scraped { collected, label, .. } => eprintln!("[{collected}] {label}"),
            Progress::Failed(f) => eprintln!("  skipped {}: {}", f.label, f.reason),
            Progress::Summarized { done, total } => eprintln!("summaries: {done}/{total}"),
            Progress::Cached { fingerprint, kind } => eprintln!("{kind} served from cache ({fingerprint})"),
        }
    }
}
