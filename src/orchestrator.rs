//! Workflows: collect source items, scrape them under a cap, summarize, cache.
//!
//! Each workflow takes an explicit request and returns a [`WorkflowReport`].
//! The cache gateway decides whether any work happens at all; on a miss the
//! pipeline runs in three steps:
//!
//! 1. **Discovery**: keyword search or source indexing turns the request
//!    into [`SourceItem`]s (explicit URLs and documents skip this)
//! 2. **Scan**: items are scraped lazily, in order, until `cap` pages
//!    succeeded ([`Orchestrator::scan`])
//! 3. **Summarize**: pages go through the LLM `concurrency` at a time, and
//!    results come back in input order
//!
//! Individual failures are collected as [`ItemFailure`]s and never abort the
//! batch. A batch where nothing succeeded is a
//! [`WorkflowError::NothingProduced`] and is not cached.

use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};

use crate::api::{AskAsync, Summarizer};
use crate::catalog::{clean_entries, indexed_entries};
use crate::error::{ScrapeError, WorkflowError};
use crate::fingerprint::{CanonicalInput, Fingerprint};
use crate::gateway::{CacheGateway, CacheWarning, Resolved};
use crate::kind::ResultKind;
use crate::models::{ArticleSummary, CorpusSynthesis, Document, Filters, Page, SourceItem, TimeWindow};
use crate::scrapers::{Fetcher, Searcher, documents};

pub const DEFAULT_CAP: usize = 12;
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_LINKS_PER_SOURCE: usize = 10;
pub const DEFAULT_SEARCH_RESULTS: usize = 10;

/// Where in the pipeline an item was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Search,
    Index,
    Scrape,
    Unsupported,
    Summarize,
}

/// One item excluded from a batch.
///
/// `position` is the index in the input of the failing stage: the caller's
/// keyword or source list for `Search`/`Index` (blank entries included), the
/// item list (URLs, then documents) otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub position: usize,
    pub label: String,
    pub stage: FailureStage,
    pub reason: String,
}

impl ItemFailure {
    fn new(position: usize, label: impl Into<String>, stage: FailureStage, reason: impl ToString) -> Self {
        Self {
            position,
            label: label.into(),
            stage,
            reason: reason.to_string(),
        }
    }

    fn scrape(position: usize, label: String, err: &ScrapeError) -> Self {
        let stage = match err {
            ScrapeError::UnsupportedFileType(_) => FailureStage::Unsupported,
            _ => FailureStage::Scrape,
        };
        Self::new(position, label, stage, err)
    }
}

/// Incremental progress, for callers that want more than the final report.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// `links` article links came out of a keyword search or a source.
    Discovered { origin: String, links: usize },
    Scraped { position: usize, label: String, collected: usize, cap: usize },
    Failed(ItemFailure),
    Summarized { done: usize, total: usize },
    /// The result was served from the cache; nothing was scraped.
    Cached { fingerprint: Fingerprint, kind: ResultKind },
}

/// One step of a scan.
#[derive(Debug)]
pub enum ScanOutcome {
    Scraped {
        position: usize,
        page: Page,
        keyword: Option<String>,
    },
    Failed(ItemFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Successful scrapes kept from discovered links.
    pub cap: usize,
    /// Summaries requested from the LLM at once.
    pub concurrency: usize,
    pub links_per_source: usize,
    pub search_results: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cap: DEFAULT_CAP,
            concurrency: DEFAULT_CONCURRENCY,
            links_per_source: DEFAULT_LINKS_PER_SOURCE,
            search_results: DEFAULT_SEARCH_RESULTS,
        }
    }
}

/// What a workflow produced, plus everything that went wrong on the way.
#[derive(Debug)]
pub struct WorkflowReport<T> {
    pub value: T,
    pub was_cached: bool,
    /// `None` for uncached workflows (corpus questions).
    pub fingerprint: Option<Fingerprint>,
    pub failures: Vec<ItemFailure>,
    pub warnings: Vec<CacheWarning>,
}

impl<T> WorkflowReport<T> {
    fn from_resolved(resolved: Resolved<T>, failures: Vec<ItemFailure>) -> Self {
        Self {
            value: resolved.value,
            was_cached: resolved.was_cached,
            fingerprint: Some(resolved.fingerprint),
            failures,
            warnings: resolved.warnings,
        }
    }
}

type Scanned = (usize, Page, Option<String>);

pub struct Orchestrator<F, S, A> {
    fetcher: F,
    searcher: S,
    summarizer: Summarizer<A>,
    gateway: CacheGateway,
    config: OrchestratorConfig,
    progress: Option<UnboundedSender<Progress>>,
}

impl<F: Fetcher, S: Searcher, A: AskAsync> Orchestrator<F, S, A> {
    pub fn new(
        fetcher: F,
        searcher: S,
        summarizer: Summarizer<A>,
        gateway: CacheGateway,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            fetcher,
            searcher,
            summarizer,
            gateway,
            config,
            progress: None,
        }
    }

    /// Send [`Progress`] events to `tx` as work advances.
    pub fn with_progress(mut self, tx: UnboundedSender<Progress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn emit(&self, event: Progress) {
        if let Some(tx) = &self.progress {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(event);
        }
    }

    /// Summaries of the articles found for `keywords` within the filters'
    /// time window.
    #[instrument(level = "info", skip_all, fields(keywords = keywords.len(), refresh))]
    pub async fn keyword_watch(
        &self,
        keywords: &[String],
        filters: &Filters,
        refresh: bool,
    ) -> Result<WorkflowReport<Vec<ArticleSummary>>, WorkflowError> {
        let keywords = indexed_entries(keywords);
        if keywords.is_empty() {
            return Err(WorkflowError::EmptyInput("keywords"));
        }
        let cleaned: Vec<String> = keywords.iter().map(|(_, k)| k.clone()).collect();
        let input = CanonicalInput::keyword_watch(&cleaned, filters);

        let mut failures = Vec::new();
        let sink = &mut failures;
        let keywords = &keywords;
        let resolved = self
            .resolve(&input, ResultKind::Summaries, refresh, move || async move {
                let items = self.search_keywords(keywords, filters, sink).await;
                self.summaries_of(items, self.config.cap, sink).await
            })
            .await?;
        Ok(WorkflowReport::from_resolved(resolved, failures))
    }

    /// Summaries of the latest articles linked from `sources`.
    ///
    /// The window is part of the request identity; source pages and feeds
    /// are not date-filtered.
    #[instrument(level = "info", skip_all, fields(sources = sources.len(), refresh))]
    pub async fn source_watch(
        &self,
        sources: &[String],
        window: TimeWindow,
        refresh: bool,
    ) -> Result<WorkflowReport<Vec<ArticleSummary>>, WorkflowError> {
        let sources = indexed_entries(sources);
        if sources.is_empty() {
            return Err(WorkflowError::EmptyInput("sources"));
        }
        let cleaned: Vec<String> = sources.iter().map(|(_, s)| s.clone()).collect();
        let input = CanonicalInput::source_watch(&cleaned, window);

        let mut failures = Vec::new();
        let sink = &mut failures;
        let sources = &sources;
        let resolved = self
            .resolve(&input, ResultKind::Summaries, refresh, move || async move {
                let items = self.index_sources(sources, sink).await;
                self.summaries_of(items, self.config.cap, sink).await
            })
            .await?;
        Ok(WorkflowReport::from_resolved(resolved, failures))
    }

    /// Summaries of explicitly chosen articles and uploaded documents.
    ///
    /// Every item is processed; the cap only bounds discovered links.
    #[instrument(level = "info", skip_all, fields(urls = urls.len(), documents = documents.len(), refresh))]
    pub async fn summarize_articles(
        &self,
        urls: &[String],
        documents: Vec<Document>,
        refresh: bool,
    ) -> Result<WorkflowReport<Vec<ArticleSummary>>, WorkflowError> {
        let (input, items) = explicit_request(urls, documents, CanonicalInput::article_urls)?;

        let mut failures = Vec::new();
        let sink = &mut failures;
        let resolved = self
            .resolve(&input, ResultKind::Summaries, refresh, move || async move {
                self.summaries_of(items, usize::MAX, sink).await
            })
            .await?;
        Ok(WorkflowReport::from_resolved(resolved, failures))
    }

    /// One synthesis across a corpus of articles and documents.
    #[instrument(level = "info", skip_all, fields(urls = urls.len(), documents = documents.len(), refresh))]
    pub async fn synthesize_corpus(
        &self,
        urls: &[String],
        documents: Vec<Document>,
        refresh: bool,
    ) -> Result<WorkflowReport<CorpusSynthesis>, WorkflowError> {
        let (input, items) = explicit_request(urls, documents, CanonicalInput::corpus)?;

        let mut failures = Vec::new();
        let sink = &mut failures;
        let resolved = self
            .resolve(&input, ResultKind::Synthesis, refresh, move || async move {
                let pages = self.corpus_pages(items, "synthesis", sink).await?;
                let synthesis = self.summarizer.synthesize(&pages).await?;
                Ok::<_, WorkflowError>(CorpusSynthesis {
                    synthesis,
                    sources: pages.iter().map(page_reference).collect(),
                })
            })
            .await?;
        Ok(WorkflowReport::from_resolved(resolved, failures))
    }

    /// Answer `question` from a corpus. Answers are not cached.
    #[instrument(level = "info", skip_all, fields(urls = urls.len(), documents = documents.len()))]
    pub async fn ask_corpus(
        &self,
        question: &str,
        urls: &[String],
        documents: Vec<Document>,
    ) -> Result<WorkflowReport<String>, WorkflowError> {
        if question.trim().is_empty() {
            return Err(WorkflowError::EmptyInput("question"));
        }
        let (_, items) = explicit_request(urls, documents, CanonicalInput::corpus)?;

        let mut failures = Vec::new();
        let pages = self.corpus_pages(items, "answer", &mut failures).await?;
        let answer = self.summarizer.answer(question.trim(), &pages).await?;
        Ok(WorkflowReport {
            value: answer,
            was_cached: false,
            fingerprint: None,
            failures,
            warnings: Vec::new(),
        })
    }

    /// Lazily scrape `items` in order until `cap` of them succeeded.
    ///
    /// Failed items are yielded too and do not count towards the cap. Items
    /// after the cap is reached are never touched.
    pub fn scan(&self, items: Vec<SourceItem>, cap: usize) -> impl Stream<Item = ScanOutcome> + '_ {
        stream::unfold((items.into_iter().enumerate(), 0usize), move |(mut pending, collected)| async move {
            if collected >= cap {
                return None;
            }
            let (position, item) = pending.next()?;
            let outcome = self.scrape_item(position, item, collected, cap).await;
            let collected = match outcome {
                ScanOutcome::Scraped { .. } => collected + 1,
                ScanOutcome::Failed(_) => collected,
            };
            Some((outcome, (pending, collected)))
        })
    }

    async fn scrape_item(&self, position: usize, item: SourceItem, collected: usize, cap: usize) -> ScanOutcome {
        let label = item.label().to_string();
        let (result, keyword) = match item {
            SourceItem::Url { url, keyword } => (self.fetcher.fetch_page(&url).await, keyword),
            SourceItem::Document(doc) => (documents::decode(doc).await, None),
        };
        match result {
            Ok(page) => {
                debug!(position, %label, "Item scraped");
                self.emit(Progress::Scraped {
                    position,
                    label,
                    collected: collected + 1,
                    cap,
                });
                ScanOutcome::Scraped { position, page, keyword }
            }
            Err(e) => {
                warn!(position, %label, error = %e, "Skipping item");
                let failure = ItemFailure::scrape(position, label, &e);
                self.emit(Progress::Failed(failure.clone()));
                ScanOutcome::Failed(failure)
            }
        }
    }

    async fn search_keywords(
        &self,
        keywords: &[(usize, String)],
        filters: &Filters,
        failures: &mut Vec<ItemFailure>,
    ) -> Vec<SourceItem> {
        let mut items = Vec::new();
        for (position, keyword) in keywords {
            let position = *position;
            match self.searcher.search(keyword, filters, self.config.search_results).await {
                Ok(links) => {
                    info!(%keyword, count = links.len(), "Keyword searched");
                    self.emit(Progress::Discovered {
                        origin: keyword.clone(),
                        links: links.len(),
                    });
                    items.extend(links.into_iter().map(|url| SourceItem::Url {
                        url,
                        keyword: Some(keyword.clone()),
                    }));
                }
                Err(e) => {
                    warn!(%keyword, error = %e, "Search failed");
                    self.fail(failures, ItemFailure::new(position, keyword.as_str(), FailureStage::Search, e));
                }
            }
        }
        items
    }

    async fn index_sources(&self, sources: &[(usize, String)], failures: &mut Vec<ItemFailure>) -> Vec<SourceItem> {
        let mut items = Vec::new();
        for (position, source) in sources {
            let position = *position;
            match self.fetcher.index_links(source, self.config.links_per_source).await {
                Ok(links) => {
                    info!(%source, count = links.len(), "Source indexed");
                    self.emit(Progress::Discovered {
                        origin: source.clone(),
                        links: links.len(),
                    });
                    items.extend(links.into_iter().map(SourceItem::url));
                }
                Err(e) => {
                    warn!(%source, error = %e, "Indexing failed");
                    self.fail(failures, ItemFailure::new(position, source.as_str(), FailureStage::Index, e));
                }
            }
        }
        items
    }

    fn fail(&self, failures: &mut Vec<ItemFailure>, failure: ItemFailure) {
        self.emit(Progress::Failed(failure.clone()));
        failures.push(failure);
    }

    async fn collect_pages(
        &self,
        items: Vec<SourceItem>,
        cap: usize,
        failures: &mut Vec<ItemFailure>,
    ) -> Vec<Scanned> {
        let mut pages = Vec::new();
        let mut scan = std::pin::pin!(self.scan(items, cap));
        while let Some(outcome) = scan.next().await {
            match outcome {
                ScanOutcome::Scraped { position, page, keyword } => pages.push((position, page, keyword)),
                ScanOutcome::Failed(failure) => failures.push(failure),
            }
        }
        pages
    }

    async fn corpus_pages(
        &self,
        items: Vec<SourceItem>,
        what: &'static str,
        failures: &mut Vec<ItemFailure>,
    ) -> Result<Vec<Page>, WorkflowError> {
        let pages: Vec<Page> = self
            .collect_pages(items, usize::MAX, failures)
            .await
            .into_iter()
            .map(|(_, page, _)| page)
            .collect();
        if pages.is_empty() {
            return Err(WorkflowError::NothingProduced {
                what,
                failures: failures.len(),
            });
        }
        Ok(pages)
    }

    async fn summaries_of(
        &self,
        items: Vec<SourceItem>,
        cap: usize,
        failures: &mut Vec<ItemFailure>,
    ) -> Result<Vec<ArticleSummary>, WorkflowError> {
        let pages = self.collect_pages(items, cap, failures).await;
        let summaries = if pages.is_empty() {
            Vec::new()
        } else {
            self.summarize_pages(pages, failures).await
        };
        if summaries.is_empty() {
            return Err(WorkflowError::NothingProduced {
                what: "summaries",
                failures: failures.len(),
            });
        }
        Ok(summaries)
    }

    async fn summarize_pages(&self, pages: Vec<Scanned>, failures: &mut Vec<ItemFailure>) -> Vec<ArticleSummary> {
        let total = pages.len();
        let done = AtomicUsize::new(0);
        let done = &done;
        info!(total, concurrency = self.config.concurrency, "Summarizing pages");

        let results: Vec<_> = stream::iter(pages)
            .map(|(position, page, keyword)| async move {
                let result = self.summarizer.summarize(&page).await;
                self.emit(Progress::Summarized {
                    done: done.fetch_add(1, Ordering::Relaxed) + 1,
                    total,
                });
                (position, page, keyword, result)
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut summaries = Vec::with_capacity(total);
        for (position, page, keyword, result) in results {
            match result {
                Ok(summary) => summaries.push(ArticleSummary {
                    title: page.title,
                    url: page.link,
                    summary,
                    image_url: page.image_url,
                    keyword_source: keyword,
                }),
                Err(e) => {
                    warn!(position, link = %page.link, error = %e, "Summary failed; skipping article");
                    self.fail(
                        failures,
                        ItemFailure::new(position, page_reference(&page), FailureStage::Summarize, e),
                    );
                }
            }
        }
        info!(total, successful = summaries.len(), "Summaries done");
        summaries
    }

    async fn resolve<T, C, Fut>(
        &self,
        input: &CanonicalInput,
        kind: ResultKind,
        refresh: bool,
        compute: C,
    ) -> Result<Resolved<T>, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        C: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, WorkflowError>>,
    {
        let resolved = if refresh {
            self.gateway.refresh(input, kind, compute).await?
        } else {
            self.gateway.resolve_or_compute(input, kind, compute).await?
        };
        if resolved.was_cached {
            self.emit(Progress::Cached {
                fingerprint: resolved.fingerprint,
                kind,
            });
        }
        for warning in &resolved.warnings {
            warn!(fingerprint = %resolved.fingerprint, %kind, %warning, "Cache degraded");
        }
        Ok(resolved)
    }
}

/// Canonical input and work items for an explicit list of URLs and documents.
fn explicit_request(
    urls: &[String],
    documents: Vec<Document>,
    canonical: fn(&[String], &[Document]) -> CanonicalInput,
) -> Result<(CanonicalInput, Vec<SourceItem>), WorkflowError> {
    let urls = clean_entries(urls);
    if urls.is_empty() && documents.is_empty() {
        return Err(WorkflowError::EmptyInput("articles"));
    }
    let input = canonical(&urls, &documents);
    let items = urls
        .into_iter()
        .map(SourceItem::url)
        .chain(documents.into_iter().map(SourceItem::Document))
        .collect();
    Ok((input, items))
}

/// The link of a page, or its title for uploaded documents.
fn page_reference(page: &Page) -> String {
    if page.link == "#" {
        page.title.clone()
    } else {
        page.link.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Prompt;
    use crate::db::Database;
    use crate::error::LlmError;
    use crate::models::TimeUnit;
    use crate::store::{CacheStore, SqliteCacheStore};
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeWeb {
        broken: HashSet<String>,
        sources: HashMap<String, Vec<String>>,
        fetched: Mutex<Vec<String>>,
    }

    impl Fetcher for Arc<FakeWeb> {
        async fn fetch_page(&self, url: &str) -> Result<Page, ScrapeError> {
            self.fetched.lock().push(url.to_string());
            if self.broken.contains(url) {
                return Err(ScrapeError::Status {
                    url: url.to_string(),
                    status: 404,
                });
            }
            Ok(Page {
                date: None,
                title: format!("Titre {url}"),
                link: url.to_string(),
                description: String::new(),
                content: format!("Contenu de {url}"),
                author: None,
                image_url: None,
            })
        }

        async fn index_links(&self, source: &str, limit: usize) -> Result<Vec<String>, ScrapeError> {
            match self.sources.get(source) {
                Some(links) => Ok(links.iter().take(limit).cloned().collect()),
                None => Err(ScrapeError::Status {
                    url: source.to_string(),
                    status: 503,
                }),
            }
        }
    }

    #[derive(Default)]
    struct FakeSearch {
        results: HashMap<String, Vec<String>>,
        calls: AtomicUsize,
    }

    impl Searcher for Arc<FakeSearch> {
        async fn search(&self, keyword: &str, _filters: &Filters, num: usize) -> Result<Vec<String>, ScrapeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.results.get(keyword) {
                Some(links) => Ok(links.iter().take(num).cloned().collect()),
                None => Err(ScrapeError::Search("quota exceeded".to_string())),
            }
        }
    }

    /// Echoes the prompt; fails on "ÉCHEC", answers slowly on "lent".
    #[derive(Default)]
    struct EchoLlm {
        calls: AtomicUsize,
    }

    impl AskAsync for Arc<EchoLlm> {
        async fn ask(&self, prompt: &Prompt) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if prompt.user.contains("ÉCHEC") {
                return Err(LlmError::EmptyAnswer);
            }
            if prompt.user.contains("lent") {
                tokio::time::sleep(Duration::from_millis(40)).await;
            }
            Ok(format!("Résumé ({} caractères)", prompt.user.len()))
        }
    }

    struct Harness {
        web: Arc<FakeWeb>,
        search: Arc<FakeSearch>,
        llm: Arc<EchoLlm>,
        store: SqliteCacheStore,
        orchestrator: Orchestrator<Arc<FakeWeb>, Arc<FakeSearch>, Arc<EchoLlm>>,
    }

    fn harness(web: FakeWeb, search: FakeSearch, config: OrchestratorConfig) -> Harness {
        let web = Arc::new(web);
        let search = Arc::new(search);
        let llm = Arc::new(EchoLlm::default());
        let store = SqliteCacheStore::new(Database::open_in_memory().unwrap());
        let gateway = CacheGateway::new(Arc::new(store.clone()));
        let orchestrator = Orchestrator::new(
            web.clone(),
            search.clone(),
            Summarizer::new(llm.clone()),
            gateway,
            config,
        );
        Harness {
            web,
            search,
            llm,
            store,
            orchestrator,
        }
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://presse.fr/{i}")).collect()
    }

    fn doc(name: &str, content: &str) -> Document {
        Document::new(name, content.as_bytes())
    }

    #[tokio::test]
    async fn test_scan_stops_at_cap() {
        let all = urls(20);
        let web = FakeWeb {
            broken: [all[3].clone(), all[7].clone()].into(),
            ..FakeWeb::default()
        };
        let h = harness(web, FakeSearch::default(), OrchestratorConfig::default());

        let items = all.iter().cloned().map(SourceItem::url).collect();
        let outcomes: Vec<ScanOutcome> = h.orchestrator.scan(items, DEFAULT_CAP).collect().await;

        assert_eq!(outcomes.len(), 14);
        let scraped = outcomes
            .iter()
            .filter(|o| matches!(o, ScanOutcome::Scraped { .. }))
            .count();
        assert_eq!(scraped, 12);
        let failed: Vec<usize> = outcomes
            .iter()
            .filter_map(|o| match o {
                ScanOutcome::Failed(f) => Some(f.position),
                _ => None,
            })
            .collect();
        assert_eq!(failed, vec![3, 7]);
        // Nothing beyond position 13 was fetched.
        assert_eq!(h.web.fetched.lock().len(), 14);
        assert_eq!(h.web.fetched.lock().last(), Some(&all[13]));
    }

    #[tokio::test]
    async fn test_keyword_watch_is_cached() {
        let search = FakeSearch {
            results: [
                ("ai".to_string(), urls(3)),
                ("finance".to_string(), vec!["https://bourse.fr/a".to_string()]),
            ]
            .into(),
            ..FakeSearch::default()
        };
        let h = harness(FakeWeb::default(), search, OrchestratorConfig::default());
        let keywords = vec!["ai".to_string(), "finance".to_string()];
        let filters = Filters {
            time_unit: TimeUnit::Months,
            time_value: 3,
            ..Filters::default()
        };

        let first = h.orchestrator.keyword_watch(&keywords, &filters, false).await.unwrap();
        assert!(!first.was_cached);
        assert_eq!(first.value.len(), 4);
        assert_eq!(first.value[3].keyword_source.as_deref(), Some("finance"));
        assert!(first.failures.is_empty());
        let llm_calls = h.llm.calls.load(Ordering::SeqCst);

        let second = h.orchestrator.keyword_watch(&keywords, &filters, false).await.unwrap();
        assert!(second.was_cached);
        assert_eq!(second.value, first.value);
        assert_eq!(second.fingerprint, first.fingerprint);
        assert_eq!(h.search.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.llm.calls.load(Ordering::SeqCst), llm_calls);
        assert_eq!(h.store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_keyword_search_failure_is_reported() {
        let search = FakeSearch {
            results: [("ai".to_string(), urls(2))].into(),
            ..FakeSearch::default()
        };
        let h = harness(FakeWeb::default(), search, OrchestratorConfig::default());
        let keywords = vec!["ai".to_string(), " ".to_string(), "bourse".to_string()];

        let report = h
            .orchestrator
            .keyword_watch(&keywords, &Filters::default(), false)
            .await
            .unwrap();
        assert_eq!(report.value.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, FailureStage::Search);
        assert_eq!(report.failures[0].label, "bourse");
        // Positions refer to the list as given, blanks included.
        assert_eq!(report.failures[0].position, 2);
    }

    #[tokio::test]
    async fn test_query_flags_are_part_of_the_request() {
        let search = FakeSearch {
            results: [("ai".to_string(), urls(2))].into(),
            ..FakeSearch::default()
        };
        let h = harness(FakeWeb::default(), search, OrchestratorConfig::default());
        let keywords = vec!["ai".to_string()];
        let plain = Filters::default();
        let no_ads = Filters {
            exclude_ads: true,
            ..Filters::default()
        };

        let first = h.orchestrator.keyword_watch(&keywords, &plain, false).await.unwrap();
        let filtered = h.orchestrator.keyword_watch(&keywords, &no_ads, false).await.unwrap();
        assert!(!filtered.was_cached);
        assert_ne!(filtered.fingerprint, first.fingerprint);
        assert_eq!(h.search.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.store.len().await.unwrap(), 2);

        let again = h.orchestrator.keyword_watch(&keywords, &no_ads, false).await.unwrap();
        assert!(again.was_cached);
        assert_eq!(h.search.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_keywords() {
        let h = harness(FakeWeb::default(), FakeSearch::default(), OrchestratorConfig::default());
        let err = h
            .orchestrator
            .keyword_watch(&[" ".to_string()], &Filters::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::EmptyInput("keywords")));
    }

    #[tokio::test]
    async fn test_summaries_keep_input_order() {
        let h = harness(
            FakeWeb::default(),
            FakeSearch::default(),
            OrchestratorConfig {
                concurrency: 4,
                ..OrchestratorConfig::default()
            },
        );
        // The first article answers slowest.
        let list = vec![
            "https://presse.fr/lent".to_string(),
            "https://presse.fr/b".to_string(),
            "https://presse.fr/c".to_string(),
        ];

        let report = h.orchestrator.summarize_articles(&list, Vec::new(), false).await.unwrap();
        let got: Vec<&str> = report.value.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(got, list.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_explicit_lists_ignore_cap() {
        let h = harness(
            FakeWeb::default(),
            FakeSearch::default(),
            OrchestratorConfig {
                cap: 2,
                ..OrchestratorConfig::default()
            },
        );
        let report = h.orchestrator.summarize_articles(&urls(5), Vec::new(), false).await.unwrap();
        assert_eq!(report.value.len(), 5);
    }

    #[tokio::test]
    async fn test_documents_and_failures() {
        let h = harness(FakeWeb::default(), FakeSearch::default(), OrchestratorConfig::default());
        let documents = vec![
            doc("notes.md", "Des notes sur le marché."),
            doc("scan.odt", "PK"),
            doc("échec.txt", "ÉCHEC garanti"),
        ];

        let report = h
            .orchestrator
            .summarize_articles(&[], documents, false)
            .await
            .unwrap();
        assert_eq!(report.value.len(), 1);
        assert_eq!(report.value[0].url, "#");
        assert_eq!(report.value[0].title, "notes.md");

        let stages: Vec<(usize, FailureStage)> = report.failures.iter().map(|f| (f.position, f.stage)).collect();
        assert_eq!(stages, vec![(1, FailureStage::Unsupported), (2, FailureStage::Summarize)]);
        assert_eq!(report.failures[1].label, "échec.txt");
    }

    #[tokio::test]
    async fn test_changed_document_is_a_new_request() {
        let h = harness(FakeWeb::default(), FakeSearch::default(), OrchestratorConfig::default());

        let first = h
            .orchestrator
            .summarize_articles(&[], vec![doc("notes.md", "Première version.")], false)
            .await
            .unwrap();
        let edited = h
            .orchestrator
            .summarize_articles(&[], vec![doc("notes.md", "Version corrigée, plus longue.")], false)
            .await
            .unwrap();
        assert!(!edited.was_cached);
        assert_ne!(edited.value, first.value);
        assert_eq!(h.llm.calls.load(Ordering::SeqCst), 2);

        let unchanged = h
            .orchestrator
            .summarize_articles(&[], vec![doc("notes.md", "Première version.")], false)
            .await
            .unwrap();
        assert!(unchanged.was_cached);
        assert_eq!(unchanged.value, first.value);
    }

    #[tokio::test]
    async fn test_nothing_produced_is_not_cached() {
        let list = urls(2);
        let web = FakeWeb {
            broken: list.iter().cloned().collect(),
            ..FakeWeb::default()
        };
        let h = harness(web, FakeSearch::default(), OrchestratorConfig::default());

        let err = h.orchestrator.summarize_articles(&list, Vec::new(), false).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::NothingProduced {
                what: "summaries",
                failures: 2
            }
        ));
        assert_eq!(h.store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refresh_recomputes() {
        let h = harness(FakeWeb::default(), FakeSearch::default(), OrchestratorConfig::default());
        let list = urls(2);

        h.orchestrator.summarize_articles(&list, Vec::new(), false).await.unwrap();
        let refreshed = h.orchestrator.summarize_articles(&list, Vec::new(), true).await.unwrap();
        assert!(!refreshed.was_cached);
        assert_eq!(h.llm.calls.load(Ordering::SeqCst), 4);
        assert_eq!(h.store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_source_watch_reports_index_failures() {
        let web = FakeWeb {
            sources: [("https://lemonde.fr".to_string(), urls(15))].into(),
            ..FakeWeb::default()
        };
        let h = harness(
            web,
            FakeSearch::default(),
            OrchestratorConfig {
                links_per_source: 5,
                ..OrchestratorConfig::default()
            },
        );
        let sources = vec![
            "https://lemonde.fr".to_string(),
            "".to_string(),
            "https://down.fr".to_string(),
        ];

        let report = h
            .orchestrator
            .source_watch(&sources, TimeWindow::new(TimeUnit::Years, 1), false)
            .await
            .unwrap();
        assert_eq!(report.value.len(), 5);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, FailureStage::Index);
        assert_eq!(report.failures[0].position, 2);
    }

    #[tokio::test]
    async fn test_synthesis_is_cached_under_its_own_kind() {
        let h = harness(FakeWeb::default(), FakeSearch::default(), OrchestratorConfig::default());
        let list = urls(2);
        let documents = vec![doc("notes.txt", "Des notes.")];

        let report = h
            .orchestrator
            .synthesize_corpus(&list, documents.clone(), false)
            .await
            .unwrap();
        assert!(!report.was_cached);
        assert_eq!(report.value.sources, vec![list[0].clone(), list[1].clone(), "notes.txt".to_string()]);
        // One LLM call for the whole corpus.
        assert_eq!(h.llm.calls.load(Ordering::SeqCst), 1);

        let again = h.orchestrator.synthesize_corpus(&list, documents, false).await.unwrap();
        assert!(again.was_cached);
        assert_eq!(again.value, report.value);

        let fingerprint = report.fingerprint.unwrap();
        assert!(h.store.get(fingerprint, ResultKind::Synthesis).await.is_ok());
        assert!(h.store.get(fingerprint, ResultKind::Summaries).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_questions_are_not_cached() {
        let h = harness(FakeWeb::default(), FakeSearch::default(), OrchestratorConfig::default());

        let report = h
            .orchestrator
            .ask_corpus("Quelles tendances ?", &urls(1), Vec::new())
            .await
            .unwrap();
        assert!(report.value.starts_with("Résumé"));
        assert!(report.fingerprint.is_none());
        assert_eq!(h.store.len().await.unwrap(), 0);

        let err = h.orchestrator.ask_corpus("  ", &urls(1), Vec::new()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::EmptyInput("question")));
    }

    #[tokio::test]
    async fn test_progress_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let h = harness(FakeWeb::default(), FakeSearch::default(), OrchestratorConfig::default());
        let orchestrator = h.orchestrator.with_progress(tx);
        let list = urls(2);

        orchestrator.summarize_articles(&list, Vec::new(), false).await.unwrap();
        orchestrator.summarize_articles(&list, Vec::new(), false).await.unwrap();
        drop(orchestrator);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(&events[0], Progress::Scraped { position: 0, collected: 1, .. }));
        assert!(events.contains(&Progress::Summarized { done: 2, total: 2 }));
        assert!(matches!(events.last(), Some(Progress::Cached { kind: ResultKind::Summaries, .. })));
    }
}
