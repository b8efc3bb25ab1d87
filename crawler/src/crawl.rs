//! Paginated harvest: page 1 declares the page count, pages 2..=N are fetched
//! through the rate limiter and written to the store as they arrive.

use parking_lot::Mutex;
use pressdex_core::{DocumentStore, InsertSummary, LimiterConfig, RateLimiter, RunHook, StoreError, TracingHook};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::error::CrawlError;
use crate::extract::extract_page;
use crate::source::PageSource;

const RUN_NAME: &str = "article collection";

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Upper bound on pages requested, whatever page 1 declares.
    pub max_pages: u32,
    pub limiter: LimiterConfig,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self { max_pages: 200, limiter: LimiterConfig::crawler() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Init,
    FetchingFirstPage,
    FetchingRemainingPages,
    Draining,
    Done,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    /// Page count declared by page 1.
    pub declared_pages: u32,
    /// Highest page requested after applying `max_pages`.
    pub requested_pages: u32,
    /// Pages whose documents reached the store.
    pub ingested_pages: BTreeSet<u32>,
    pub failed_pages: Vec<u32>,
    pub documents_inserted: usize,
    pub duplicates: usize,
    /// External ids, page 1 first, then in page order.
    pub ids: Vec<String>,
}

impl CrawlReport {
    fn record(&mut self, page: u32, ingest: PageIngest) {
        self.ingested_pages.insert(page);
        self.documents_inserted += ingest.summary.inserted;
        self.duplicates += ingest.summary.duplicates;
        self.ids.extend(ingest.ids);
    }
}

struct PageIngest {
    ids: Vec<String>,
    summary: InsertSummary,
}

pub struct Crawler<S> {
    source: Arc<S>,
    store: Arc<DocumentStore>,
    limiter: RateLimiter,
    config: CrawlConfig,
    hook: Arc<dyn RunHook>,
    state: Mutex<CrawlState>,
}

impl<S: PageSource> Crawler<S> {
    pub fn new(source: S, store: Arc<DocumentStore>, config: CrawlConfig) -> Self {
        Self {
            source: Arc::new(source),
            store,
            limiter: RateLimiter::new(config.limiter),
            config,
            hook: Arc::new(TracingHook),
            state: Mutex::new(CrawlState::Init),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn RunHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn state(&self) -> CrawlState { *self.state.lock() }

    /// Runs the crawl to completion and hands the report to `on_complete`.
    ///
    /// Failed pages only shrink the result. The run fails when page 1 cannot
    /// be fetched, when the store reports an I/O error, or when `on_complete`
    /// fails.
    pub async fn run<F>(&self, on_complete: F) -> Result<CrawlReport, CrawlError>
    where
        F: FnOnce(&CrawlReport) -> Result<(), CrawlError>,
    {
        self.hook.started(RUN_NAME);
        let started = Instant::now();
        let result = match self.crawl().await {
            Ok(report) => on_complete(&report).map(|()| report),
            Err(e) => Err(e),
        };
        self.hook.finished(RUN_NAME, started.elapsed());

        match &result {
            Ok(report) => {
                self.transition(CrawlState::Done);
                tracing::info!(
                    pages = report.ingested_pages.len(),
                    failed = report.failed_pages.len(),
                    inserted = report.documents_inserted,
                    ids = report.ids.len(),
                    "crawl complete"
                );
            }
            Err(e) => {
                self.transition(CrawlState::Failed);
                tracing::error!(error = %e, "crawl aborted");
            }
        }
        result
    }

    async fn crawl(&self) -> Result<CrawlReport, CrawlError> {
        self.transition(CrawlState::FetchingFirstPage);
        let source = Arc::clone(&self.source);
        let first = self
            .limiter
            .schedule(move || async move { source.fetch_page(1).await })
            .await
            .map_err(CrawlError::FirstPage)?;

        let mut report = CrawlReport { declared_pages: first.pages, ..CrawlReport::default() };
        match ingest_blocking(Arc::clone(&self.store), 1, first.results).await? {
            Some(ingest) => report.record(1, ingest),
            None => report.failed_pages.push(1),
        }

        let last_page = first.pages.min(self.config.max_pages);
        if first.pages > self.config.max_pages {
            tracing::warn!(declared = first.pages, cap = self.config.max_pages, "page count capped");
        }
        report.requested_pages = last_page.max(1);

        self.transition(CrawlState::FetchingRemainingPages);
        let mut tasks = Vec::new();
        for page in 2..=last_page {
            let source = Arc::clone(&self.source);
            let store = Arc::clone(&self.store);
            let fetch = self.limiter.schedule(move || async move { source.fetch_page(page).await });
            let handle = tokio::spawn(async move {
                match fetch.await {
                    Ok(api) => ingest_blocking(store, page, api.results).await,
                    Err(e) => {
                        tracing::warn!(page, error = %e, "page failed");
                        Ok(None)
                    }
                }
            });
            tasks.push((page, handle));
        }

        self.transition(CrawlState::Draining);
        let mut pending = tasks.into_iter();
        while let Some((page, handle)) = pending.next() {
            let outcome = match handle.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    for (_, rest) in pending.by_ref() {
                        rest.abort();
                    }
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::warn!(page, error = %e, "page task died");
                    None
                }
            };
            match outcome {
                Some(ingest) => report.record(page, ingest),
                None => report.failed_pages.push(page),
            }
        }
        Ok(report)
    }

    fn transition(&self, next: CrawlState) {
        let mut state = self.state.lock();
        tracing::debug!(from = ?*state, to = ?next, "crawl state");
        *state = next;
    }
}

/// Runs [`ingest_page`] on the blocking pool; the sled transaction and flush
/// must not stall the async workers. `None` when the blocking task died.
async fn ingest_blocking(
    store: Arc<DocumentStore>,
    page: u32,
    results: Vec<Value>,
) -> Result<Option<PageIngest>, StoreError> {
    match tokio::task::spawn_blocking(move || ingest_page(&store, page, &results)).await {
        Ok(ingest) => ingest.map(Some),
        Err(e) => {
            tracing::warn!(page, error = %e, "page ingest task died");
            Ok(None)
        }
    }
}

fn ingest_page(store: &DocumentStore, page: u32, results: &[Value]) -> Result<PageIngest, StoreError> {
    let docs = extract_page(page, results);
    let summary = store.insert_many(&docs)?;
    tracing::info!(
        page,
        records = results.len(),
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        "page ingested"
    );
    let ids = docs.into_iter().map(|d| d.external_id).collect();
    Ok(PageIngest { ids, summary })
}

/// Writes `ids` as a JSON array to `<dir>/ids-<first id>.json`. Nothing is
/// written for an empty list.
pub fn write_ids_file(dir: &Path, ids: &[String]) -> Result<Option<PathBuf>, CrawlError> {
    let Some(first) = ids.first() else {
        tracing::warn!("no ids collected, skipping ids file");
        return Ok(None);
    };
    let path = dir.join(format!("ids-{}.json", file_stem(first)));
    let artifact = |source: std::io::Error| CrawlError::Artifact { path: path.clone(), source };

    fs::create_dir_all(dir).map_err(artifact)?;
    let mut out = BufWriter::new(File::create(&path).map_err(artifact)?);
    serde_json::to_writer(&mut out, ids).map_err(|e| artifact(e.into()))?;
    out.flush().map_err(artifact)?;
    tracing::info!(path = %path.display(), count = ids.len(), "wrote ids file");
    Ok(Some(path))
}

fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
