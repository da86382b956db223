//! Crawl orchestration: frontier → fetch → extract → chunk, with progress reporting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use crate::chunker::ChunkConfig;
use crate::controls::CrawlControls;
use crate::corpus::Chunk;
use crate::fetch::{FetchError, PageFetcher};
use crate::frontier::{CrawlTarget, Frontier, FrontierError};
use crate::html::{outbound_links, LinkScanError};
use crate::normalizer::{Document, FetchedPage, Normalizer};

/// Whether a crawl is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStatus {
    /// A run is in progress.
    Running,
    /// No run is in progress.
    Idle,
}

/// Snapshot handed to a [`ProgressObserver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlProgress {
    /// Run state.
    pub status: CrawlStatus,
    /// Pages that produced chunks.
    pub indexed: usize,
    /// URLs dequeued so far.
    pub visited: usize,
    /// URLs waiting in the frontier.
    pub queued: usize,
    /// Set on the final report of a run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl CrawlProgress {
    /// Progress before any run has started.
    pub fn idle() -> Self {
        Self {
            status: CrawlStatus::Idle,
            indexed: 0,
            visited: 0,
            queued: 0,
            finished_at: None,
        }
    }
}

/// Receives progress at run start, after each indexed page, and at completion.
pub trait ProgressObserver: Send + Sync {
    /// Called with the latest progress.
    fn report(&self, progress: &CrawlProgress);
}

impl<F> ProgressObserver for F
where
    F: Fn(&CrawlProgress) + Send + Sync,
{
    fn report(&self, progress: &CrawlProgress) {
        self(progress)
    }
}

/// Counters collected over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    /// Successful fetches.
    pub pages_fetched: usize,
    /// Fetched pages whose body was too short to index.
    pub thin_pages: usize,
    /// Links found on fetched pages.
    pub links_discovered: usize,
    /// Links accepted by the frontier.
    pub links_enqueued: usize,
    /// Links already enqueued or visited.
    pub duplicates_filtered: usize,
    /// Links outside the allow-list or depth budget.
    pub frontier_rejections: usize,
    /// Fetches skipped for transport, status, type, or size.
    pub fetch_errors: usize,
    /// Pages whose URL or markup could not be parsed.
    pub parse_errors: usize,
}

impl CrawlStats {
    fn record_offer(&mut self, result: &Result<(), FrontierError>) {
        match result {
            Ok(()) => self.links_enqueued += 1,
            Err(FrontierError::Duplicate(_)) => self.duplicates_filtered += 1,
            Err(FrontierError::OutOfScope(_) | FrontierError::TooDeep(_)) => {
                self.frontier_rejections += 1
            }
        }
    }

    fn report(&self, indexed: usize, elapsed: Duration) {
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        tracing::info!(
            indexed,
            pages_fetched = self.pages_fetched,
            pages_per_sec = self.pages_fetched as f64 / secs,
            thin_pages = self.thin_pages,
            links_discovered = self.links_discovered,
            links_enqueued = self.links_enqueued,
            duplicates_filtered = self.duplicates_filtered,
            frontier_rejections = self.frontier_rejections,
            fetch_errors = self.fetch_errors,
            parse_errors = self.parse_errors,
            elapsed_ms = elapsed.as_millis() as u64,
            "crawl finished"
        );
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    /// Chunks in discovery order, ids starting at 1.
    pub chunks: Vec<Chunk>,
    /// Pages that produced chunks.
    pub indexed: usize,
    /// URLs dequeued.
    pub visited: usize,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock run time.
    pub duration: Duration,
    /// Run counters.
    pub stats: CrawlStats,
}

#[derive(Debug, Error)]
enum LinkError {
    #[error("page url is not absolute: {0}")]
    BaseUrl(#[from] url::ParseError),
    #[error(transparent)]
    Scan(#[from] LinkScanError),
}

struct RunState {
    chunks: Vec<Chunk>,
    indexed: usize,
    stats: CrawlStats,
}

/// Runs breadth-first crawls, one page at a time.
pub struct Crawler {
    fetcher: Arc<dyn PageFetcher>,
    controls: Arc<CrawlControls>,
    chunking: ChunkConfig,
    normalizer: Normalizer,
}

impl Crawler {
    /// Builds a crawler; the normalizer threshold comes from `controls`.
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        controls: Arc<CrawlControls>,
        chunking: ChunkConfig,
    ) -> Self {
        let normalizer = Normalizer::new(controls.min_body_chars());
        Self {
            fetcher,
            controls,
            chunking,
            normalizer,
        }
    }

    /// Crawl bounds in effect.
    pub fn controls(&self) -> &CrawlControls {
        &self.controls
    }

    /// Performs one full crawl.
    ///
    /// Returns `None` without reporting anything when no seed URLs are configured.
    /// Per-URL failures are logged and skipped; the run itself cannot fail.
    pub async fn run(&self, observer: &dyn ProgressObserver) -> Option<CrawlOutcome> {
        if self.controls.base_urls().is_empty() {
            tracing::warn!("no seed urls configured, crawl skipped");
            return None;
        }

        let started = Instant::now();
        let frontier = Frontier::new(Arc::clone(&self.controls));
        frontier.seed().await;
        let mut run = RunState {
            chunks: Vec::new(),
            indexed: 0,
            stats: CrawlStats::default(),
        };
        tracing::info!(
            seeds = self.controls.base_urls().len(),
            max_pages = self.controls.max_pages(),
            max_depth = self.controls.max_depth(),
            "crawl started"
        );
        self.report(observer, &frontier, &run, CrawlStatus::Running, None)
            .await;

        while run.indexed < self.controls.max_pages() {
            let Some(target) = frontier.next_target().await else {
                break;
            };
            match self.visit(&frontier, &target, &mut run).await {
                Ok(true) => {
                    self.report(observer, &frontier, &run, CrawlStatus::Running, None)
                        .await
                }
                Ok(false) => {}
                Err(err) => {
                    run.stats.fetch_errors += 1;
                    tracing::warn!(
                        url = target.url(),
                        depth = target.depth(),
                        error = %err,
                        "skipping page"
                    );
                }
            }
        }

        let finished_at = Utc::now();
        let duration = started.elapsed();
        let visited = frontier.counts().await.visited;
        self.report(
            observer,
            &frontier,
            &run,
            CrawlStatus::Idle,
            Some(finished_at),
        )
        .await;
        run.stats.report(run.indexed, duration);

        Some(CrawlOutcome {
            chunks: run.chunks,
            indexed: run.indexed,
            visited,
            finished_at,
            duration,
            stats: run.stats,
        })
    }

    /// Fetches one target; returns whether it was indexed.
    ///
    /// Only the fetch can fail the visit. A page that cannot be scanned for links
    /// keeps its chunks and is counted under `parse_errors`.
    async fn visit(
        &self,
        frontier: &Frontier,
        target: &CrawlTarget,
        run: &mut RunState,
    ) -> Result<bool, FetchError> {
        let page = self.fetcher.fetch(target).await?;
        run.stats.pages_fetched += 1;

        let indexed = match self.normalizer.document(&page) {
            Some(document) => {
                self.append(document, run);
                run.indexed += 1;
                tracing::info!(
                    indexed = run.indexed,
                    depth = target.depth(),
                    url = target.url(),
                    "indexed page"
                );
                true
            }
            None => {
                run.stats.thin_pages += 1;
                tracing::debug!(url = target.url(), "no indexable content");
                false
            }
        };

        if target.depth() < self.controls.max_depth() {
            if let Err(err) = self.discover(frontier, target, &page, run).await {
                run.stats.parse_errors += 1;
                tracing::warn!(
                    url = target.url(),
                    depth = target.depth(),
                    error = %err,
                    "link discovery failed"
                );
            }
        }

        Ok(indexed)
    }

    async fn discover(
        &self,
        frontier: &Frontier,
        target: &CrawlTarget,
        page: &FetchedPage,
        run: &mut RunState,
    ) -> Result<(), LinkError> {
        let base = Url::parse(&page.url)?;
        let links = outbound_links(&page.body, &base)?;
        run.stats.links_discovered += links.len();
        for link in links {
            let offered = frontier.offer(&link, target.depth() + 1).await;
            run.stats.record_offer(&offered);
        }
        Ok(())
    }

    fn append(&self, document: Document, run: &mut RunState) {
        for window in self.chunking.chunks(&document.body) {
            let id = run.chunks.len() as u64 + 1;
            run.chunks.push(Chunk {
                id,
                url: document.url.clone(),
                title: document.title.clone(),
                text: window.to_string(),
            });
        }
    }

    async fn report(
        &self,
        observer: &dyn ProgressObserver,
        frontier: &Frontier,
        run: &RunState,
        status: CrawlStatus,
        finished_at: Option<DateTime<Utc>>,
    ) {
        let counts = frontier.counts().await;
        observer.report(&CrawlProgress {
            status,
            indexed: run.indexed,
            visited: counts.visited,
            queued: counts.queued,
            finished_at,
        });
    }
}
