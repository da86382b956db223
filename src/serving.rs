//! Process-wide serving state: the current corpus snapshot, the crawl guard, and
//! the progress board that pollers read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::corpus::{Corpus, RunMetadata};
use crate::crawler::{CrawlProgress, Crawler, ProgressObserver};
use crate::store::{CorpusStore, StoreError};

/// Result of asking for a reindex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReindexOutcome {
    /// A crawl was already running; nothing was started.
    AlreadyRunning,
    /// No seed URLs are configured; the crawl was a no-op.
    NotConfigured,
    /// The crawl finished and its corpus is now served.
    Completed(RunMetadata),
}

/// Held while a crawl runs; dropping it clears the running flag.
///
/// Owns its handle on the flag so it can move into a spawned task.
#[derive(Debug)]
pub struct CrawlPermit {
    flag: Arc<AtomicBool>,
}

impl Drop for CrawlPermit {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Owns the served corpus and swaps it by reference.
///
/// Readers clone an `Arc` snapshot and never observe a half-built pair; a new
/// corpus is fully built and persisted before it replaces the old one.
pub struct ServingState {
    store: CorpusStore,
    corpus: RwLock<Option<Arc<Corpus>>>,
    crawling: Arc<AtomicBool>,
    progress: RwLock<CrawlProgress>,
}

impl ServingState {
    /// Empty state over `store`; nothing is loaded yet.
    pub fn new(store: CorpusStore) -> Self {
        Self {
            store,
            corpus: RwLock::new(None),
            crawling: Arc::new(AtomicBool::new(false)),
            progress: RwLock::new(CrawlProgress::idle()),
        }
    }

    /// Builds the state and loads the persisted corpus, failing closed to empty.
    pub fn open(store: CorpusStore) -> Self {
        let state = Self::new(store);
        if let Err(err) = state.reload() {
            tracing::error!(error = %err, "persisted corpus unreadable, serving empty state");
        }
        state
    }

    /// Backing store.
    pub fn store(&self) -> &CorpusStore {
        &self.store
    }

    /// Current corpus, if any run has completed.
    pub fn snapshot(&self) -> Option<Arc<Corpus>> {
        match self.corpus.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replaces the served corpus.
    pub fn install(&self, corpus: Corpus) {
        let corpus = Arc::new(corpus);
        match self.corpus.write() {
            Ok(mut guard) => *guard = Some(corpus),
            Err(poisoned) => *poisoned.into_inner() = Some(corpus),
        }
    }

    /// Reloads from disk; on error the previous snapshot stays in place.
    ///
    /// Returns whether a corpus was found.
    pub fn reload(&self) -> Result<bool, StoreError> {
        match self.store.load()? {
            Some(corpus) => {
                tracing::info!(
                    chunks = corpus.chunks().len(),
                    indexed = corpus.metadata().last_indexed_count,
                    "corpus loaded"
                );
                self.install(corpus);
                Ok(true)
            }
            None => {
                tracing::info!(root = %self.store.root().display(), "no persisted corpus yet");
                Ok(false)
            }
        }
    }

    /// `true` while a crawl holds the permit.
    pub fn is_crawling(&self) -> bool {
        self.crawling.load(Ordering::Acquire)
    }

    /// Claims the single crawl slot, or `None` when a crawl is running.
    pub fn try_begin_crawl(&self) -> Option<CrawlPermit> {
        self.crawling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CrawlPermit {
                flag: Arc::clone(&self.crawling),
            })
    }

    /// Last reported crawl progress.
    pub fn progress(&self) -> CrawlProgress {
        match self.progress.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Crawls, builds, persists, and swaps in a new corpus.
    ///
    /// Rejected without side effects while another crawl runs. A persistence
    /// failure leaves the previous corpus served and is returned to the caller.
    pub async fn reindex(&self, crawler: &Crawler) -> Result<ReindexOutcome, StoreError> {
        let Some(permit) = self.try_begin_crawl() else {
            tracing::info!("reindex requested while a crawl is running");
            return Ok(ReindexOutcome::AlreadyRunning);
        };
        self.reindex_with(permit, crawler).await
    }

    /// Runs a reindex under a permit the caller already claimed.
    ///
    /// The permit is released when the run ends, whatever its outcome.
    pub async fn reindex_with(
        &self,
        permit: CrawlPermit,
        crawler: &Crawler,
    ) -> Result<ReindexOutcome, StoreError> {
        let _permit = permit;

        let previous_count = match self.store.load_metadata() {
            Ok(meta) => meta.map(|meta| meta.last_indexed_count).unwrap_or(0),
            Err(err) => {
                tracing::warn!(error = %err, "previous run metadata unreadable");
                0
            }
        };

        let Some(outcome) = crawler.run(self).await else {
            return Ok(ReindexOutcome::NotConfigured);
        };

        let metadata = RunMetadata {
            last_indexed_at: outcome.finished_at,
            last_indexed_count: outcome.indexed,
            prev_indexed_count: previous_count,
            last_index_duration_ms: outcome.duration.as_millis() as u64,
        };
        let corpus = self.store.publish(outcome.chunks, metadata.clone())?;
        self.install(corpus);
        Ok(ReindexOutcome::Completed(metadata))
    }
}

impl ProgressObserver for ServingState {
    fn report(&self, progress: &CrawlProgress) {
        match self.progress.write() {
            Ok(mut guard) => *guard = progress.clone(),
            Err(poisoned) => *poisoned.into_inner() = progress.clone(),
        }
    }
}
