//! Breadth-first work queue and visited set for one crawl run.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::controls::CrawlControls;

/// Strips the fragment and one trailing slash.
pub fn normalize_url(raw: &str) -> String {
    let without_fragment = raw.split('#').next().unwrap_or_default();
    without_fragment
        .strip_suffix('/')
        .unwrap_or(without_fragment)
        .to_string()
}

/// A normalized URL plus the depth it was discovered at (0 = seed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTarget {
    url: String,
    depth: u8,
}

impl CrawlTarget {
    /// Creates a new target, normalizing `url`.
    pub fn new(url: &str, depth: u8) -> Self {
        Self {
            url: normalize_url(url),
            depth,
        }
    }

    /// Normalized URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Traversal depth.
    pub fn depth(&self) -> u8 {
        self.depth
    }
}

/// Reasons a discovered URL is not enqueued. The caller gets the target back.
#[derive(Debug, Error)]
pub enum FrontierError {
    /// Already enqueued or visited during this run.
    #[error("{} already scheduled", .0.url())]
    Duplicate(CrawlTarget),
    /// Matches no allow-listed base URL.
    #[error("{} is outside the allow-list", .0.url())]
    OutOfScope(CrawlTarget),
    /// Deeper than the configured maximum.
    #[error("{} at depth {} exceeds the depth budget", .0.url(), .0.depth())]
    TooDeep(CrawlTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UrlState {
    Enqueued,
    Visited,
}

#[derive(Default)]
struct FrontierState {
    queue: VecDeque<CrawlTarget>,
    states: HashMap<String, UrlState>,
    visited: usize,
}

/// Queue depth and visited count at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierCounts {
    /// URLs dequeued so far.
    pub visited: usize,
    /// URLs waiting in the queue.
    pub queued: usize,
}

/// Discovered → enqueued → visited bookkeeping.
///
/// Every transition happens under one lock, so a URL is enqueued at most once
/// and marked visited exactly once, before it is fetched.
pub struct Frontier {
    controls: Arc<CrawlControls>,
    state: Mutex<FrontierState>,
}

impl Frontier {
    /// Constructs an empty frontier scoped by `controls`.
    pub fn new(controls: Arc<CrawlControls>) -> Self {
        Self {
            controls,
            state: Mutex::new(FrontierState::default()),
        }
    }

    /// Enqueues every configured base URL at depth 0; returns how many were accepted.
    ///
    /// Seeds skip the allow-list test: a normalized base such as
    /// `https://site.test` would not match its own `https://site.test/` prefix.
    pub async fn seed(&self) -> usize {
        let mut state = self.state.lock().await;
        let mut accepted = 0;
        for url in self.controls.seed_urls() {
            if Self::enqueue(&mut state, CrawlTarget::new(&url, 0)).is_ok() {
                accepted += 1;
            }
        }
        accepted
    }

    /// Offers a link discovered at `depth`.
    pub async fn offer(&self, url: &str, depth: u8) -> Result<(), FrontierError> {
        let target = CrawlTarget::new(url, depth);
        if depth > self.controls.max_depth() {
            return Err(FrontierError::TooDeep(target));
        }
        if !self.controls.is_allowed(target.url()) {
            return Err(FrontierError::OutOfScope(target));
        }
        let mut state = self.state.lock().await;
        Self::enqueue(&mut state, target)
    }

    fn enqueue(state: &mut FrontierState, target: CrawlTarget) -> Result<(), FrontierError> {
        match state.states.entry(target.url.clone()) {
            Entry::Occupied(_) => Err(FrontierError::Duplicate(target)),
            Entry::Vacant(slot) => {
                slot.insert(UrlState::Enqueued);
                state.queue.push_back(target);
                Ok(())
            }
        }
    }

    /// Pops the oldest target and marks it visited in the same critical section.
    pub async fn next_target(&self) -> Option<CrawlTarget> {
        let mut state = self.state.lock().await;
        let target = state.queue.pop_front()?;
        if let Some(slot) = state.states.get_mut(target.url()) {
            *slot = UrlState::Visited;
        }
        state.visited += 1;
        Some(target)
    }

    /// Returns `true` once `url` has been dequeued in this run.
    pub async fn is_visited(&self, url: &str) -> bool {
        let state = self.state.lock().await;
        state.states.get(&normalize_url(url)) == Some(&UrlState::Visited)
    }

    /// Current visited and queued counts.
    pub async fn counts(&self) -> FrontierCounts {
        let state = self.state.lock().await;
        FrontierCounts {
            visited: state.visited,
            queued: state.queue.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frontier(bases: &[&str], max_depth: u8) -> Frontier {
        let controls = CrawlControls::new(bases.iter().map(|b| b.to_string()).collect(), 100, max_depth);
        Frontier::new(Arc::new(controls))
    }

    #[test]
    fn normalizes_fragment_and_trailing_slash() {
        assert_eq!(normalize_url("https://site.test/a/#top"), "https://site.test/a");
        assert_eq!(normalize_url("https://site.test/"), "https://site.test");
        assert_eq!(normalize_url("https://site.test/a?q=1#x"), "https://site.test/a?q=1");
        assert_eq!(normalize_url("https://site.test//"), "https://site.test/");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn seeds_flow_out_in_order() {
        let frontier = frontier(&["https://a.test/", "https://b.test/"], 2);
        assert_eq!(frontier.seed().await, 2);

        let first = frontier.next_target().await.expect("first seed");
        assert_eq!(first.url(), "https://a.test");
        assert_eq!(first.depth(), 0);
        assert!(frontier.is_visited("https://a.test/").await);
        assert_eq!(
            frontier.counts().await,
            FrontierCounts {
                visited: 1,
                queued: 1
            }
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn duplicate_urls_rejected() {
        let frontier = frontier(&["https://dup.test/"], 3);
        frontier.offer("https://dup.test/a", 1).await.expect("first offer");

        match frontier
            .offer("https://dup.test/a/#frag", 2)
            .await
            .expect_err("duplicate rejected")
        {
            FrontierError::Duplicate(target) => assert_eq!(target.depth(), 2),
            other => panic!("expected duplicate error, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cycles_are_visited_once() {
        let frontier = frontier(&["https://site.test/"], 5);
        frontier.seed().await;

        let mut dequeued = Vec::new();
        while let Some(target) = frontier.next_target().await {
            dequeued.push(target.url().to_string());
            // A links to B, B links back to A and to itself.
            for link in ["https://site.test/a", "https://site.test/b", "https://site.test/"] {
                let _ = frontier.offer(link, target.depth() + 1).await;
            }
        }

        assert_eq!(
            dequeued,
            vec!["https://site.test", "https://site.test/a", "https://site.test/b"]
        );
        assert_eq!(frontier.counts().await.visited, 3);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn out_of_scope_urls_never_enqueued() {
        let frontier = frontier(&["https://site.test/dept"], 10);
        for depth in 0..=10 {
            let err = frontier
                .offer("https://elsewhere.test/dept", depth)
                .await
                .expect_err("out of scope");
            assert!(matches!(err, FrontierError::OutOfScope(_)));
        }
        assert_eq!(frontier.counts().await.queued, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn depth_budget_is_enforced() {
        let frontier = frontier(&["https://site.test/"], 1);
        assert!(frontier.offer("https://site.test/a", 1).await.is_ok());
        assert!(matches!(
            frontier.offer("https://site.test/b", 2).await,
            Err(FrontierError::TooDeep(_))
        ));
    }
}
