use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::header::CONTENT_TYPE;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use groundcrawl::{
    ChunkConfig, CorpusStore, CrawlControls, CrawlProgress, CrawlTarget, Crawler, FetchError,
    FetchedPage, HttpFetcher, PageFetcher, ReindexOutcome, Retrieval, Retriever, ServingState,
};
use tempfile::TempDir;

#[derive(Default)]
struct FakeSite {
    pages: Mutex<HashMap<String, String>>,
}

impl FakeSite {
    fn publish(&self, url: &str, html: String) {
        self.pages.lock().unwrap().insert(url.to_string(), html);
    }
}

#[async_trait]
impl PageFetcher for FakeSite {
    async fn fetch(&self, target: &CrawlTarget) -> Result<FetchedPage, FetchError> {
        let html = self
            .pages
            .lock()
            .unwrap()
            .get(target.url())
            .cloned()
            .ok_or(FetchError::Status(404))?;
        Ok(FetchedPage::new(
            target.url(),
            target.depth(),
            200,
            Some("text/html; charset=utf-8".into()),
            html.into_bytes(),
        ))
    }
}

fn html(title: &str, lead: &str, filler: &str, words: usize, links: &[&str]) -> String {
    let body = vec![filler; words].join(" ");
    let anchors: String = links
        .iter()
        .map(|href| format!("<a href=\"{href}\">more</a>"))
        .collect();
    format!(
        "<html><head><title>{title}</title></head><body><nav>menu</nav>\
         <main><p>{lead} {body}</p>{anchors}</main></body></html>"
    )
}

fn site() -> Arc<FakeSite> {
    let site = Arc::new(FakeSite::default());
    site.publish(
        "https://site.test",
        html("Home", "admission deadline is June", "campus", 250, &["/about"]),
    );
    site.publish("https://site.test/about", html("About", "", "ok", 40, &[]));
    site
}

fn crawler(site: Arc<FakeSite>) -> Crawler {
    let controls = CrawlControls::new(vec!["https://site.test/".into()], 50, 1);
    Crawler::new(site, Arc::new(controls), ChunkConfig::default())
}

#[tokio::test(flavor = "current_thread")]
async fn short_pages_are_visited_but_not_indexed() {
    let outcome = crawler(site())
        .run(&|_: &CrawlProgress| {})
        .await
        .expect("seeds configured");

    assert_eq!(outcome.visited, 2);
    assert_eq!(outcome.indexed, 1);
    assert!(!outcome.chunks.is_empty());
    assert!(outcome
        .chunks
        .iter()
        .all(|chunk| chunk.url == "https://site.test" && chunk.title == "Home"));
}

#[tokio::test(flavor = "current_thread")]
async fn persisted_corpus_survives_a_restart() {
    let dir = TempDir::new().expect("tempdir");
    let state = ServingState::new(CorpusStore::new(dir.path()));
    let outcome = state.reindex(&crawler(site())).await.expect("persist");
    let ReindexOutcome::Completed(meta) = outcome else {
        panic!("expected a completed run, got {outcome:?}");
    };
    assert_eq!(meta.last_indexed_count, 1);
    assert_eq!(meta.prev_indexed_count, 0);

    let reopened = ServingState::open(CorpusStore::new(dir.path()));
    let corpus = reopened.snapshot().expect("corpus reloaded");
    match Retriever::default().search(Some(&corpus), "deadline", 6) {
        Retrieval::Ranked(chunks) => {
            assert_eq!(chunks.len(), 1);
            assert_eq!(chunks[0].url, "https://site.test");
        }
        other => panic!("unexpected retrieval {other:?}"),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn rerun_replaces_the_previous_corpus() {
    let dir = TempDir::new().expect("tempdir");
    let state = ServingState::new(CorpusStore::new(dir.path()));
    let site = site();
    let crawler = crawler(site.clone());
    state.reindex(&crawler).await.expect("first run");

    site.publish(
        "https://site.test",
        html("Home", "scholarship results announced", "campus", 250, &["/about"]),
    );
    site.publish(
        "https://site.test/about",
        html("About", "library hours", "reading", 60, &[]),
    );
    let outcome = state.reindex(&crawler).await.expect("second run");
    let ReindexOutcome::Completed(meta) = outcome else {
        panic!("expected a completed run, got {outcome:?}");
    };
    assert_eq!(meta.prev_indexed_count, 1);
    assert_eq!(meta.last_indexed_count, 2);

    let corpus = state.snapshot().expect("corpus installed");
    let retriever = Retriever::default();
    assert!(retriever.search(Some(&corpus), "deadline", 6).is_empty());
    let hits = retriever.search(Some(&corpus), "library", 6).into_chunks();
    assert_eq!(hits[0].url, "https://site.test/about");
}

#[tokio::test(flavor = "current_thread")]
async fn empty_seed_list_leaves_state_untouched() {
    let dir = TempDir::new().expect("tempdir");
    let state = ServingState::new(CorpusStore::new(dir.path()));
    let crawler = Crawler::new(
        site(),
        Arc::new(CrawlControls::default()),
        ChunkConfig::default(),
    );
    let outcome = state.reindex(&crawler).await.expect("no io");
    assert_eq!(outcome, ReindexOutcome::NotConfigured);
    assert!(state.snapshot().is_none());
    assert!(!state.is_crawling());
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

#[tokio::test(flavor = "current_thread")]
async fn non_html_responses_are_skipped_over_http() {
    let home = html(
        "Home",
        "admission deadline is June",
        "campus",
        250,
        &["/brochure.pdf"],
    );
    let app = Router::new()
        .route(
            "/",
            get(move || {
                let page = home.clone();
                async move { Html(page) }
            }),
        )
        .route(
            "/brochure.pdf",
            get(|| async { ([(CONTENT_TYPE, "application/pdf")], b"%PDF-1.7".to_vec()) }),
        );
    let base = serve(app).await;

    let controls = Arc::new(CrawlControls::new(vec![format!("{base}/")], 50, 1));
    let fetcher = HttpFetcher::new(&controls).expect("client");
    let crawler = Crawler::new(Arc::new(fetcher), controls, ChunkConfig::default());
    let outcome = crawler
        .run(&|_: &CrawlProgress| {})
        .await
        .expect("seeds configured");

    assert_eq!(outcome.visited, 2);
    assert_eq!(outcome.indexed, 1);
    assert_eq!(outcome.stats.fetch_errors, 1);
    assert_eq!(outcome.stats.links_enqueued, 1);
    assert!(outcome.chunks.iter().all(|chunk| chunk.url == base));
}
