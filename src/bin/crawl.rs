use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use groundcrawl::telemetry::init_tracing;
use groundcrawl::{Cli, CorpusStore, Crawler, HttpFetcher, ReindexOutcome, ServingState};

#[derive(Parser, Debug)]
#[command(
    name = "groundcrawl-crawl",
    about = "Crawl the configured site once and persist a fresh corpus"
)]
struct CrawlCli {
    #[command(flatten)]
    settings: Cli,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = CrawlCli::parse();
    init_tracing(cli.settings.log_json);

    let chunking = cli
        .settings
        .chunk_config()
        .context("invalid chunk settings")?;
    let controls = Arc::new(cli.settings.build_controls());
    let fetcher = HttpFetcher::new(&controls).context("failed to build HTTP client")?;
    let crawler = Crawler::new(Arc::new(fetcher), controls, chunking);
    let state = ServingState::new(CorpusStore::new(&cli.settings.data_dir));

    match state
        .reindex(&crawler)
        .await
        .context("failed to persist corpus")?
    {
        ReindexOutcome::Completed(meta) => {
            let chunks = state.snapshot().map(|c| c.chunks().len()).unwrap_or(0);
            println!(
                "indexed {} pages ({} previously) into {} chunks in {:.1}s",
                meta.last_indexed_count,
                meta.prev_indexed_count,
                chunks,
                meta.last_index_duration_ms as f64 / 1000.0
            );
            println!("corpus written to {}", cli.settings.data_dir.display());
        }
        ReindexOutcome::NotConfigured => {
            println!("SITE_URLS is empty; nothing to crawl");
        }
        ReindexOutcome::AlreadyRunning => bail!("another crawl holds the crawl slot"),
    }
    Ok(())
}
