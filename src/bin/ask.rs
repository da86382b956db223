use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use groundcrawl::telemetry::init_tracing;
use groundcrawl::{
    AnswerArgs, AnswerGenerator, AnswerOrigin, Assistant, Cli, CorpusStore, FaqBook, Language,
    ServingState,
};

#[derive(Parser, Debug)]
#[command(
    name = "groundcrawl-ask",
    about = "Answer one question from the persisted corpus and curated answers"
)]
struct AskCli {
    #[command(flatten)]
    settings: Cli,

    #[command(flatten)]
    answers: AnswerArgs,

    /// Question to answer
    #[arg(long)]
    question: String,

    /// Answer language (uk or en)
    #[arg(long, default_value = "uk")]
    lang: String,

    /// Only print the retrieved context and prompt (skip the model call)
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = AskCli::parse();
    init_tracing(cli.settings.log_json);

    let question = cli.question.trim();
    if question.is_empty() {
        bail!("question must not be empty");
    }
    let lang = Language::normalize(&cli.lang);
    let state = ServingState::open(CorpusStore::new(&cli.settings.data_dir));
    let corpus = state.snapshot();
    if corpus.is_none() {
        eprintln!(
            "no corpus under {}; run groundcrawl-crawl first",
            cli.settings.data_dir.display()
        );
    }

    if cli.dry_run {
        let assistant = Assistant::new(
            cli.settings.retrieval_settings(),
            cli.answers.composer(),
            None,
        );
        let (prompt, chunks) = assistant.prompt(corpus.as_deref(), question, lang);
        println!("retrieved {} chunks:", chunks.len());
        for (idx, chunk) in chunks.iter().enumerate() {
            println!("  {}. {} ({})", idx + 1, chunk.title, chunk.url);
        }
        println!("\n{prompt}");
        return Ok(());
    }

    let generator: Option<Arc<dyn AnswerGenerator>> = match cli.answers.generator() {
        Ok(client) => Some(Arc::new(client)),
        Err(err) => {
            tracing::warn!(error = %err, "only curated answers available");
            None
        }
    };
    let assistant = Assistant::new(
        cli.settings.retrieval_settings(),
        cli.answers.composer(),
        generator,
    );
    let book = FaqBook::load(&cli.settings.faq_path());
    let reply = assistant
        .answer(&book, corpus.as_deref(), question, lang)
        .await
        .context("failed to answer question")?;

    println!("{}", reply.answer);
    if reply.origin == AnswerOrigin::Faq {
        println!("\n(curated answer)");
    }
    if !reply.sources.is_empty() {
        println!("\nSources:");
        for source in &reply.sources {
            println!("- {} ({})", source.title, source.url);
        }
    }
    if reply.fallback {
        eprintln!("note: the model reported insufficient information");
    }
    Ok(())
}
