use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use groundcrawl::assistant::SourceRef;
use groundcrawl::crawler::CrawlStatus;
use groundcrawl::schedule::{SCHEDULE_FILE, TICK_INTERVAL};
use groundcrawl::telemetry::init_tracing;
use groundcrawl::{
    AnswerArgs, AnswerGenerator, Assistant, Cli, CorpusStore, CrawlPermit, Crawler, FaqBook,
    HttpFetcher, Language, ReindexOutcome, ReindexSchedule, Retrieval, RetrievalSettings,
    ScheduleTracker, ServingState,
};
use serde::{Deserialize, Serialize};

const MAX_SEARCH_LIMIT: usize = 50;

#[derive(Parser, Debug)]
#[command(
    name = "groundcrawl-api",
    about = "HTTP assistant API: chat, search, and reindex control over the crawled corpus"
)]
struct ApiCli {
    #[command(flatten)]
    settings: Cli,

    #[command(flatten)]
    answers: AnswerArgs,

    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "GROUNDCRAWL_BIND", default_value = "127.0.0.1:5000")]
    bind: String,

    /// Local time of the daily reindex (HH:MM); a time saved through the API wins.
    #[arg(long, env = "REINDEX_AT", default_value = "02:00")]
    reindex_at: ReindexSchedule,

    /// Token required to trigger a reindex; unset leaves the trigger open.
    #[arg(long, env = "GROUNDCRAWL_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,
}

#[derive(Clone)]
struct AppState {
    serving: Arc<ServingState>,
    crawler: Arc<Crawler>,
    assistant: Arc<Assistant>,
    faq_path: Arc<PathBuf>,
    retrieval: RetrievalSettings,
    admin_token: Option<Arc<str>>,
    schedule: Arc<Mutex<ScheduleTracker>>,
    model: Arc<str>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
    #[serde(default)]
    lang: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    answer: String,
    sources: Vec<SourceRef>,
    fallback: bool,
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ScheduleUpdate {
    time: String,
}

#[derive(Debug, Serialize)]
struct ReindexResponse {
    ok: bool,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ReindexStatus {
    ok: bool,
    status: CrawlStatus,
    indexed: usize,
    visited: usize,
    queued: usize,
    finished_at: Option<DateTime<Utc>>,
    last_indexed_at: Option<DateTime<Utc>>,
    last_indexed_count: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ScheduleStatus {
    ok: bool,
    hour: u32,
    minute: u32,
    time: String,
    last_run_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
struct SystemStatus {
    ok: bool,
    chat: ChatHealth,
    model: ModelStatus,
    reindex: ReindexHealth,
}

#[derive(Debug, Serialize)]
struct ChatHealth {
    healthy: bool,
    message: &'static str,
    docs_indexed: usize,
    last_indexed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct ModelStatus {
    name: String,
    configured: bool,
}

#[derive(Debug, Serialize)]
struct ReindexHealth {
    running: bool,
    indexed: usize,
    queued: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = ApiCli::parse();
    init_tracing(cli.settings.log_json);

    let chunking = cli
        .settings
        .chunk_config()
        .context("invalid chunk settings")?;
    let controls = Arc::new(cli.settings.build_controls());
    let fetcher = HttpFetcher::new(&controls).context("failed to build HTTP client")?;
    let crawler = Arc::new(Crawler::new(Arc::new(fetcher), controls, chunking));
    let serving = Arc::new(ServingState::open(CorpusStore::new(&cli.settings.data_dir)));

    let generator: Option<Arc<dyn AnswerGenerator>> = match cli.answers.generator() {
        Ok(client) => Some(Arc::new(client)),
        Err(err) => {
            tracing::warn!(error = %err, "answer generation disabled");
            None
        }
    };
    let retrieval = cli.settings.retrieval_settings();
    let assistant = Assistant::new(retrieval, cli.answers.composer(), generator);

    let schedule = ScheduleTracker::load(
        cli.settings.data_dir.join(SCHEDULE_FILE),
        cli.reindex_at,
    );
    let reindex_at = schedule.schedule();

    let state = AppState {
        serving,
        crawler,
        assistant: Arc::new(assistant),
        faq_path: Arc::new(cli.settings.faq_path()),
        retrieval,
        admin_token: cli
            .admin_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(Arc::from),
        schedule: Arc::new(Mutex::new(schedule)),
        model: Arc::from(cli.answers.llm_model.as_str()),
    };
    tokio::spawn(run_schedule(state.clone()));

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, %reindex_at, "groundcrawl-api listening");
    axum::serve(listener, router(state))
        .await
        .context("server shutdown")?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/search", post(search_handler))
        .route("/api/admin/reindex", post(reindex_handler))
        .route("/api/admin/reindex/status", get(reindex_status))
        .route(
            "/api/admin/reindex/schedule",
            get(schedule_status).put(update_schedule),
        )
        .route("/api/admin/system-status", get(system_status))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ErrorBody>)> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(bad_request("Empty message"));
    }
    let lang = Language::normalize(request.lang.as_deref().unwrap_or_default());
    let book = FaqBook::load(&state.faq_path);
    let corpus = state.serving.snapshot();
    let reply = state
        .assistant
        .answer(&book, corpus.as_deref(), message, lang)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "chat answer failed");
            internal_error(err.into())
        })?;
    Ok(Json(ChatResponse {
        answer: reply.answer,
        sources: reply.sources,
        fallback: reply.fallback,
    }))
}

async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Retrieval>, (StatusCode, Json<ErrorBody>)> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query text must not be empty"));
    }
    let limit = request
        .limit
        .unwrap_or(state.retrieval.limit)
        .clamp(1, MAX_SEARCH_LIMIT);
    let corpus = state.serving.snapshot();
    Ok(Json(state.assistant.retrieve(
        corpus.as_deref(),
        &request.query,
        limit,
    )))
}

async fn reindex_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ReindexResponse>, (StatusCode, Json<ErrorBody>)> {
    authorize(&state, &headers)?;
    let Some(permit) = state.serving.try_begin_crawl() else {
        return Ok(Json(ReindexResponse {
            ok: true,
            status: "running",
        }));
    };
    spawn_reindex(&state, permit);
    Ok(Json(ReindexResponse {
        ok: true,
        status: "started",
    }))
}

async fn reindex_status(State(state): State<AppState>) -> Json<ReindexStatus> {
    let progress = state.serving.progress();
    let meta = last_metadata(&state);
    Json(ReindexStatus {
        ok: true,
        status: progress.status,
        indexed: progress.indexed,
        visited: progress.visited,
        queued: progress.queued,
        finished_at: progress.finished_at,
        last_indexed_at: meta.as_ref().map(|m| m.last_indexed_at),
        last_indexed_count: meta.as_ref().map(|m| m.last_indexed_count),
    })
}

async fn schedule_status(State(state): State<AppState>) -> Json<ScheduleStatus> {
    let tracker = match state.schedule.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    let schedule = tracker.schedule();
    Json(ScheduleStatus {
        ok: true,
        hour: schedule.hour(),
        minute: schedule.minute(),
        time: schedule.to_string(),
        last_run_date: tracker.last_run(),
    })
}

async fn update_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<ScheduleUpdate>,
) -> Result<Json<ScheduleStatus>, (StatusCode, Json<ErrorBody>)> {
    authorize(&state, &headers)?;
    let schedule: ReindexSchedule = update
        .time
        .parse()
        .map_err(|err| bad_request(format!("{err}")))?;
    let saved = match state.schedule.lock() {
        Ok(mut tracker) => tracker.set_schedule(schedule),
        Err(poisoned) => poisoned.into_inner().set_schedule(schedule),
    };
    saved.map_err(|err| {
        tracing::error!(error = %err, "failed to save reindex schedule");
        internal_error(err.into())
    })?;
    tracing::info!(time = %schedule, "reindex schedule updated");
    Ok(schedule_status(State(state)).await)
}

async fn system_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let progress = state.serving.progress();
    let meta = state.serving.snapshot().map(|c| c.metadata().clone());
    let docs_indexed = meta.as_ref().map_or(0, |m| m.last_indexed_count);
    let healthy = docs_indexed > 0;
    Json(SystemStatus {
        ok: true,
        chat: ChatHealth {
            healthy,
            message: if healthy {
                "Чат готовий до роботи"
            } else {
                "Ще немає проіндексованих даних"
            },
            docs_indexed,
            last_indexed_at: meta.map(|m| m.last_indexed_at),
        },
        model: ModelStatus {
            name: state.model.to_string(),
            configured: state.assistant.can_generate(),
        },
        reindex: ReindexHealth {
            running: state.serving.is_crawling(),
            indexed: progress.indexed,
            queued: progress.queued,
        },
    })
}

fn last_metadata(state: &AppState) -> Option<groundcrawl::RunMetadata> {
    match state.serving.store().load_metadata() {
        Ok(meta) => meta,
        Err(err) => {
            tracing::warn!(error = %err, "run metadata unreadable");
            None
        }
    }
}

fn spawn_reindex(state: &AppState, permit: CrawlPermit) {
    let serving = Arc::clone(&state.serving);
    let crawler = Arc::clone(&state.crawler);
    tokio::spawn(async move {
        match serving.reindex_with(permit, &crawler).await {
            Ok(ReindexOutcome::Completed(meta)) => tracing::info!(
                indexed = meta.last_indexed_count,
                previous = meta.prev_indexed_count,
                duration_ms = meta.last_index_duration_ms,
                "reindex complete"
            ),
            Ok(ReindexOutcome::NotConfigured) => tracing::warn!("reindex skipped, SITE_URLS is empty"),
            Ok(ReindexOutcome::AlreadyRunning) => tracing::info!("reindex already running"),
            Err(err) => tracing::error!(error = %err, "reindex failed, previous corpus kept"),
        }
    });
}

async fn run_schedule(state: AppState) {
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    loop {
        ticker.tick().await;
        let now = chrono::Local::now().naive_local();
        let busy = state.serving.is_crawling();
        let due = match state.schedule.lock() {
            Ok(mut tracker) => tracker.poll(now, busy),
            Err(poisoned) => poisoned.into_inner().poll(now, busy),
        };
        if !due {
            continue;
        }
        match state.serving.try_begin_crawl() {
            Some(permit) => {
                tracing::info!("scheduled reindex starting");
                spawn_reindex(&state, permit);
            }
            None => tracing::info!("scheduled reindex skipped, a crawl is already running"),
        }
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, Json<ErrorBody>)> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .or_else(|| {
            headers
                .get("x-admin-token")
                .and_then(|value| value.to_str().ok())
        })
        .map(str::trim);
    if provided == Some(expected) {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody {
                message: "admin token required".to_string(),
            }),
        ))
    }
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn internal_error(err: anyhow::Error) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: err.to_string(),
        }),
    )
}
