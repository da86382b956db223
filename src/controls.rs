//! Crawl, chunking, and retrieval settings shared across binaries.

use clap::{Args, Parser};
use std::path::PathBuf;
use std::time::Duration;

use crate::chunker::{ChunkConfig, ChunkConfigError};
use crate::frontier::normalize_url;
use crate::generation::{GenerationError, OpenAiCompatible, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::prompt::PromptComposer;

/// Tunable knobs that bound crawl behavior.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrawlControls {
    base_urls: Vec<String>,
    max_pages: usize,
    max_depth: u8,
    fetch_timeout: Duration,
    max_body_bytes: u64,
    min_body_chars: usize,
}

impl CrawlControls {
    /// Constructs a new set of crawl controls. `base_urls` are both the seeds and the allow-list.
    pub fn new(base_urls: Vec<String>, max_pages: usize, max_depth: u8) -> Self {
        Self {
            base_urls,
            max_pages,
            max_depth,
            ..Self::default()
        }
    }

    /// Overrides the per-request timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Overrides the response size ceiling.
    pub fn with_max_body_bytes(mut self, bytes: u64) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    /// Overrides the minimum indexable body length.
    pub fn with_min_body_chars(mut self, chars: usize) -> Self {
        self.min_body_chars = chars;
        self
    }

    /// Configured base URLs, verbatim.
    pub fn base_urls(&self) -> &[String] {
        &self.base_urls
    }

    /// Normalized seed URLs, in configuration order.
    pub fn seed_urls(&self) -> Vec<String> {
        self.base_urls.iter().map(|url| normalize_url(url)).collect()
    }

    /// Page budget: the run stops once this many pages are indexed.
    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Maximum crawl depth allowed.
    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    /// Per-request timeout.
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Responses larger than this are skipped.
    pub fn max_body_bytes(&self) -> u64 {
        self.max_body_bytes
    }

    /// Bodies shorter than this are not indexed.
    pub fn min_body_chars(&self) -> usize {
        self.min_body_chars
    }

    /// Raw string-prefix test against every base URL.
    ///
    /// `https://site.test/dept` also admits `https://site.test/department-other`.
    pub fn is_allowed(&self, url: &str) -> bool {
        self.base_urls.iter().any(|base| url.starts_with(base.as_str()))
    }
}

impl Default for CrawlControls {
    fn default() -> Self {
        Self {
            base_urls: Vec::new(),
            max_pages: 300,
            max_depth: 3,
            fetch_timeout: Duration::from_secs(20),
            max_body_bytes: 2_000_000,
            min_body_chars: crate::normalizer::DEFAULT_MIN_BODY_CHARS,
        }
    }
}

/// Query-time knobs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetrievalSettings {
    /// Maximum chunks handed to the prompt composer.
    pub limit: usize,
    /// Minimum overlap ratio for a curated answer to win.
    pub faq_min_ratio: f64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            limit: 6,
            faq_min_ratio: 0.5,
        }
    }
}

/// Command-line and environment configuration shared by every binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "groundcrawl", about = "Site crawler and retriever settings")]
pub struct Cli {
    /// Base URLs to seed from; also the allow-list, comma separated
    #[arg(long, env = "SITE_URLS", default_value = "")]
    pub site_urls: String,

    /// Stop after this many pages are indexed
    #[arg(long, env = "CRAWL_MAX_PAGES", default_value_t = 300)]
    pub max_pages: usize,

    /// Maximum crawl depth
    #[arg(long, env = "CRAWL_MAX_DEPTH", default_value_t = 3)]
    pub max_depth: u8,

    /// Seconds before a page fetch is abandoned
    #[arg(long, env = "CRAWL_TIMEOUT_SECS", default_value_t = 20)]
    pub timeout_secs: u64,

    /// Responses above this many bytes are skipped
    #[arg(long, env = "CRAWL_MAX_BYTES", default_value_t = 2_000_000)]
    pub max_bytes: u64,

    /// Pages whose cleaned body is shorter than this are not indexed
    #[arg(long, env = "CRAWL_MIN_CHARS", default_value_t = 200)]
    pub min_chars: usize,

    /// Characters per chunk window
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 900)]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, env = "CHUNK_OVERLAP", default_value_t = 120)]
    pub chunk_overlap: usize,

    /// Chunks retrieved per question
    #[arg(long, env = "RETRIEVAL_LIMIT", default_value_t = 6)]
    pub retrieval_limit: usize,

    /// Minimum token overlap for a curated answer to be used
    #[arg(long, env = "FAQ_MIN_RATIO", default_value_t = 0.5)]
    pub faq_min_ratio: f64,

    /// Directory holding persisted corpus generations
    #[arg(long, env = "GROUNDCRAWL_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Curated Q&A file (defaults to <data-dir>/faq.json)
    #[arg(long, env = "GROUNDCRAWL_FAQ_PATH")]
    pub faq_path: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "GROUNDCRAWL_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl Cli {
    /// Converts the parsed CLI into `CrawlControls`.
    pub fn build_controls(&self) -> CrawlControls {
        CrawlControls::new(self.site_urls_vec(), self.max_pages, self.max_depth)
            .with_fetch_timeout(Duration::from_secs(self.timeout_secs.max(1)))
            .with_max_body_bytes(self.max_bytes)
            .with_min_body_chars(self.min_chars)
    }

    /// Validated chunk geometry.
    pub fn chunk_config(&self) -> Result<ChunkConfig, ChunkConfigError> {
        ChunkConfig::new(self.chunk_size, self.chunk_overlap)
    }

    /// Query-time settings.
    pub fn retrieval_settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            limit: self.retrieval_limit.max(1),
            faq_min_ratio: self.faq_min_ratio,
        }
    }

    /// Location of the curated Q&A file.
    pub fn faq_path(&self) -> PathBuf {
        self.faq_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("faq.json"))
    }

    fn site_urls_vec(&self) -> Vec<String> {
        self.site_urls
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Generation endpoint and persona settings for the question-answering binaries.
#[derive(Args, Debug, Clone)]
pub struct AnswerArgs {
    /// OpenAI-compatible API base URL
    #[arg(long, env = "LLM_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub llm_base_url: String,

    /// API key for the generation endpoint
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Chat model used for answers
    #[arg(long, env = "LLM_MODEL", default_value = DEFAULT_MODEL)]
    pub llm_model: String,

    /// Institution name in the Ukrainian prompt, genitive case
    #[arg(long, env = "INSTITUTION_NAME_UK", default_value = "Острозької академії")]
    pub institution_uk: String,

    /// Institution name in the English prompt
    #[arg(long, env = "INSTITUTION_NAME_EN", default_value = "Ostroh Academy")]
    pub institution_en: String,
}

impl AnswerArgs {
    /// Prompt composer carrying the configured institution names.
    pub fn composer(&self) -> PromptComposer {
        PromptComposer::new(self.institution_uk.clone(), self.institution_en.clone())
    }

    /// Generation client; fails when no API key is configured.
    pub fn generator(&self) -> Result<OpenAiCompatible, GenerationError> {
        OpenAiCompatible::new(
            &self.llm_base_url,
            self.llm_api_key.clone(),
            self.llm_model.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["groundcrawl"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("cli parses")
    }

    #[test]
    fn splits_and_trims_site_urls() {
        let cli = parse(&["--site-urls", " https://a.test/ , ,https://b.test/x "]);
        let controls = cli.build_controls();
        assert_eq!(controls.base_urls(), ["https://a.test/", "https://b.test/x"]);
        assert_eq!(controls.seed_urls(), ["https://a.test", "https://b.test/x"]);
    }

    #[test]
    fn allow_list_is_a_raw_prefix_match() {
        let controls = CrawlControls::new(vec!["https://site.test/dept".into()], 10, 2);
        assert!(controls.is_allowed("https://site.test/dept/staff"));
        assert!(controls.is_allowed("https://site.test/department-other"));
        assert!(!controls.is_allowed("https://site.test/news"));
        assert!(!controls.is_allowed("http://site.test/dept"));
    }

    #[test]
    fn invalid_chunk_geometry_is_reported() {
        let cli = parse(&["--chunk-size", "100", "--chunk-overlap", "100"]);
        assert!(cli.chunk_config().is_err());
    }

    #[derive(Parser)]
    struct WithAnswers {
        #[command(flatten)]
        answers: AnswerArgs,
    }

    #[test]
    fn answer_defaults_target_groq() {
        let parsed = WithAnswers::try_parse_from(["groundcrawl"]).expect("parses");
        assert_eq!(parsed.answers.llm_base_url, DEFAULT_BASE_URL);
        assert_eq!(parsed.answers.llm_model, DEFAULT_MODEL);
        assert_eq!(parsed.answers.institution_en, "Ostroh Academy");
    }

    #[test]
    fn faq_path_defaults_under_data_dir() {
        let cli = parse(&["--data-dir", "/tmp/gc"]);
        assert_eq!(cli.faq_path(), PathBuf::from("/tmp/gc/faq.json"));
    }
}
