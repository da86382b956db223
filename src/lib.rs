#![warn(missing_docs)]
//! Crawl an institution's public site, index the text, and retrieve grounding
//! context for question answering.

pub mod assistant;
pub mod chunker;
pub mod controls;
pub mod corpus;
pub mod crawler;
pub mod faq;
pub mod fetch;
pub mod frontier;
pub mod generation;
pub mod html;
pub mod index;
pub mod normalizer;
pub mod prompt;
pub mod retriever;
pub mod schedule;
pub mod serving;
pub mod store;
pub mod telemetry;
pub mod tokenizer;

pub use assistant::{AnswerOrigin, Assistant, ChatAnswer, SourceRef};
pub use chunker::{ChunkConfig, ChunkConfigError};
pub use controls::{AnswerArgs, Cli, CrawlControls, RetrievalSettings};
pub use corpus::{Chunk, Corpus, RunMetadata};
pub use crawler::{CrawlOutcome, CrawlProgress, CrawlStatus, Crawler, ProgressObserver};
pub use faq::{FaqBook, FaqEntry, FaqMatcher, Language};
pub use fetch::{FetchError, HttpFetcher, PageFetcher};
pub use frontier::{CrawlTarget, Frontier, FrontierError};
pub use generation::{AnswerGenerator, GenerationError, GenerationRequest, OpenAiCompatible};
pub use index::{LexicalIndex, SearchOptions};
pub use normalizer::{Document, FetchedPage, Normalizer};
pub use prompt::PromptComposer;
pub use retriever::{Retrieval, Retriever};
pub use schedule::{ReindexSchedule, ScheduleTracker};
pub use serving::{CrawlPermit, ReindexOutcome, ServingState};
pub use store::{CorpusStore, StoreError};
pub use tokenizer::tokenize;
