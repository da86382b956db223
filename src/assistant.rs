//! One chat turn: curated answers first, then retrieval-grounded generation.

use serde::Serialize;
use std::sync::Arc;

use crate::controls::RetrievalSettings;
use crate::corpus::{Chunk, Corpus};
use crate::faq::{FaqBook, FaqMatcher, Language};
use crate::generation::{AnswerGenerator, GenerationError, GenerationRequest};
use crate::prompt::{declares_insufficient, PromptComposer};
use crate::retriever::{Retrieval, Retriever};

/// Citation attached to a generated answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    /// Page URL.
    pub url: String,
    /// Page title.
    pub title: String,
}

impl From<&Chunk> for SourceRef {
    fn from(chunk: &Chunk) -> Self {
        Self {
            url: chunk.url.clone(),
            title: chunk.title.clone(),
        }
    }
}

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOrigin {
    /// A curated entry matched.
    Faq,
    /// The generator answered from retrieved chunks.
    Generated,
}

/// Reply to one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatAnswer {
    /// Answer text.
    pub answer: String,
    /// Pages the answer was grounded on; empty for curated answers.
    pub sources: Vec<SourceRef>,
    /// The answer admits the sources were not enough.
    pub fallback: bool,
    /// Answer origin.
    pub origin: AnswerOrigin,
}

/// Everything needed to answer a question except the corpus and curated entries,
/// which the caller snapshots per request.
pub struct Assistant {
    matcher: FaqMatcher,
    retriever: Retriever,
    composer: PromptComposer,
    generator: Option<Arc<dyn AnswerGenerator>>,
    limit: usize,
}

impl Assistant {
    /// `generator` may be absent; then only curated answers succeed.
    pub fn new(
        settings: RetrievalSettings,
        composer: PromptComposer,
        generator: Option<Arc<dyn AnswerGenerator>>,
    ) -> Self {
        Self {
            matcher: FaqMatcher::new(settings.faq_min_ratio),
            retriever: Retriever::default(),
            composer,
            generator,
            limit: settings.limit,
        }
    }

    /// `true` when a generator is configured.
    pub fn can_generate(&self) -> bool {
        self.generator.is_some()
    }

    /// Chunks that would ground `question`.
    pub fn retrieve(&self, corpus: Option<&Corpus>, question: &str, limit: usize) -> Retrieval {
        self.retriever.search(corpus, question, limit)
    }

    /// Grounding prompt for `question`, plus the chunks it cites.
    pub fn prompt(
        &self,
        corpus: Option<&Corpus>,
        question: &str,
        lang: Language,
    ) -> (String, Vec<Chunk>) {
        let chunks = self.retrieve(corpus, question, self.limit).into_chunks();
        let prompt = self.composer.compose(&chunks, question, lang);
        (prompt, chunks)
    }

    /// Answers `question`, preferring a curated entry in `lang`.
    pub async fn answer(
        &self,
        book: &FaqBook,
        corpus: Option<&Corpus>,
        question: &str,
        lang: Language,
    ) -> Result<ChatAnswer, GenerationError> {
        if let Some(hit) = self.matcher.best_match(book, question, lang) {
            tracing::info!(faq_id = hit.entry.id, ratio = hit.ratio, "curated answer");
            return Ok(ChatAnswer {
                answer: hit.entry.answer.clone(),
                sources: Vec::new(),
                fallback: false,
                origin: AnswerOrigin::Faq,
            });
        }

        let generator = self
            .generator
            .as_ref()
            .ok_or(GenerationError::MissingApiKey)?;
        let (prompt, chunks) = self.prompt(corpus, question, lang);
        tracing::debug!(contexts = chunks.len(), %lang, "generating answer");
        let answer = generator.answer(&GenerationRequest::new(&prompt)).await?;
        Ok(ChatAnswer {
            fallback: declares_insufficient(&answer),
            answer,
            sources: chunks.iter().map(SourceRef::from).collect(),
            origin: AnswerOrigin::Generated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    use crate::corpus::RunMetadata;
    use crate::faq::FaqEntry;

    #[derive(Default)]
    struct Scripted {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AnswerGenerator for Scripted {
        async fn answer(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(request.prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn corpus() -> Corpus {
        Corpus::build(
            vec![Chunk {
                id: 1,
                url: "https://site.test/admission".into(),
                title: "Admission".into(),
                text: "admission deadline is June".into(),
            }],
            RunMetadata {
                last_indexed_at: Utc::now(),
                last_indexed_count: 1,
                prev_indexed_count: 0,
                last_index_duration_ms: 1,
            },
        )
        .unwrap()
    }

    fn book() -> FaqBook {
        FaqBook::new(vec![FaqEntry {
            id: 9,
            question: "contact email".into(),
            answer: "office@site.test".into(),
            lang: Language::En,
            enabled: true,
        }])
    }

    fn assistant(generator: Arc<Scripted>) -> Assistant {
        Assistant::new(
            RetrievalSettings::default(),
            PromptComposer::default(),
            Some(generator as Arc<dyn AnswerGenerator>),
        )
    }

    #[tokio::test(flavor = "current_thread")]
    async fn curated_answers_skip_generation() {
        let generator = Arc::new(Scripted::default());
        let reply = assistant(generator.clone())
            .answer(&book(), Some(&corpus()), "what is the contact", Language::En)
            .await
            .unwrap();
        assert_eq!(reply.origin, AnswerOrigin::Faq);
        assert_eq!(reply.answer, "office@site.test");
        assert!(reply.sources.is_empty());
        assert!(generator.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn generated_answers_cite_retrieved_pages() {
        let generator = Arc::new(Scripted {
            reply: "The deadline is in June.".into(),
            ..Scripted::default()
        });
        let reply = assistant(generator.clone())
            .answer(&book(), Some(&corpus()), "admission deadline", Language::En)
            .await
            .unwrap();
        assert_eq!(reply.origin, AnswerOrigin::Generated);
        assert!(!reply.fallback);
        assert_eq!(
            reply.sources,
            vec![SourceRef {
                url: "https://site.test/admission".into(),
                title: "Admission".into()
            }]
        );
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("Text: admission deadline is June"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn insufficient_answers_are_flagged() {
        let generator = Arc::new(Scripted {
            reply: "На жаль, я не маю даних.".into(),
            ..Scripted::default()
        });
        let reply = assistant(generator)
            .answer(&FaqBook::default(), None, "гуртожиток", Language::Uk)
            .await
            .unwrap();
        assert!(reply.fallback);
        assert!(reply.sources.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_generator_is_an_error() {
        let assistant =
            Assistant::new(RetrievalSettings::default(), PromptComposer::default(), None);
        let err = assistant
            .answer(&FaqBook::default(), None, "hours", Language::En)
            .await
            .expect_err("no generator");
        assert!(matches!(err, GenerationError::MissingApiKey));
    }
}
