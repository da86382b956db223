//! Query-time chunk retrieval over the served corpus.

use serde::Serialize;

use crate::corpus::{Chunk, Corpus};
use crate::index::SearchOptions;

/// What a search produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "chunks", rename_all = "snake_case")]
pub enum Retrieval {
    /// No crawl has completed, so there is nothing to ground on.
    NoCorpus,
    /// Chunks ranked best first; may be empty when nothing matched.
    Ranked(Vec<Chunk>),
}

impl Retrieval {
    /// Ranked chunks, or an empty list when no corpus is loaded.
    pub fn into_chunks(self) -> Vec<Chunk> {
        match self {
            Retrieval::NoCorpus => Vec::new(),
            Retrieval::Ranked(chunks) => chunks,
        }
    }

    /// `true` when no chunk came back, for either reason.
    pub fn is_empty(&self) -> bool {
        match self {
            Retrieval::NoCorpus => true,
            Retrieval::Ranked(chunks) => chunks.is_empty(),
        }
    }
}

/// Resolves index hits to chunk records.
#[derive(Debug, Clone, Copy, Default)]
pub struct Retriever {
    options: SearchOptions,
}

impl Retriever {
    /// Retriever with custom term expansion.
    pub fn new(options: SearchOptions) -> Self {
        Self { options }
    }

    /// Up to `limit` chunks for `query`, most relevant first.
    pub fn search(&self, corpus: Option<&Corpus>, query: &str, limit: usize) -> Retrieval {
        let Some(corpus) = corpus else {
            return Retrieval::NoCorpus;
        };
        let hits = match corpus.index().search(query, self.options) {
            Ok(hits) => hits,
            Err(err) => {
                tracing::warn!(error = %err, "index search failed");
                Vec::new()
            }
        };
        let chunks = hits
            .into_iter()
            .filter_map(|hit| corpus.chunk(hit.id))
            .take(limit)
            .cloned()
            .collect();
        Retrieval::Ranked(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::RunMetadata;
    use chrono::Utc;

    fn corpus(texts: &[&str]) -> Corpus {
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                id: i as u64 + 1,
                url: format!("https://site.test/{i}"),
                title: String::new(),
                text: text.to_string(),
            })
            .collect();
        Corpus::build(
            chunks,
            RunMetadata {
                last_indexed_at: Utc::now(),
                last_indexed_count: texts.len(),
                prev_indexed_count: 0,
                last_index_duration_ms: 1,
            },
        )
        .unwrap()
    }

    #[test]
    fn returns_the_matching_chunk() {
        let corpus = corpus(&["admission deadline is June"]);
        let retrieval = Retriever::default().search(Some(&corpus), "admission deadline", 1);
        let chunks = retrieval.into_chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, 1);
    }

    #[test]
    fn respects_the_limit() {
        let corpus = corpus(&["fees one", "fees two", "fees three"]);
        let chunks = Retriever::default()
            .search(Some(&corpus), "fees", 2)
            .into_chunks();
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn missing_corpus_is_distinct_from_no_match() {
        let retriever = Retriever::default();
        assert_eq!(retriever.search(None, "fees", 6), Retrieval::NoCorpus);

        let corpus = corpus(&["library hours"]);
        let miss = retriever.search(Some(&corpus), "zzzzzz", 6);
        assert_eq!(miss, Retrieval::Ranked(Vec::new()));
        assert!(miss.is_empty());
    }

    #[test]
    fn serializes_with_a_status_tag() {
        let json = serde_json::to_value(Retrieval::NoCorpus).unwrap();
        assert_eq!(json, serde_json::json!({"status": "no_corpus"}));
    }
}
