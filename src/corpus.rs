//! Records produced by one crawl run and the in-memory pairing served to readers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tantivy::TantivyError;

use crate::index::LexicalIndex;

/// The unit of retrieval: one bounded window of a page's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Identifier, unique and increasing within one corpus (starts at 1).
    pub id: u64,
    /// Source page URL.
    pub url: String,
    /// Title of the source page.
    pub title: String,
    /// Window text.
    pub text: String,
}

/// Facts about the run that produced a corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// When the run finished.
    pub last_indexed_at: DateTime<Utc>,
    /// Pages indexed by this run.
    pub last_indexed_count: usize,
    /// Pages indexed by the run before it.
    pub prev_indexed_count: usize,
    /// Wall-clock duration of the run.
    pub last_index_duration_ms: u64,
}

/// Chunks, their index, and run metadata from a single run.
///
/// Built once and never mutated; readers hold it behind an `Arc`.
#[derive(Debug)]
pub struct Corpus {
    chunks: Vec<Chunk>,
    index: LexicalIndex,
    metadata: RunMetadata,
    by_id: HashMap<u64, usize>,
}

impl Corpus {
    /// Indexes `chunks` in memory and pairs them with `metadata`.
    pub fn build(chunks: Vec<Chunk>, metadata: RunMetadata) -> Result<Self, TantivyError> {
        let index = LexicalIndex::build(&chunks)?;
        Ok(Self::assemble(chunks, index, metadata))
    }

    /// Pairs previously built parts, rejecting an index built over different chunks.
    pub fn from_parts(
        chunks: Vec<Chunk>,
        index: LexicalIndex,
        metadata: RunMetadata,
    ) -> Result<Self, CorpusMismatch> {
        if !index.covers(&chunks) {
            return Err(CorpusMismatch {
                chunks: chunks.len(),
                indexed: index.len(),
            });
        }
        Ok(Self::assemble(chunks, index, metadata))
    }

    fn assemble(chunks: Vec<Chunk>, index: LexicalIndex, metadata: RunMetadata) -> Self {
        let by_id = chunks
            .iter()
            .enumerate()
            .map(|(pos, chunk)| (chunk.id, pos))
            .collect();
        Self {
            chunks,
            index,
            metadata,
            by_id,
        }
    }

    /// All chunks in corpus order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// The lexical index over [`Corpus::chunks`].
    pub fn index(&self) -> &LexicalIndex {
        &self.index
    }

    /// Run metadata.
    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    /// Resolves a chunk id.
    pub fn chunk(&self, id: u64) -> Option<&Chunk> {
        self.by_id.get(&id).map(|&pos| &self.chunks[pos])
    }
}

/// The index does not describe the chunk list it was loaded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("index covers {indexed} chunks but the corpus holds {chunks}")]
pub struct CorpusMismatch {
    /// Chunks in the corpus file.
    pub chunks: usize,
    /// Chunks described by the index.
    pub indexed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: u64, text: &str) -> Chunk {
        Chunk {
            id,
            url: format!("https://site.test/{id}"),
            title: String::new(),
            text: text.to_string(),
        }
    }

    fn metadata() -> RunMetadata {
        RunMetadata {
            last_indexed_at: Utc::now(),
            last_indexed_count: 1,
            prev_indexed_count: 0,
            last_index_duration_ms: 5,
        }
    }

    #[test]
    fn resolves_chunks_by_id() {
        let corpus = Corpus::build(vec![chunk(1, "one"), chunk(2, "two")], metadata()).unwrap();
        assert_eq!(corpus.chunk(2).map(|c| c.text.as_str()), Some("two"));
        assert!(corpus.chunk(3).is_none());
    }

    #[test]
    fn rejects_index_from_another_run() {
        let stale = LexicalIndex::build(&[chunk(1, "old")]).unwrap();
        let err = Corpus::from_parts(vec![chunk(1, "new"), chunk(2, "more")], stale, metadata())
            .expect_err("mismatch");
        assert_eq!(err, CorpusMismatch { chunks: 2, indexed: 1 });
    }
}
