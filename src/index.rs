//! Lexical index over chunk text, title, and URL, backed by tantivy.
//!
//! Every query token contributes an exact BM25 term clause plus optional
//! prefix and fuzzy clauses per field. Expansion clauses score a constant
//! equal to their boost, so an exact hit always outweighs a near miss.

use std::fmt;
use std::path::Path;

use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::query::{
    AllQuery, BooleanQuery, BoostQuery, FuzzyTermQuery, Occur, Query, RegexQuery, TermQuery,
};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, STORED,
};
use tantivy::{
    doc, DocAddress, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument,
    TantivyError, Term,
};

use crate::corpus::Chunk;
use crate::tokenizer::{analyzer, tokenize, ANALYZER_NAME};

const PREFIX_BOOST: f32 = 0.375;
const FUZZY_BOOST: f32 = 0.45;

/// Largest edit distance tantivy builds Levenshtein automata for.
const MAX_FUZZY_DISTANCE: u8 = 2;

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Term expansion applied to each query token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    /// Also match indexed terms that start with the query token.
    pub prefix: bool,
    /// Maximum edit distance as a fraction of the query token length; `0.0` disables.
    /// The resulting distance is capped at two edits.
    pub fuzzy: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            prefix: true,
            fuzzy: 0.2,
        }
    }
}

/// One ranked match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    /// Chunk identifier.
    pub id: u64,
    /// Relevance, higher is better.
    pub score: f32,
}

#[derive(Debug, Clone, Copy)]
struct Fields {
    id: Field,
    text: Field,
    title: Field,
    url: Field,
}

impl Fields {
    fn schema() -> (Schema, Self) {
        let indexing = TextFieldIndexing::default()
            .set_tokenizer(ANALYZER_NAME)
            .set_index_option(IndexRecordOption::WithFreqs);
        let searchable = TextOptions::default().set_indexing_options(indexing);

        let mut builder = Schema::builder();
        let fields = Self {
            id: builder.add_u64_field("id", STORED),
            text: builder.add_text_field("text", searchable.clone()),
            title: builder.add_text_field("title", searchable.clone()),
            url: builder.add_text_field("url", searchable),
        };
        (builder.build(), fields)
    }

    fn resolve(schema: &Schema) -> Result<Self, TantivyError> {
        Ok(Self {
            id: schema.get_field("id")?,
            text: schema.get_field("text")?,
            title: schema.get_field("title")?,
            url: schema.get_field("url")?,
        })
    }

    fn searchable(&self) -> [Field; 3] {
        [self.text, self.title, self.url]
    }
}

/// Searchable view over one published set of chunks.
#[derive(Clone)]
pub struct LexicalIndex {
    reader: IndexReader,
    fields: Fields,
}

impl fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LexicalIndex")
            .field("docs", &self.len())
            .finish()
    }
}

impl LexicalIndex {
    /// Indexes every chunk's text, title, and URL in memory.
    pub fn build(chunks: &[Chunk]) -> Result<Self, TantivyError> {
        let (schema, fields) = Fields::schema();
        Self::populate(Index::create_in_ram(schema), fields, chunks)
    }

    /// Indexes `chunks` into the empty directory `dir`.
    pub fn create_in_dir(dir: &Path, chunks: &[Chunk]) -> Result<Self, TantivyError> {
        let (schema, fields) = Fields::schema();
        Self::populate(Index::create_in_dir(dir, schema)?, fields, chunks)
    }

    /// Opens an index previously written by [`LexicalIndex::create_in_dir`].
    pub fn open(dir: &Path) -> Result<Self, TantivyError> {
        let index = Index::open_in_dir(dir)?;
        let fields = Fields::resolve(&index.schema())?;
        Self::with_reader(index, fields)
    }

    fn populate(index: Index, fields: Fields, chunks: &[Chunk]) -> Result<Self, TantivyError> {
        index.tokenizers().register(ANALYZER_NAME, analyzer());
        let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        for chunk in chunks {
            writer.add_document(doc!(
                fields.id => chunk.id,
                fields.text => chunk.text.as_str(),
                fields.title => chunk.title.as_str(),
                fields.url => chunk.url.as_str(),
            ))?;
        }
        writer.commit()?;
        writer.wait_merging_threads()?;
        Self::with_reader(index, fields)
    }

    fn with_reader(index: Index, fields: Fields) -> Result<Self, TantivyError> {
        index.tokenizers().register(ANALYZER_NAME, analyzer());
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self { reader, fields })
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }

    /// `true` when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` when this index holds exactly the ids of `chunks`.
    pub fn covers(&self, chunks: &[Chunk]) -> bool {
        let mut indexed = match self.stored_ids() {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read indexed chunk ids");
                return false;
            }
        };
        let mut expected: Vec<u64> = chunks.iter().map(|chunk| chunk.id).collect();
        indexed.sort_unstable();
        expected.sort_unstable();
        indexed == expected
    }

    /// Ranks chunks against `query`, best first; ties go to the lower chunk id.
    pub fn search(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<SearchHit>, TantivyError> {
        let mut tokens = tokenize(query);
        tokens.sort();
        tokens.dedup();

        let searcher = self.reader.searcher();
        let docs = searcher.num_docs() as usize;
        if tokens.is_empty() || docs == 0 {
            return Ok(Vec::new());
        }

        let query = self.expand(&tokens, options)?;
        let mut hits = searcher
            .search(&query, &TopDocs::with_limit(docs))?
            .into_iter()
            .map(|(score, address)| {
                Ok(SearchHit {
                    id: self.stored_id(&searcher, address)?,
                    score,
                })
            })
            .collect::<Result<Vec<_>, TantivyError>>()?;
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        Ok(hits)
    }

    fn expand(
        &self,
        tokens: &[String],
        options: SearchOptions,
    ) -> Result<BooleanQuery, TantivyError> {
        let mut clauses = Vec::new();
        for token in tokens {
            let distance = fuzzy_distance(token, options.fuzzy);
            for field in self.fields.searchable() {
                let term = Term::from_field_text(field, token);
                clauses.push(should(Box::new(TermQuery::new(
                    term.clone(),
                    IndexRecordOption::WithFreqs,
                ))));
                if options.prefix {
                    // analyzed tokens are alphanumeric, never regex syntax
                    let prefix = RegexQuery::from_pattern(&format!("{token}.+"), field)?;
                    clauses.push(should(Box::new(BoostQuery::new(
                        Box::new(prefix),
                        PREFIX_BOOST,
                    ))));
                }
                if distance > 0 {
                    let fuzzy = FuzzyTermQuery::new(term, distance, false);
                    clauses.push(should(Box::new(BoostQuery::new(
                        Box::new(fuzzy),
                        FUZZY_BOOST,
                    ))));
                }
            }
        }
        Ok(BooleanQuery::new(clauses))
    }

    fn stored_ids(&self) -> Result<Vec<u64>, TantivyError> {
        let searcher = self.reader.searcher();
        searcher
            .search(&AllQuery, &DocSetCollector)?
            .into_iter()
            .map(|address| self.stored_id(&searcher, address))
            .collect()
    }

    fn stored_id(&self, searcher: &Searcher, address: DocAddress) -> Result<u64, TantivyError> {
        let doc: TantivyDocument = searcher.doc(address)?;
        doc.get_first(self.fields.id)
            .and_then(|value| value.as_u64())
            .ok_or_else(|| TantivyError::SchemaError("document without a chunk id".into()))
    }
}

fn should(query: Box<dyn Query>) -> (Occur, Box<dyn Query>) {
    (Occur::Should, query)
}

/// Edits allowed for `token`: `floor(len * fuzzy)`, at most [`MAX_FUZZY_DISTANCE`].
fn fuzzy_distance(token: &str, fuzzy: f64) -> u8 {
    let allowed = (token.chars().count() as f64 * fuzzy).floor();
    allowed.clamp(0.0, f64::from(MAX_FUZZY_DISTANCE)) as u8
}
