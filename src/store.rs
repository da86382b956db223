//! On-disk corpus generations.
//!
//! Each run writes `docs.json`, `docs_meta.json`, and a tantivy `index/` directory into a
//! fresh `generation-<millis>` directory, then atomically renames a `CURRENT` pointer file
//! onto it. Loaders follow the pointer, so the three artifacts always come from one run.
//!
//! Publishers hold an exclusive advisory lock on `LOCK` for the whole write, swap, and
//! prune; loaders hold it shared while they read. Separate processes pointed at the same
//! directory therefore never remove a generation another one is writing or reading.

use chrono::Utc;
use fd_lock::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tantivy::TantivyError;
use thiserror::Error;

use crate::corpus::{Chunk, Corpus, CorpusMismatch, RunMetadata};
use crate::index::LexicalIndex;

/// Record layout version written into every JSON artifact.
pub const FORMAT_VERSION: u32 = 2;

const CURRENT: &str = "CURRENT";
const CURRENT_TMP: &str = "CURRENT.tmp";
const LOCK: &str = "LOCK";
const DOCS: &str = "docs.json";
const META: &str = "docs_meta.json";
const INDEX_DIR: &str = "index";
const GENERATION_PREFIX: &str = "generation-";

/// Persistence failures, surfaced so the serving layer can keep its previous corpus.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("io error at {}: {source}", .path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Artifact is not valid JSON of the expected shape.
    #[error("malformed {}: {source}", .path.display())]
    Json {
        /// Artifact path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
    /// The search index could not be written or opened.
    #[error("index error at {}: {source}", .path.display())]
    Index {
        /// Index directory.
        path: PathBuf,
        /// Underlying error.
        source: TantivyError,
    },
    /// Artifact was written by an incompatible release.
    #[error("{} has format version {found}, expected {FORMAT_VERSION}", .path.display())]
    Version {
        /// Artifact path.
        path: PathBuf,
        /// Version found on disk.
        found: u32,
    },
    /// The `CURRENT` pointer does not name a generation directory.
    #[error("current pointer names invalid generation {0:?}")]
    Pointer(String),
    /// Chunks and index disagree.
    #[error(transparent)]
    Inconsistent(#[from] CorpusMismatch),
}

#[derive(Serialize, Deserialize)]
struct DocsFile<T> {
    version: u32,
    chunks: T,
}

#[derive(Serialize, Deserialize)]
struct MetaFile<T> {
    version: u32,
    #[serde(flatten)]
    metadata: T,
}

trait Versioned {
    fn version(&self) -> u32;
}

impl<T> Versioned for DocsFile<T> {
    fn version(&self) -> u32 {
        self.version
    }
}

impl<T> Versioned for MetaFile<T> {
    fn version(&self) -> u32 {
        self.version
    }
}

/// Directory of corpus generations.
#[derive(Debug, Clone)]
pub struct CorpusStore {
    root: PathBuf,
}

impl CorpusStore {
    /// Opens (without touching) the store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `chunks` and `metadata` as a new generation, makes it current, and
    /// returns the corpus served from it.
    ///
    /// Generations older than the new one are removed afterwards; failures there are
    /// only logged.
    pub fn publish(&self, chunks: Vec<Chunk>, metadata: RunMetadata) -> Result<Corpus, StoreError> {
        fs::create_dir_all(&self.root).map_err(|source| io_error(&self.root, source))?;
        let mut lock = self.lock_file()?;
        let _guard = lock
            .write()
            .map_err(|source| io_error(&self.root.join(LOCK), source))?;

        let (name, dir) = self.fresh_generation(Utc::now().timestamp_millis())?;
        write_json(
            &dir.join(DOCS),
            &DocsFile {
                version: FORMAT_VERSION,
                chunks: &chunks,
            },
        )?;
        write_json(
            &dir.join(META),
            &MetaFile {
                version: FORMAT_VERSION,
                metadata: &metadata,
            },
        )?;
        let index_dir = dir.join(INDEX_DIR);
        fs::create_dir(&index_dir).map_err(|source| io_error(&index_dir, source))?;
        let index = LexicalIndex::create_in_dir(&index_dir, &chunks)
            .map_err(|source| index_error(&index_dir, source))?;
        sync_dir(&dir)?;

        self.point_at(&name)?;
        tracing::info!(
            generation = %name,
            chunks = chunks.len(),
            indexed = index.len(),
            "corpus published"
        );
        self.prune_older_than(&name);
        Ok(Corpus::from_parts(chunks, index, metadata)?)
    }

    /// Loads the current generation; `Ok(None)` when no run has been published.
    pub fn load(&self) -> Result<Option<Corpus>, StoreError> {
        self.read_current(|dir| {
            let docs: DocsFile<Vec<Chunk>> = read_json(&dir.join(DOCS))?;
            let meta: MetaFile<RunMetadata> = read_json(&dir.join(META))?;
            let index_dir = dir.join(INDEX_DIR);
            let index =
                LexicalIndex::open(&index_dir).map_err(|source| index_error(&index_dir, source))?;
            Ok(Corpus::from_parts(docs.chunks, index, meta.metadata)?)
        })
    }

    /// Metadata of the current generation, without loading chunks or index.
    pub fn load_metadata(&self) -> Result<Option<RunMetadata>, StoreError> {
        self.read_current(|dir| {
            let meta: MetaFile<RunMetadata> = read_json(&dir.join(META))?;
            Ok(meta.metadata)
        })
    }

    /// Directory the `CURRENT` pointer names, if any.
    pub fn current_generation(&self) -> Result<Option<PathBuf>, StoreError> {
        let pointer = self.root.join(CURRENT);
        let name = match fs::read_to_string(&pointer) {
            Ok(name) => name.trim().to_string(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error(&pointer, source)),
        };
        if !is_generation_name(&name) {
            return Err(StoreError::Pointer(name));
        }
        Ok(Some(self.root.join(name)))
    }

    fn read_current<T>(
        &self,
        read: impl FnOnce(&Path) -> Result<T, StoreError>,
    ) -> Result<Option<T>, StoreError> {
        if !self.root.is_dir() {
            return Ok(None);
        }
        let lock = self.lock_file()?;
        let _guard = lock
            .read()
            .map_err(|source| io_error(&self.root.join(LOCK), source))?;
        match self.current_generation()? {
            Some(dir) => read(&dir).map(Some),
            None => Ok(None),
        }
    }

    fn lock_file(&self) -> Result<RwLock<File>, StoreError> {
        let path = self.root.join(LOCK);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| io_error(&path, source))?;
        Ok(RwLock::new(file))
    }

    fn fresh_generation(&self, stamp: i64) -> Result<(String, PathBuf), StoreError> {
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{GENERATION_PREFIX}{stamp}")
            } else {
                format!("{GENERATION_PREFIX}{stamp}-{attempt}")
            };
            let dir = self.root.join(&name);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((name, dir)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(source) => return Err(io_error(&dir, source)),
            }
        }
    }

    fn point_at(&self, name: &str) -> Result<(), StoreError> {
        let tmp = self.root.join(CURRENT_TMP);
        let mut file = File::create(&tmp).map_err(|source| io_error(&tmp, source))?;
        file.write_all(name.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|source| io_error(&tmp, source))?;
        let pointer = self.root.join(CURRENT);
        fs::rename(&tmp, &pointer).map_err(|source| io_error(&pointer, source))?;
        sync_dir(&self.root)
    }

    fn prune_older_than(&self, published: &str) {
        let Some(cutoff) = generation_key(published) else {
            return;
        };
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(root = %self.root.display(), error = %err, "cannot list generations");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !generation_key(name).is_some_and(|key| key < cutoff) {
                continue;
            }
            if let Err(err) = fs::remove_dir_all(entry.path()) {
                tracing::warn!(generation = name, error = %err, "cannot remove old generation");
            }
        }
    }
}

/// `(millis, attempt)` of a generation directory name; orders generations by age.
fn generation_key(name: &str) -> Option<(i64, u32)> {
    let rest = name.strip_prefix(GENERATION_PREFIX)?;
    let (stamp, attempt) = match rest.split_once('-') {
        Some((stamp, attempt)) => (stamp, attempt.parse().ok()?),
        None => (rest, 0),
    };
    if stamp.is_empty() || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((stamp.parse().ok()?, attempt))
}

fn is_generation_name(name: &str) -> bool {
    generation_key(name).is_some()
}

pub(crate) fn io_error(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn index_error(path: &Path, source: TantivyError) -> StoreError {
    StoreError::Index {
        path: path.to_path_buf(),
        source,
    }
}

/// Flushes directory entries (renames, creations) of `dir` to disk.
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<(), StoreError> {
    File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|source| io_error(dir, source))
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<(), StoreError> {
    Ok(())
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let file = File::create(path).map_err(|source| io_error(path, source))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let file = writer
        .into_inner()
        .map_err(|err| io_error(path, err.into_error()))?;
    file.sync_all().map_err(|source| io_error(path, source))
}

fn read_json<T: DeserializeOwned + Versioned>(path: &Path) -> Result<T, StoreError> {
    let file = File::open(path).map_err(|source| io_error(path, source))?;
    let value: T =
        serde_json::from_reader(BufReader::new(file)).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    if value.version() != FORMAT_VERSION {
        return Err(StoreError::Version {
            path: path.to_path_buf(),
            found: value.version(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn chunks(texts: &[&str]) -> Vec<Chunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                id: i as u64 + 1,
                url: "https://site.test".into(),
                title: "Home".into(),
                text: text.to_string(),
            })
            .collect()
    }

    fn metadata(millis: i64) -> RunMetadata {
        RunMetadata {
            last_indexed_at: Utc.timestamp_millis_opt(millis).unwrap(),
            last_indexed_count: 1,
            prev_indexed_count: 0,
            last_index_duration_ms: 42,
        }
    }

    fn published(store: &CorpusStore, texts: &[&str]) -> PathBuf {
        store.publish(chunks(texts), metadata(1_000)).unwrap();
        store.current_generation().unwrap().expect("current generation")
    }

    fn generations(root: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(root)
            .unwrap()
            .flatten()
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| is_generation_name(name))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn empty_store_loads_nothing() {
        let dir = TempDir::new().unwrap();
        let store = CorpusStore::new(dir.path().join("data"));
        assert!(store.load().unwrap().is_none());
        assert!(store.load_metadata().unwrap().is_none());
        assert!(!dir.path().join("data").exists());
    }

    #[test]
    fn published_corpus_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = CorpusStore::new(dir.path());
        let served = store
            .publish(chunks(&["admission deadline is June"]), metadata(1_000))
            .unwrap();

        let loaded = store.load().unwrap().expect("corpus");
        assert_eq!(loaded.chunks(), served.chunks());
        assert_eq!(loaded.metadata(), &metadata(1_000));
        assert_eq!(store.load_metadata().unwrap(), Some(metadata(1_000)));
        let hits = loaded.index().search("deadline", Default::default()).unwrap();
        assert_eq!(hits.first().map(|hit| hit.id), Some(1));
    }

    #[test]
    fn newer_generation_replaces_older() {
        let dir = TempDir::new().unwrap();
        let store = CorpusStore::new(dir.path());
        let first = published(&store, &["first run"]);
        let second = published(&store, &["second run", "more"]);

        assert_ne!(first, second);
        assert!(!first.exists());
        let loaded = store.load().unwrap().expect("corpus");
        assert_eq!(loaded.chunks().len(), 2);
        assert_eq!(loaded.chunks()[0].text, "second run");
    }

    #[test]
    fn generations_newer_than_the_published_one_survive_pruning() {
        let dir = TempDir::new().unwrap();
        let store = CorpusStore::new(dir.path());
        let stale = dir.path().join("generation-1");
        let in_flight = dir.path().join(format!("generation-{}", i64::MAX));
        fs::create_dir_all(&stale).unwrap();
        fs::create_dir_all(in_flight.join(INDEX_DIR)).unwrap();

        let current = published(&store, &["text"]);
        assert!(!stale.exists());
        assert!(in_flight.exists());
        assert!(current.exists());
        assert_eq!(store.load().unwrap().expect("corpus").chunks()[0].text, "text");
    }

    #[test]
    fn concurrent_publishers_leave_one_loadable_generation() {
        let dir = TempDir::new().unwrap();
        std::thread::scope(|scope| {
            for run in 0..4 {
                let store = CorpusStore::new(dir.path());
                scope.spawn(move || {
                    let text = format!("run {run}");
                    store.publish(chunks(&[text.as_str()]), metadata(1_000)).unwrap();
                });
            }
        });

        let store = CorpusStore::new(dir.path());
        let loaded = store.load().unwrap().expect("corpus");
        assert_eq!(loaded.chunks().len(), 1);
        assert!(loaded.chunks()[0].text.starts_with("run "));
        assert_eq!(generations(dir.path()).len(), 1);
    }

    #[test]
    fn generation_names_order_by_stamp_then_attempt() {
        assert_eq!(generation_key("generation-1000"), Some((1_000, 0)));
        assert_eq!(generation_key("generation-1000-2"), Some((1_000, 2)));
        assert!(generation_key("generation-1000") < generation_key("generation-1000-1"));
        assert!(generation_key("generation-999-7") < generation_key("generation-1000"));
        assert_eq!(generation_key("generation-"), None);
        assert_eq!(generation_key("generation--1"), None);
        assert_eq!(generation_key("../elsewhere"), None);
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = CorpusStore::new(dir.path());
        let generation = published(&store, &["text"]);
        fs::write(generation.join(DOCS), r#"{"version":99,"chunks":[]}"#).unwrap();
        assert!(matches!(
            store.load(),
            Err(StoreError::Version { found: 99, .. })
        ));
    }

    #[test]
    fn truncated_artifact_is_a_json_error() {
        let dir = TempDir::new().unwrap();
        let store = CorpusStore::new(dir.path());
        let generation = published(&store, &["text"]);
        fs::write(generation.join(META), "{\"version\":2,\"last").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Json { .. })));
    }

    #[test]
    fn missing_index_is_an_index_error() {
        let dir = TempDir::new().unwrap();
        let store = CorpusStore::new(dir.path());
        let generation = published(&store, &["text"]);
        fs::remove_dir_all(generation.join(INDEX_DIR)).unwrap();
        assert!(matches!(store.load(), Err(StoreError::Index { .. })));
    }

    #[test]
    fn mismatched_chunks_and_index_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = CorpusStore::new(dir.path());
        let generation = published(&store, &["one", "two"]);
        fs::write(
            generation.join(DOCS),
            r#"{"version":2,"chunks":[{"id":1,"url":"u","title":"t","text":"one"}]}"#,
        )
        .unwrap();
        assert!(matches!(store.load(), Err(StoreError::Inconsistent(_))));
    }

    #[test]
    fn bogus_pointer_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CURRENT), "../elsewhere").unwrap();
        let store = CorpusStore::new(dir.path());
        assert!(matches!(store.load(), Err(StoreError::Pointer(_))));
    }
}
