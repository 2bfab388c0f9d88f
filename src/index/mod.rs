pub mod buffer;
pub mod compactor;
pub mod document;
pub mod executive;
pub mod indexer;
pub mod mutator;
pub mod queue;
pub mod schema;
pub mod writer;

use crate::error::{QuarryError, Result};
use schema::{build_schema, IndexFields, TEXT_TOKENIZER};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tantivy::directory::error::LockError;
use tantivy::directory::{Directory, INDEX_WRITER_LOCK};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, TextAnalyzer};
use tantivy::Index as TantivyIndex;
pub use writer::{DrainGuard, ManagedIndexWriter};

const WRITER_OPEN_ATTEMPTS: usize = 3;
const WRITER_RETRY_DELAY: Duration = Duration::from_millis(100);

/// The on-disk tantivy index behind an indexer.
///
/// Only the index handle itself is kept; writers and readers are opened per
/// drain, optimize pass or search and dropped afterwards.
pub struct Index {
    inner: TantivyIndex,
    fields: IndexFields,
    path: PathBuf,
}

impl Index {
    /// True if `path` holds a committed tantivy index.
    pub fn exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().join("meta.json").exists()
    }

    /// Create a new, empty index at `path` (directories included).
    pub fn create_in_dir<P: AsRef<Path>>(path: P) -> Result<Self> {
        std::fs::create_dir_all(path.as_ref())?;
        let inner = TantivyIndex::create_in_dir(path.as_ref(), build_schema())?;
        Self::wrap(inner, path.as_ref())
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !Self::exists(path.as_ref()) {
            return Err(QuarryError::IndexNotFound(
                path.as_ref().display().to_string(),
            ));
        }
        let inner = TantivyIndex::open_in_dir(path.as_ref())?;
        Self::wrap(inner, path.as_ref())
    }

    fn wrap(inner: TantivyIndex, path: &Path) -> Result<Self> {
        let text_analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(LowerCaser)
            .build();
        inner.tokenizers().register(TEXT_TOKENIZER, text_analyzer);

        let fields = IndexFields::resolve(&inner.schema())?;
        Ok(Index {
            inner,
            fields,
            path: path.to_path_buf(),
        })
    }

    /// Open a writer bound to `guard`, retrying briefly while another writer
    /// holds the directory lock.
    pub fn writer(&self, buffer_bytes: usize, guard: DrainGuard) -> Result<ManagedIndexWriter> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.writer(buffer_bytes) {
                Ok(w) => return Ok(ManagedIndexWriter::new(w, guard)),
                Err(tantivy::TantivyError::LockFailure(LockError::LockBusy, msg))
                    if attempt < WRITER_OPEN_ATTEMPTS =>
                {
                    tracing::debug!(
                        "[INDEX {}] writer lock busy (attempt {}): {:?}",
                        self.path.display(),
                        attempt,
                        msg
                    );
                    std::thread::sleep(WRITER_RETRY_DELAY);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// True if some writer currently holds the directory lock.
    pub fn is_locked(&self) -> bool {
        match self.inner.directory().acquire_lock(&INDEX_WRITER_LOCK) {
            Ok(lock) => {
                drop(lock);
                false
            }
            Err(LockError::LockBusy) => true,
            Err(e) => {
                tracing::warn!(
                    "[INDEX {}] could not probe writer lock: {}",
                    self.path.display(),
                    e
                );
                true
            }
        }
    }

    /// A fresh reader positioned on the latest commit.
    pub fn reader(&self) -> Result<tantivy::IndexReader> {
        let reader = self
            .inner
            .reader_builder()
            .reload_policy(tantivy::ReloadPolicy::Manual)
            .try_into()?;
        Ok(reader)
    }

    pub fn fields(&self) -> &IndexFields {
        &self.fields
    }

    pub fn inner(&self) -> &TantivyIndex {
        &self.inner
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// User field names present in the term dictionaries, reserved names
    /// (including sort shadows) excluded.
    pub fn search_fields(&self) -> Result<Vec<String>> {
        let reader = self.reader()?;
        let searcher = reader.searcher();

        let mut paths = BTreeSet::new();
        for segment in searcher.segment_readers() {
            for field in [self.fields.analyzed, self.fields.exact] {
                let inv_index = segment.inverted_index(field)?;
                let mut terms = inv_index.terms().stream()?;
                while terms.advance() {
                    let term_bytes = terms.key();
                    // JSON terms are "<path>\0<type><value>".
                    if let Some(pos) = term_bytes.iter().position(|b| *b == 0) {
                        let path = String::from_utf8_lossy(&term_bytes[..pos]).to_string();
                        if !crate::types::is_special_field(&path) {
                            paths.insert(path);
                        }
                    }
                }
            }
        }
        Ok(paths.into_iter().collect())
    }
}
