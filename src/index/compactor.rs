use crate::error::{QuarryError, Result};
use crate::events::{IndexEvents, IndexingError};
use crate::index::document::stored_timestamp;
use crate::index::executive::ExecutiveElection;
use crate::index::{DrainGuard, Index, ManagedIndexWriter};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tantivy::collector::DocSetCollector;
use tantivy::query::TermQuery;
use tantivy::schema::IndexRecordOption;
use tantivy::{DocAddress, TantivyDocument, Term};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Ids that had more than one live document.
    pub duplicate_ids: usize,
    /// Physical documents removed by deduplication.
    pub removed_documents: usize,
    pub merged_segments: usize,
    pub deleted_files: usize,
}

/// Tracks writes since the last optimize and runs dedup + merge passes.
pub struct Compactor {
    threshold: usize,
    commits: AtomicUsize,
}

impl Compactor {
    pub fn new(threshold: usize) -> Self {
        Compactor {
            threshold: threshold.max(1),
            commits: AtomicUsize::new(0),
        }
    }

    pub fn record(&self, operations: usize) {
        self.commits.fetch_add(operations, Ordering::AcqRel);
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::Acquire)
    }

    pub fn threshold_reached(&self) -> bool {
        self.commit_count() >= self.threshold
    }

    /// Run an optimize pass when the threshold is reached (or `force`).
    ///
    /// Returns `Ok(None)` when nothing ran: not executive, no index, below the
    /// threshold, or another pass holds the draining flag. A locked index is
    /// reported through `events` and returned as `IndexLocked`.
    #[allow(clippy::too_many_arguments)]
    pub fn maybe_optimize(
        &self,
        index: &Index,
        election: &ExecutiveElection,
        draining: &Arc<AtomicBool>,
        buffer_bytes: usize,
        events: &dyn IndexEvents,
        force: bool,
    ) -> Result<Option<CompactionStats>> {
        if !force && !self.threshold_reached() {
            return Ok(None);
        }
        if !election.is_executive_machine() || !Index::exists(index.path()) {
            return Ok(None);
        }

        let Some(guard) = DrainGuard::try_acquire(draining) else {
            tracing::debug!("[COMPACT] drain in progress, optimize deferred");
            if force {
                return Err(QuarryError::DrainInProgress);
            }
            return Ok(None);
        };

        if index.is_locked() {
            return Err(self.report_locked(index, events));
        }
        let mut writer = match index.writer(buffer_bytes, guard) {
            Ok(w) => w,
            Err(QuarryError::IndexLocked(_)) => return Err(self.report_locked(index, events)),
            Err(e) => return Err(e),
        };

        events.index_optimizing();
        tracing::info!(
            "[COMPACT {}] optimizing after {} writes",
            index.path().display(),
            self.commit_count()
        );

        let stats = match optimize(index, &mut writer) {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!("[COMPACT {}] optimize failed: {}", index.path().display(), e);
                events.indexing_error(&IndexingError::new("Error optimizing index").caused_by(&e));
                drop(writer);
                return Err(e);
            }
        };
        writer.finish()?;

        self.commits.store(0, Ordering::Release);
        events.index_optimized();
        tracing::info!(
            "[COMPACT {}] done: {} duplicate ids, {} documents removed, {} segments merged, {} files collected",
            index.path().display(),
            stats.duplicate_ids,
            stats.removed_documents,
            stats.merged_segments,
            stats.deleted_files
        );
        Ok(Some(stats))
    }

    fn report_locked(&self, index: &Index, events: &dyn IndexEvents) -> QuarryError {
        let message = "Cannot optimize index, the index is currently locked";
        tracing::warn!("[COMPACT {}] {}", index.path().display(), message);
        events.indexing_error(&IndexingError::new(message));
        QuarryError::IndexLocked(index.path().display().to_string())
    }
}

/// Deduplicate ids by newest timestamp, then merge every segment into one.
fn optimize(index: &Index, writer: &mut ManagedIndexWriter) -> Result<CompactionStats> {
    let mut stats = CompactionStats::default();

    for (id, kept) in deduplicate(index, &mut stats)? {
        writer.delete_term(Term::from_field_text(index.fields().node_id, &id));
        writer.add_document(kept)?;
    }

    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| writer.commit())) {
        Ok(Ok(_opstamp)) => {}
        Ok(Err(e)) => return Err(e.into()),
        Err(panic_info) => return Err(QuarryError::Tantivy(panic_message(panic_info))),
    }

    let segment_ids = index.inner().searchable_segment_ids()?;
    if segment_ids.len() > 1 {
        stats.merged_segments = segment_ids.len();
        // Blocks until tantivy's merge thread finishes; None means every doc was deleted.
        writer
            .merge(&segment_ids)
            .wait()
            .map_err(|e| QuarryError::Tantivy(e.to_string()))?;
    }

    let gc = writer
        .garbage_collect_files()
        .wait()
        .map_err(|e| QuarryError::Tantivy(e.to_string()))?;
    stats.deleted_files = gc.deleted_files.len();
    Ok(stats)
}

/// For every id with more than one live document, the stored document to keep.
///
/// Missing or unreadable timestamps rank as oldest. On a tie the first
/// document in segment order wins.
fn deduplicate(
    index: &Index,
    stats: &mut CompactionStats,
) -> Result<Vec<(String, TantivyDocument)>> {
    let reader = index.reader()?;
    let searcher = reader.searcher();
    let id_field = index.fields().node_id;

    let mut frequencies: HashMap<Vec<u8>, u32> = HashMap::new();
    for segment in searcher.segment_readers() {
        let inv_index = segment.inverted_index(id_field)?;
        let mut terms = inv_index.terms().stream()?;
        while terms.advance() {
            *frequencies.entry(terms.key().to_vec()).or_insert(0) += terms.value().doc_freq;
        }
    }

    let mut keep = Vec::new();
    for (bytes, freq) in frequencies {
        if freq < 2 {
            continue;
        }
        let Ok(id) = String::from_utf8(bytes) else {
            continue;
        };
        let query = TermQuery::new(
            Term::from_field_text(id_field, &id),
            IndexRecordOption::Basic,
        );
        let mut addresses: Vec<DocAddress> =
            searcher.search(&query, &DocSetCollector)?.into_iter().collect();
        if addresses.len() < 2 {
            continue;
        }
        addresses.sort_by_key(|a| (a.segment_ord, a.doc_id));

        let mut newest: Option<(i64, TantivyDocument)> = None;
        for address in &addresses {
            let doc: TantivyDocument = searcher.doc(*address)?;
            let ts = stored_timestamp(&doc, index.fields()).unwrap_or(i64::MIN);
            let replace = match &newest {
                Some((best, _)) => ts > *best,
                None => true,
            };
            if replace {
                newest = Some((ts, doc));
            }
        }

        if let Some((_, doc)) = newest {
            tracing::debug!(
                "[COMPACT] id {} has {} documents, keeping newest",
                id,
                addresses.len()
            );
            stats.duplicate_ids += 1;
            stats.removed_documents += addresses.len() - 1;
            keep.push((id, doc));
        }
    }
    Ok(keep)
}

pub(crate) fn panic_message(panic_info: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic in tantivy commit".to_string()
    }
}
