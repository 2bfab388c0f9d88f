use crate::config::IndexerConfig;
use crate::error::Result;
use crate::index::Index;
use crate::types::{IndexOperation, OperationKind};
use std::collections::{HashMap, HashSet};
use tantivy::Term;

/// Collapses a submitted batch before it is queued.
///
/// - an add for an id already in the index gets a delete placed before it
/// - repeated adds for one id keep only the last (earlier synthetic deletes stay)
/// - deletes are never dropped
/// - blank field values are stripped from adds
/// - adds outside the configured categories are skipped
pub struct OperationBuffer<'a> {
    config: &'a IndexerConfig,
}

impl<'a> OperationBuffer<'a> {
    pub fn new(config: &'a IndexerConfig) -> Self {
        OperationBuffer { config }
    }

    pub fn prepare<F>(&self, ops: Vec<IndexOperation>, exists: F) -> Vec<IndexOperation>
    where
        F: Fn(&str) -> bool,
    {
        let ops: Vec<IndexOperation> = ops
            .into_iter()
            .filter_map(|mut op| {
                if op.kind == OperationKind::Delete {
                    return Some(op);
                }
                if !self.config.accepts_category(&op.item.category) {
                    tracing::debug!(
                        "[BUFFER] skipping {} ({}): category not indexed",
                        op.item.id,
                        op.item.category
                    );
                    return None;
                }
                op.item.strip_blank_fields();
                Some(op)
            })
            .collect();

        let mut last_add: HashMap<String, usize> = HashMap::new();
        for (pos, op) in ops.iter().enumerate() {
            if op.kind == OperationKind::Add {
                last_add.insert(op.id().to_lowercase(), pos);
            }
        }

        let mut out = Vec::with_capacity(ops.len());
        for (pos, op) in ops.into_iter().enumerate() {
            match op.kind {
                OperationKind::Delete => out.push(op),
                OperationKind::Add => {
                    let key = op.id().to_lowercase();
                    if exists(&key) {
                        out.push(IndexOperation::delete(op.id()));
                    }
                    if last_add.get(&key) == Some(&pos) {
                        out.push(op);
                    }
                }
            }
        }
        out
    }
}

/// Which of `ids` (lower-cased) have at least one document in the index.
pub fn existing_ids<'i, I>(index: &Index, ids: I) -> Result<HashSet<String>>
where
    I: IntoIterator<Item = &'i str>,
{
    let reader = index.reader()?;
    let searcher = reader.searcher();
    let mut found = HashSet::new();
    for id in ids {
        let id = id.to_lowercase();
        let term = Term::from_field_text(index.fields().node_id, &id);
        if searcher.doc_freq(&term)? > 0 {
            found.insert(id);
        }
    }
    Ok(found)
}
