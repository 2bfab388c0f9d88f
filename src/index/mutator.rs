use crate::config::IndexerConfig;
use crate::error::Result;
use crate::events::{DeletedTerm, EventDecision, IndexEvents, IndexingError};
use crate::index::document::DocumentBuilder;
use crate::index::Index;
use crate::types::{IndexItem, NODE_ID_FIELD};
use tantivy::collector::Count;
use tantivy::query::TermQuery;
use tantivy::schema::IndexRecordOption;
use tantivy::{IndexWriter, Searcher, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Written,
    /// A before-event vetoed the write.
    Cancelled,
}

/// Applies single operations to an open writer.
///
/// Delete counts are taken against the commit visible when the mutator was
/// created; documents added earlier in the same drain are not counted.
pub struct IndexMutator<'a> {
    index: &'a Index,
    config: &'a IndexerConfig,
    events: &'a dyn IndexEvents,
    searcher: Searcher,
}

impl<'a> IndexMutator<'a> {
    pub fn new(
        index: &'a Index,
        config: &'a IndexerConfig,
        events: &'a dyn IndexEvents,
    ) -> Result<Self> {
        let searcher = index.reader()?.searcher();
        Ok(IndexMutator {
            index,
            config,
            events,
            searcher,
        })
    }

    fn id_term(&self, id: &str) -> Term {
        Term::from_field_text(self.index.fields().node_id, &id.to_lowercase())
    }

    /// Write `item`, replacing any document with the same id.
    pub fn apply_add(&self, item: &mut IndexItem, writer: &IndexWriter) -> Result<AddOutcome> {
        if self.events.node_indexing(item) == EventDecision::Cancel {
            tracing::debug!("[MUTATE] add of {} cancelled before build", item.id);
            return Ok(AddOutcome::Cancelled);
        }

        let mut doc = DocumentBuilder::new(self.index.fields(), self.config).build(item, self.events);
        if self.events.document_writing(&mut doc, item) == EventDecision::Cancel {
            tracing::debug!("[MUTATE] add of {} cancelled before write", item.id);
            return Ok(AddOutcome::Cancelled);
        }

        writer.delete_term(self.id_term(&item.id));
        writer.add_document(doc)?;
        self.events.node_indexed(item);
        Ok(AddOutcome::Written)
    }

    /// Delete by the item's single id field. Returns the number of committed
    /// live documents removed; unknown ids remove nothing.
    pub fn apply_delete(&self, item: &IndexItem, writer: &IndexWriter) -> Result<u64> {
        let value = match item.fields.first() {
            Some((_, field)) if item.fields.len() == 1 => field.value.trim().to_lowercase(),
            _ => {
                self.events.indexing_error(
                    &IndexingError::new(
                        "Could not remove queue item from index, the dictionary is not properly formatted",
                    )
                    .for_item(&item.id),
                );
                return Ok(0);
            }
        };

        let term = self.id_term(&value);
        let query = TermQuery::new(term.clone(), IndexRecordOption::Basic);
        let count = self.searcher.search(&query, &Count)? as u64;

        writer.delete_term(term);
        tracing::debug!("[MUTATE] delete {} matched {} live documents", value, count);
        self.events.index_deleted(
            &DeletedTerm {
                field: NODE_ID_FIELD.to_string(),
                value,
            },
            count,
        );
        Ok(count)
    }
}
