//! Indexer notifications.
//!
//! Observers implement [`IndexEvents`]; every method has a no-op default so an
//! implementation only overrides what it cares about. The two "before" hooks
//! return an [`EventDecision`] and can veto a single document.

use crate::types::IndexItem;
use std::sync::Arc;
use tantivy::TantivyDocument;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDecision {
    Proceed,
    Cancel,
}

/// A recoverable failure reported while indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingError {
    pub message: String,
    pub item_id: Option<String>,
    pub cause: Option<String>,
}

impl IndexingError {
    pub fn new(message: impl Into<String>) -> Self {
        IndexingError {
            message: message.into(),
            item_id: None,
            cause: None,
        }
    }

    pub fn for_item(mut self, id: impl Into<String>) -> Self {
        self.item_id = Some(id.into());
        self
    }

    pub fn caused_by(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

/// Field/value pair a delete was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedTerm {
    pub field: String,
    pub value: String,
}

pub trait IndexEvents: Send + Sync {
    fn indexing_error(&self, _error: &IndexingError) {}

    fn node_indexing(&self, _item: &mut IndexItem) -> EventDecision {
        EventDecision::Proceed
    }

    fn node_indexed(&self, _item: &IndexItem) {}

    fn nodes_indexed(&self, _items: &[IndexItem]) {}

    fn index_optimizing(&self) {}

    fn index_optimized(&self) {}

    fn index_deleted(&self, _term: &DeletedTerm, _count: u64) {}

    fn executive_assigned(&self, _machine_name: &str, _server_count: usize) {}

    fn document_writing(&self, _doc: &mut TantivyDocument, _item: &IndexItem) -> EventDecision {
        EventDecision::Proceed
    }
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl IndexEvents for NoopEvents {}

pub type SharedEvents = Arc<dyn IndexEvents>;

/// Owned form of the observational events, for channel subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexEvent {
    IndexingError(IndexingError),
    NodeIndexed(String),
    NodesIndexed(Vec<String>),
    IndexOptimizing,
    IndexOptimized,
    IndexDeleted { term: DeletedTerm, count: u64 },
    ExecutiveAssigned { machine_name: String, server_count: usize },
}

/// Forwards events onto a tokio channel. The before-hooks always proceed.
pub struct ChannelEvents {
    tx: mpsc::UnboundedSender<IndexEvent>,
}

impl ChannelEvents {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IndexEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelEvents { tx }, rx)
    }

    fn send(&self, event: IndexEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl IndexEvents for ChannelEvents {
    fn indexing_error(&self, error: &IndexingError) {
        self.send(IndexEvent::IndexingError(error.clone()));
    }

    fn node_indexed(&self, item: &IndexItem) {
        self.send(IndexEvent::NodeIndexed(item.id.clone()));
    }

    fn nodes_indexed(&self, items: &[IndexItem]) {
        self.send(IndexEvent::NodesIndexed(
            items.iter().map(|i| i.id.clone()).collect(),
        ));
    }

    fn index_optimizing(&self) {
        self.send(IndexEvent::IndexOptimizing);
    }

    fn index_optimized(&self) {
        self.send(IndexEvent::IndexOptimized);
    }

    fn index_deleted(&self, term: &DeletedTerm, count: u64) {
        self.send(IndexEvent::IndexDeleted {
            term: term.clone(),
            count,
        });
    }

    fn executive_assigned(&self, machine_name: &str, server_count: usize) {
        self.send(IndexEvent::ExecutiveAssigned {
            machine_name: machine_name.to_string(),
            server_count,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_events_proceed() {
        let mut item = IndexItem::new("1", "content");
        assert_eq!(NoopEvents.node_indexing(&mut item), EventDecision::Proceed);
    }

    #[test]
    fn channel_forwards_batches() {
        let (events, mut rx) = ChannelEvents::new();
        let items = vec![IndexItem::new("1", "a"), IndexItem::new("2", "a")];
        events.nodes_indexed(&items);
        events.index_optimizing();

        assert_eq!(
            rx.try_recv().unwrap(),
            IndexEvent::NodesIndexed(vec!["1".to_string(), "2".to_string()])
        );
        assert_eq!(rx.try_recv().unwrap(), IndexEvent::IndexOptimizing);
    }

    #[test]
    fn channel_survives_dropped_receiver() {
        let (events, rx) = ChannelEvents::new();
        drop(rx);
        events.indexing_error(&IndexingError::new("boom").for_item("7"));
    }
}
