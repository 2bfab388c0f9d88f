//! # Quarry
//!
//! Queue-driven indexing and search over [Tantivy](https://github.com/quickwit-oss/tantivy)
//! for farms of machines sharing one index folder.
//!
//! Content sources hand [`IndexItem`]s to an [`Indexer`] as add and delete
//! [`IndexOperation`]s. The indexer deduplicates each batch, queues it and
//! applies it through a single tantivy writer, either on the caller's thread
//! or on a background worker. Only the elected executive machine writes;
//! every other machine's submissions are ignored. After enough writes the
//! index is compacted: duplicate ids are resolved by write timestamp and the
//! segments are merged.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use quarry::config::SynchronizationMode;
//! use quarry::{
//!     DateResolution, FieldDataType, IndexItem, IndexOperation, Indexer, IndexerConfig, ItemField,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> quarry::Result<()> {
//! let config = IndexerConfig::new("./data").with_synchronization(SynchronizationMode::Immediate);
//! let indexer = Indexer::open(config, Arc::new(quarry::NoopEvents))?;
//!
//! let item = IndexItem::new("1051", "content")
//!     .with_text("title", "Getting started")
//!     .with_field(
//!         "published",
//!         ItemField::typed("2024-05-01", FieldDataType::Date(DateResolution::Day)).sortable(),
//!     );
//! indexer.perform_indexing(vec![IndexOperation::add(item)?])?;
//!
//! let searcher = indexer.searcher();
//! let results = searcher.search(&searcher.create_criteria().field("title", "started"))?;
//! println!("{} hits", results.total_hits);
//! # Ok(())
//! # }
//! ```
//!
//! ## Observing the indexer
//!
//! Implement [`IndexEvents`] (every method has a no-op default) or use
//! [`ChannelEvents`] to receive [`IndexEvent`]s on a tokio channel. In
//! background mode the events are the only place drain failures surface.

pub mod config;
pub mod error;
pub mod events;
pub mod index;
pub mod query;
pub mod types;

pub use config::{FieldIndexPolicy, IndexerConfig, SynchronizationMode};
pub use error::{QuarryError, Result};
pub use events::{
    ChannelEvents, DeletedTerm, EventDecision, IndexEvent, IndexEvents, IndexingError,
    NoopEvents, SharedEvents,
};
pub use index::indexer::Indexer;
pub use query::{
    BooleanOperation, SearchCriteria, SearchResult, SearchResults, SearchValue, Searcher,
    ValueModifier,
};
pub use types::{
    DateResolution, FieldDataType, IndexItem, IndexOperation, ItemField, OperationKind,
};
