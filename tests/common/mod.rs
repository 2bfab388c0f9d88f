#![allow(dead_code)]

use quarry::config::SynchronizationMode;
use quarry::{
    DeletedTerm, IndexEvents, IndexItem, IndexOperation, Indexer, IndexerConfig, IndexingError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Route library logs through the test harness. `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Records everything the indexer reports.
#[derive(Default)]
pub struct RecordingEvents {
    pub indexed_total: AtomicUsize,
    pub optimized: AtomicUsize,
    pub assigned: AtomicUsize,
    pub errors: Mutex<Vec<IndexingError>>,
    pub deleted: Mutex<Vec<(DeletedTerm, u64)>>,
}

impl RecordingEvents {
    pub fn indexed(&self) -> usize {
        self.indexed_total.load(Ordering::SeqCst)
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }
}

impl IndexEvents for RecordingEvents {
    fn indexing_error(&self, error: &IndexingError) {
        self.errors.lock().unwrap().push(error.clone());
    }

    fn nodes_indexed(&self, items: &[IndexItem]) {
        self.indexed_total.fetch_add(items.len(), Ordering::SeqCst);
    }

    fn index_optimized(&self) {
        self.optimized.fetch_add(1, Ordering::SeqCst);
    }

    fn index_deleted(&self, term: &DeletedTerm, count: u64) {
        self.deleted.lock().unwrap().push((term.clone(), count));
    }

    fn executive_assigned(&self, _machine_name: &str, _server_count: usize) {
        self.assigned.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn config(dir: &TempDir, mode: SynchronizationMode) -> IndexerConfig {
    IndexerConfig::new(dir.path())
        .with_synchronization(mode)
        .with_machine_name("test-machine")
}

pub fn open(config: IndexerConfig) -> (Arc<Indexer>, Arc<RecordingEvents>) {
    init_tracing();
    let events = Arc::new(RecordingEvents::default());
    let indexer = Indexer::open(config, events.clone()).unwrap();
    (Arc::new(indexer), events)
}

pub fn immediate(dir: &TempDir) -> (Arc<Indexer>, Arc<RecordingEvents>) {
    open(config(dir, SynchronizationMode::Immediate))
}

pub fn background(dir: &TempDir) -> (Arc<Indexer>, Arc<RecordingEvents>) {
    open(config(dir, SynchronizationMode::Background))
}

pub fn add(item: IndexItem) -> IndexOperation {
    IndexOperation::add(item).unwrap()
}

pub fn content(id: &str, title: &str) -> IndexOperation {
    add(IndexItem::new(id, "content").with_text("title", title))
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    true
}
