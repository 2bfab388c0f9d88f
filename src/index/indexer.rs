use crate::config::IndexerConfig;
use crate::error::Result;
use crate::events::SharedEvents;
use crate::index::executive::{ExecutiveElection, FileRegistrationStore, RegistrationStore};
use crate::index::queue::QueueProcessor;
use crate::index::Index;
use crate::query::Searcher;
use crate::types::IndexOperation;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Indexing front door for one working folder.
///
/// `Indexer` registers this machine with the executive election, owns the
/// pending queue and hands out [`Searcher`]s over the same index. It is
/// `Send + Sync`; share it behind an `Arc` between producer threads.
///
/// # Examples
///
/// ```rust,no_run
/// use quarry::{IndexItem, IndexOperation, Indexer, IndexerConfig, NoopEvents};
/// use quarry::config::SynchronizationMode;
/// use std::sync::Arc;
///
/// # fn main() -> quarry::Result<()> {
/// let config = IndexerConfig::new("./data").with_synchronization(SynchronizationMode::Immediate);
/// let indexer = Indexer::open(config, Arc::new(NoopEvents))?;
/// let item = IndexItem::new("1234", "content").with_text("title", "Hello world");
/// indexer.perform_indexing(vec![IndexOperation::add(item)?])?;
/// let hits = indexer.searcher().search_text("hello", None)?;
/// assert_eq!(hits.total_hits, 1);
/// # Ok(())
/// # }
/// ```
pub struct Indexer {
    config: IndexerConfig,
    election: Arc<ExecutiveElection>,
    processor: QueueProcessor,
}

impl Indexer {
    /// Validate `config`, join the executive election and prepare the queue.
    ///
    /// Background synchronization captures the current tokio runtime and
    /// fails with a configuration error outside of one.
    pub fn open(config: IndexerConfig, events: SharedEvents) -> Result<Self> {
        let store = Arc::new(FileRegistrationStore::new(config.registration_path()));
        Self::open_with_store(config, events, store)
    }

    /// Like [`open`](Self::open) with a custom registration store.
    pub fn open_with_store(
        config: IndexerConfig,
        events: SharedEvents,
        store: Arc<dyn RegistrationStore>,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.working_folder)?;

        let machine_name = config.resolve_machine_name();
        let election = Arc::new(ExecutiveElection::new(
            machine_name.clone(),
            store,
            config.executive_timeout(),
        ));
        let executive = election.initialize(&*events)?;
        tracing::info!(
            "[INDEXER] opened {} on {} (executive: {}, mode: {:?})",
            config.working_folder.display(),
            machine_name,
            executive,
            config.synchronization
        );

        let processor = QueueProcessor::new(
            config.clone(),
            events,
            Arc::clone(&election),
            Handle::try_current().ok(),
        )?;
        Ok(Indexer {
            config,
            election,
            processor,
        })
    }

    /// Submit add and delete operations.
    ///
    /// In immediate mode the call returns after the operations are committed
    /// and reports the first failure; in background mode it returns once they
    /// are queued and failures only reach the events.
    pub fn perform_indexing(&self, operations: Vec<IndexOperation>) -> Result<()> {
        self.processor.submit(operations)
    }

    /// Recreate an empty index, discarding any existing documents.
    pub fn create_index(&self) -> Result<()> {
        self.processor.recreate_index()
    }

    pub fn index_exists(&self) -> bool {
        Index::exists(self.config.index_path())
    }

    /// Deduplicate and merge now, regardless of the commit threshold.
    pub fn optimize(&self) -> Result<()> {
        self.processor.optimize()
    }

    pub fn shutdown(&self) {
        self.processor.shutdown();
    }

    pub fn pending_count(&self) -> usize {
        self.processor.pending_count()
    }

    pub fn commit_count(&self) -> usize {
        self.processor.commit_count()
    }

    pub fn is_executive_machine(&self) -> bool {
        self.election.is_executive_machine()
    }

    pub fn machine_name(&self) -> &str {
        self.election.machine_name()
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn searcher(&self) -> Searcher {
        Searcher::new(self.config.index_path())
    }

    /// True while nothing is queued or being written.
    pub fn is_idle(&self) -> bool {
        self.processor.is_idle()
    }

    /// Wait until background work settles, or `timeout` passes.
    /// Returns whether the indexer went idle.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.processor.is_idle() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        if !self.processor.is_shut_down() && self.processor.pending_count() > 0 {
            tracing::warn!(
                "[INDEXER] dropped with {} queued operations",
                self.processor.pending_count()
            );
        }
    }
}
