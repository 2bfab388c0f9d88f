//! Pending-operation queue and drain loop.
//!
//! Producers push onto a lock-free queue from any thread. A drain pops until
//! the queue is empty and applies every operation through one tantivy writer;
//! only one drain (or optimize pass) holds the writer at a time, enforced by a
//! compare-and-swap on the `draining` flag.

use crate::config::{IndexerConfig, SynchronizationMode};
use crate::error::{QuarryError, Result};
use crate::events::{IndexingError, SharedEvents};
use crate::index::buffer::{existing_ids, OperationBuffer};
use crate::index::compactor::{panic_message, Compactor};
use crate::index::executive::ExecutiveElection;
use crate::index::mutator::{AddOutcome, IndexMutator};
use crate::index::{DrainGuard, Index};
use crate::types::{IndexItem, IndexOperation, OperationKind};
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

const LOCKED_MESSAGE: &str = "Cannot index queue items, the index is currently locked";
const CREATE_LOCKED_MESSAGE: &str = "Cannot create index, the index is currently locked";
const BUSY_MESSAGE: &str =
    "Cannot index queue items, another indexing operation is currently in progress";
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(25);

/// Result of one attempt to drain the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain or optimize pass holds the writer.
    Busy,
    /// This machine is not the executive; nothing was touched.
    NotExecutive,
    /// Number of operations popped and applied.
    Drained(usize),
}

pub struct QueueProcessor {
    inner: Arc<ProcessorInner>,
}

struct ProcessorInner {
    config: IndexerConfig,
    events: SharedEvents,
    election: Arc<ExecutiveElection>,
    compactor: Compactor,
    queue: SegQueue<IndexOperation>,
    submissions: AtomicUsize,
    draining: Arc<AtomicBool>,
    worker_active: Arc<AtomicBool>,
    cancel: CancellationToken,
    runtime: Option<Handle>,
    index: RwLock<Option<Arc<Index>>>,
}

impl QueueProcessor {
    pub fn new(
        config: IndexerConfig,
        events: SharedEvents,
        election: Arc<ExecutiveElection>,
        runtime: Option<Handle>,
    ) -> Result<Self> {
        if config.synchronization == SynchronizationMode::Background && runtime.is_none() {
            return Err(QuarryError::Config(
                "background synchronization needs a tokio runtime".to_string(),
            ));
        }
        let compactor = Compactor::new(config.optimization_commit_threshold);
        Ok(QueueProcessor {
            inner: Arc::new(ProcessorInner {
                config,
                events,
                election,
                compactor,
                queue: SegQueue::new(),
                submissions: AtomicUsize::new(0),
                draining: Arc::new(AtomicBool::new(false)),
                worker_active: Arc::new(AtomicBool::new(false)),
                cancel: CancellationToken::new(),
                runtime,
                index: RwLock::new(None),
            }),
        })
    }

    /// Buffer and enqueue `ops`, then drain per the synchronization mode.
    pub fn submit(&self, ops: Vec<IndexOperation>) -> Result<()> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return Err(QuarryError::Config("indexer has been shut down".to_string()));
        }
        if ops.is_empty() {
            return Ok(());
        }

        let index = inner.ensure_index()?;

        if !inner.election.is_executive_machine() && !inner.election.reelect(&*inner.events)? {
            tracing::debug!(
                "[QUEUE] {} is not the executive, ignoring {} operations",
                inner.election.machine_name(),
                ops.len()
            );
            return Ok(());
        }

        let add_ids: Vec<&str> = ops
            .iter()
            .filter(|op| op.kind == OperationKind::Add)
            .map(|op| op.id())
            .collect();
        let existing = existing_ids(&index, add_ids.iter().copied())?;
        let buffered = OperationBuffer::new(&inner.config)
            .prepare(ops, |id| existing.contains(id));

        tracing::debug!("[QUEUE] enqueueing {} operations", buffered.len());
        for op in buffered {
            inner.queue.push(op);
        }
        inner.submissions.fetch_add(1, Ordering::AcqRel);

        match inner.config.synchronization {
            SynchronizationMode::Immediate => match inner.run_drains()? {
                DrainOutcome::Busy => {
                    tracing::warn!("[QUEUE] {}", BUSY_MESSAGE);
                    inner.events.indexing_error(&IndexingError::new(BUSY_MESSAGE));
                    Ok(())
                }
                DrainOutcome::NotExecutive | DrainOutcome::Drained(_) => Ok(()),
            },
            SynchronizationMode::Background => {
                ProcessorInner::ensure_worker(inner);
                Ok(())
            }
        }
    }

    /// Drain on the caller's thread regardless of mode.
    pub fn drain_now(&self) -> Result<DrainOutcome> {
        self.inner.run_drains()
    }

    pub fn index(&self) -> Result<Arc<Index>> {
        self.inner.ensure_index()
    }

    /// The cached handle, if the index exists on disk.
    pub fn existing_index(&self) -> Result<Option<Arc<Index>>> {
        if !Index::exists(self.inner.config.index_path()) {
            return Ok(None);
        }
        self.inner.ensure_index().map(Some)
    }

    /// Empty the index, creating it when missing.
    pub fn recreate_index(&self) -> Result<()> {
        let inner = &self.inner;
        let path = inner.config.index_path();
        if !Index::exists(&path) {
            inner.ensure_index()?;
            return Ok(());
        }

        let index = inner.ensure_index()?;
        let guard = DrainGuard::try_acquire(&inner.draining).ok_or(QuarryError::DrainInProgress)?;
        let mut writer = match index.writer(inner.config.writer_buffer_bytes(), guard) {
            Ok(w) => w,
            Err(e @ QuarryError::IndexLocked(_)) => {
                tracing::warn!("[QUEUE] {}", CREATE_LOCKED_MESSAGE);
                inner
                    .events
                    .indexing_error(&IndexingError::new(CREATE_LOCKED_MESSAGE).caused_by(&e));
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        writer.delete_all_documents()?;
        writer.commit()?;
        writer.finish()?;
        tracing::info!("[QUEUE] index {} recreated empty", path.display());

        ProcessorInner::retrigger(inner);
        Ok(())
    }

    /// Force an optimize pass.
    pub fn optimize(&self) -> Result<()> {
        let inner = &self.inner;
        let Some(index) = self.existing_index()? else {
            return Ok(());
        };
        let result = inner.compactor.maybe_optimize(
            &index,
            &inner.election,
            &inner.draining,
            inner.config.writer_buffer_bytes(),
            &*inner.events,
            true,
        );
        // Submissions that lost the flag to this pass are still queued.
        ProcessorInner::retrigger(inner);
        result.map(|_| ())
    }

    pub fn pending_count(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn commit_count(&self) -> usize {
        self.inner.compactor.commit_count()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    /// True while nothing is queued, draining or scheduled.
    pub fn is_idle(&self) -> bool {
        self.inner.queue.is_empty()
            && !self.is_draining()
            && !self.inner.worker_active.load(Ordering::Acquire)
    }

    /// Stop the background worker after its current item.
    pub fn shutdown(&self) {
        tracing::info!("[QUEUE] shutting down, {} operations left", self.pending_count());
        self.inner.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl ProcessorInner {
    fn ensure_index(&self) -> Result<Arc<Index>> {
        let path = self.config.index_path();
        {
            let cached = self.index.read().unwrap_or_else(|e| e.into_inner());
            if let Some(index) = cached.as_ref() {
                if Index::exists(index.path()) {
                    return Ok(Arc::clone(index));
                }
            }
        }

        let mut cached = self.index.write().unwrap_or_else(|e| e.into_inner());
        if let Some(index) = cached.as_ref() {
            if Index::exists(index.path()) {
                return Ok(Arc::clone(index));
            }
        }
        let index = if Index::exists(&path) {
            Index::open(&path)?
        } else {
            tracing::info!("[QUEUE] creating index at {}", path.display());
            Index::create_in_dir(&path)?
        };
        let index = Arc::new(index);
        *cached = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Drain until the queue is empty, re-checking after each pass so an item
    /// pushed while the flag was being released is not stranded. Runs the
    /// compactor between passes. Item failures do not stop the re-check; the
    /// first one is returned at the end.
    fn run_drains(&self) -> Result<DrainOutcome> {
        let mut total = 0;
        let mut item_error = None;
        loop {
            match self.drain_pass(&mut item_error)? {
                DrainOutcome::Drained(n) => total += n,
                other if total == 0 && item_error.is_none() => return Ok(other),
                _ => break,
            }
            self.after_drain();
            if self.queue.is_empty() || self.cancel.is_cancelled() {
                break;
            }
        }
        match item_error {
            Some(e) => Err(e),
            None => Ok(DrainOutcome::Drained(total)),
        }
    }

    /// Drain whatever is still queued once an optimize or recreate pass has
    /// released the flag.
    fn retrigger(this: &Arc<Self>) {
        if this.queue.is_empty() || this.cancel.is_cancelled() {
            return;
        }
        match this.config.synchronization {
            SynchronizationMode::Immediate => {
                if let Err(e) = this.run_drains() {
                    tracing::warn!("[QUEUE] deferred drain failed: {}", e);
                }
            }
            SynchronizationMode::Background => Self::ensure_worker(this),
        }
    }

    fn drain_pass(&self, item_error: &mut Option<QuarryError>) -> Result<DrainOutcome> {
        let Some(guard) = DrainGuard::try_acquire(&self.draining) else {
            return Ok(DrainOutcome::Busy);
        };
        if !self.election.is_executive_machine() {
            tracing::info!(
                "[QUEUE] {} lost executive status, abandoning drain",
                self.election.machine_name()
            );
            return Ok(DrainOutcome::NotExecutive);
        }

        let index = self.ensure_index()?;
        let mut writer = match index.writer(self.config.writer_buffer_bytes(), guard) {
            Ok(w) => w,
            Err(e @ QuarryError::IndexLocked(_)) => {
                tracing::warn!("[QUEUE] {} ({} queued)", LOCKED_MESSAGE, self.queue.len());
                self.events
                    .indexing_error(&IndexingError::new(LOCKED_MESSAGE).caused_by(&e));
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let mutator = IndexMutator::new(&index, &self.config, &*self.events)?;
        let mut indexed: Vec<IndexItem> = Vec::new();
        let mut processed = 0;

        while !self.cancel.is_cancelled() {
            let Some(op) = self.queue.pop() else {
                break;
            };
            processed += 1;
            let IndexOperation { mut item, kind } = op;
            let result = match kind {
                OperationKind::Add => mutator.apply_add(&mut item, &writer).map(|outcome| {
                    if outcome == AddOutcome::Written {
                        indexed.push(item.clone());
                    }
                }),
                OperationKind::Delete => mutator.apply_delete(&item, &writer).map(|_| ()),
            };
            if let Err(e) = result {
                tracing::error!("[QUEUE] failed to apply {:?} {}: {}", kind, item.id, e);
                self.events.indexing_error(
                    &IndexingError::new("Error indexing queue items")
                        .for_item(&item.id)
                        .caused_by(&e),
                );
                item_error.get_or_insert(e);
            }
            self.compactor.record(1);
        }

        tracing::info!(
            "[QUEUE] committing {} operations ({} written)",
            processed,
            indexed.len()
        );
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| writer.commit())) {
            Ok(Ok(_opstamp)) => {}
            Ok(Err(e)) => {
                let e = QuarryError::from(e);
                tracing::error!("[QUEUE] commit error: {}", e);
                self.events
                    .indexing_error(&IndexingError::new("Error committing index").caused_by(&e));
                return Err(e);
            }
            Err(panic_info) => {
                let msg = panic_message(panic_info);
                tracing::error!("[QUEUE] PANIC during commit: {}", msg);
                self.events
                    .indexing_error(&IndexingError::new("Error committing index").caused_by(&msg));
                return Err(QuarryError::Tantivy(msg));
            }
        }
        writer.finish()?;

        if let Err(e) = self.election.heartbeat() {
            tracing::warn!("[QUEUE] executive heartbeat failed: {}", e);
        }
        if !indexed.is_empty() {
            self.events.nodes_indexed(&indexed);
        }
        Ok(DrainOutcome::Drained(processed))
    }

    fn after_drain(&self) {
        let index = match self.ensure_index() {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!("[QUEUE] index unavailable for optimize: {}", e);
                return;
            }
        };
        let result = self.compactor.maybe_optimize(
            &index,
            &self.election,
            &self.draining,
            self.config.writer_buffer_bytes(),
            &*self.events,
            false,
        );
        if let Err(e) = result {
            // Locked and failed passes were already reported as events.
            tracing::warn!("[QUEUE] optimize skipped: {}", e);
        }
    }

    /// Start the background worker unless one is already running.
    fn ensure_worker(this: &Arc<Self>) {
        let Some(handle) = this.runtime.as_ref() else {
            return;
        };
        let Some(guard) = DrainGuard::try_acquire(&this.worker_active) else {
            return;
        };
        let inner = Arc::clone(this);
        handle.spawn_blocking(move || inner.worker_loop(guard));
    }

    fn worker_loop(&self, guard: DrainGuard) {
        let mut guard = Some(guard);
        tracing::debug!("[QUEUE] background worker started");
        loop {
            let submitted = self.submissions.load(Ordering::Acquire);
            let mut failed = false;
            let retry = match self.run_drains() {
                Ok(DrainOutcome::Busy) => {
                    // An optimize or immediate drain holds the writer; wait it out.
                    std::thread::sleep(BUSY_RETRY_DELAY);
                    true
                }
                Ok(DrainOutcome::NotExecutive) => false,
                Ok(DrainOutcome::Drained(_)) => true,
                Err(e) => {
                    tracing::error!("[QUEUE] background drain failed: {}", e);
                    // Lock failures were reported by the pass itself.
                    if !e.is_transient() {
                        self.events.indexing_error(
                            &IndexingError::new("Error indexing queue items").caused_by(&e),
                        );
                    }
                    failed = true;
                    false
                }
            };

            drop(guard.take());
            // Submissions that found this worker still running after a failure
            // get one more attempt.
            let arrived = failed && self.submissions.load(Ordering::Acquire) != submitted;
            if !(retry || arrived) || self.queue.is_empty() || self.cancel.is_cancelled() {
                break;
            }
            match DrainGuard::try_acquire(&self.worker_active) {
                Some(g) => guard = Some(g),
                None => break,
            }
        }
        tracing::debug!("[QUEUE] background worker idle");
    }
}
