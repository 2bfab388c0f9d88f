mod common;

use common::{background, content, immediate, wait_until};
use quarry::index::{DrainGuard, Index, ManagedIndexWriter};
use quarry::{EventDecision, IndexEvents, IndexItem, IndexingError, Indexer, QuarryError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(60);
const LOCKED: &str = "Cannot index queue items, the index is currently locked";
const BUSY: &str = "Cannot index queue items, another indexing operation is currently in progress";

/// Take the index writer lock from outside the indexer.
fn hold_writer(indexer: &Indexer) -> ManagedIndexWriter {
    let index = Index::open(indexer.config().index_path()).unwrap();
    let flag = Arc::new(AtomicBool::new(false));
    index
        .writer(
            indexer.config().writer_buffer_bytes(),
            DrainGuard::try_acquire(&flag).unwrap(),
        )
        .unwrap()
}

/// Events that call back into the indexer from inside its hooks.
#[derive(Default)]
struct ReentrantEvents {
    indexer: OnceLock<Weak<Indexer>>,
    errors: Mutex<Vec<String>>,
    seen: AtomicUsize,
    optimizing_fired: AtomicBool,
    submit_while_optimizing: bool,
    shutdown_after: Option<usize>,
}

impl ReentrantEvents {
    fn indexer(&self) -> Arc<Indexer> {
        self.indexer.get().and_then(Weak::upgrade).unwrap()
    }

    fn error_messages(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl IndexEvents for ReentrantEvents {
    fn indexing_error(&self, error: &IndexingError) {
        self.errors.lock().unwrap().push(error.message.clone());
    }

    fn node_indexing(&self, _item: &mut IndexItem) -> EventDecision {
        let seen = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        if self.shutdown_after == Some(seen) {
            self.indexer().shutdown();
        }
        EventDecision::Proceed
    }

    fn index_optimizing(&self) {
        if !self.submit_while_optimizing || self.optimizing_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        // Submit from another thread while the optimize pass owns the writer.
        let indexer = self.indexer();
        std::thread::spawn(move || indexer.perform_indexing(vec![content("late", "late arrival")]))
            .join()
            .unwrap()
            .unwrap();
    }
}

fn open_reentrant(
    dir: &TempDir,
    mode: quarry::SynchronizationMode,
    events: ReentrantEvents,
) -> (Arc<Indexer>, Arc<ReentrantEvents>) {
    common::init_tracing();
    let events = Arc::new(events);
    let indexer = Arc::new(Indexer::open(common::config(dir, mode), events.clone()).unwrap());
    events.indexer.set(Arc::downgrade(&indexer)).unwrap();
    (indexer, events)
}

fn submit_from_threads(
    indexer: &Arc<quarry::Indexer>,
    threads: usize,
    per_thread: usize,
    id_for: impl Fn(usize, usize) -> String + Send + Sync + Copy + 'static,
) {
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let indexer = Arc::clone(indexer);
            std::thread::spawn(move || {
                for i in 0..per_thread {
                    indexer
                        .perform_indexing(vec![content(&id_for(t, i), &format!("t{} i{}", t, i))])
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn background_same_id_from_many_threads_leaves_one_document() {
    let dir = TempDir::new().unwrap();
    let (indexer, events) = background(&dir);

    submit_from_threads(&indexer, 4, 102, |_, _| "1234".to_string());

    assert!(wait_until(|| events.indexed() == 408, WAIT).await);
    assert!(indexer.wait_for_idle(WAIT).await);

    assert_eq!(indexer.searcher().find_by_id("1234").unwrap().len(), 1);
    assert_eq!(indexer.searcher().document_count().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn background_distinct_ids_from_many_threads() {
    let dir = TempDir::new().unwrap();
    let (indexer, events) = background(&dir);

    submit_from_threads(&indexer, 4, 20, |t, i| format!("{}-{}", t, i));

    assert!(wait_until(|| events.indexed() == 80, WAIT).await);
    assert!(indexer.wait_for_idle(WAIT).await);
    assert_eq!(indexer.searcher().document_count().unwrap(), 80);
    assert!(events.error_messages().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_worker_restarts_after_going_idle() {
    let dir = TempDir::new().unwrap();
    let (indexer, events) = background(&dir);

    let first: Vec<_> = (0..5).map(|i| content(&format!("a{}", i), "first")).collect();
    indexer.perform_indexing(first).unwrap();
    assert!(wait_until(|| events.indexed() == 5, WAIT).await);
    assert!(indexer.wait_for_idle(WAIT).await);

    let second: Vec<_> = (0..5).map(|i| content(&format!("b{}", i), "second")).collect();
    indexer.perform_indexing(second).unwrap();
    assert!(wait_until(|| events.indexed() == 10, WAIT).await);
    assert!(indexer.wait_for_idle(WAIT).await);

    assert_eq!(indexer.searcher().document_count().unwrap(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn immediate_mode_from_many_threads_converges() {
    let dir = TempDir::new().unwrap();
    let (indexer, _) = immediate(&dir);

    submit_from_threads(&indexer, 4, 102, |_, _| "1234".to_string());

    assert!(indexer.wait_for_idle(WAIT).await);
    assert_eq!(indexer.pending_count(), 0);
    assert_eq!(indexer.searcher().find_by_id("1234").unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_rejects_new_work() {
    let dir = TempDir::new().unwrap();
    let (indexer, _) = background(&dir);
    indexer.shutdown();
    assert!(indexer.perform_indexing(vec![content("1", "late")]).is_err());
}

#[test]
fn submit_during_forced_optimize_is_drained_afterwards() {
    let dir = TempDir::new().unwrap();
    let (indexer, events) = open_reentrant(
        &dir,
        quarry::SynchronizationMode::Immediate,
        ReentrantEvents {
            submit_while_optimizing: true,
            ..Default::default()
        },
    );
    indexer.perform_indexing(vec![content("1", "seed")]).unwrap();

    indexer.optimize().unwrap();

    assert!(events.optimizing_fired.load(Ordering::SeqCst));
    assert!(events.error_messages().contains(&BUSY.to_string()));
    assert_eq!(indexer.pending_count(), 0);
    assert_eq!(indexer.searcher().find_by_id("late").unwrap().len(), 1);
    assert_eq!(indexer.searcher().document_count().unwrap(), 2);
}

#[test]
fn immediate_submit_against_locked_index_stays_queued() {
    let dir = TempDir::new().unwrap();
    let (indexer, events) = immediate(&dir);
    indexer.create_index().unwrap();

    let writer = hold_writer(&indexer);
    let err = indexer
        .perform_indexing(vec![content("1", "first")])
        .unwrap_err();
    assert!(matches!(err, QuarryError::IndexLocked(_)));
    assert!(events.error_messages().contains(&LOCKED.to_string()));
    assert_eq!(indexer.pending_count(), 1);

    writer.finish().unwrap();
    indexer
        .perform_indexing(vec![content("2", "second"), content("3", "third")])
        .unwrap();

    assert_eq!(indexer.pending_count(), 0);
    let searcher = indexer.searcher();
    for id in ["1", "2", "3"] {
        assert_eq!(searcher.find_by_id(id).unwrap().len(), 1, "missing {}", id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_submit_against_locked_index_stays_queued() {
    let dir = TempDir::new().unwrap();
    let (indexer, events) = background(&dir);
    indexer.create_index().unwrap();

    let writer = hold_writer(&indexer);
    indexer.perform_indexing(vec![content("1", "first")]).unwrap();
    assert!(wait_until(|| events.error_messages().contains(&LOCKED.to_string()), WAIT).await);
    assert!(!indexer.is_idle());
    assert_eq!(indexer.pending_count(), 1);

    writer.finish().unwrap();
    indexer
        .perform_indexing(vec![content("2", "second"), content("3", "third")])
        .unwrap();

    assert!(wait_until(|| events.indexed() == 3, WAIT).await);
    assert!(indexer.wait_for_idle(WAIT).await);
    assert_eq!(indexer.searcher().document_count().unwrap(), 3);
}

#[test]
fn create_index_reports_a_locked_index() {
    let dir = TempDir::new().unwrap();
    let (indexer, events) = immediate(&dir);
    indexer.create_index().unwrap();

    let writer = hold_writer(&indexer);
    let err = indexer.create_index().unwrap_err();
    assert!(matches!(err, QuarryError::IndexLocked(_)));
    assert_eq!(
        events.error_messages(),
        vec!["Cannot create index, the index is currently locked".to_string()]
    );
    writer.finish().unwrap();
    indexer.create_index().unwrap();
}

#[test]
fn shutdown_mid_drain_leaves_the_rest_queued() {
    let dir = TempDir::new().unwrap();
    let (indexer, events) = open_reentrant(
        &dir,
        quarry::SynchronizationMode::Immediate,
        ReentrantEvents {
            shutdown_after: Some(10),
            ..Default::default()
        },
    );

    let batch: Vec<_> = (0..50).map(|i| content(&i.to_string(), "batch")).collect();
    indexer.perform_indexing(batch).unwrap();

    assert_eq!(events.seen.load(Ordering::SeqCst), 10);
    assert_eq!(indexer.searcher().document_count().unwrap(), 10);
    assert_eq!(indexer.pending_count(), 40);

    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(indexer.pending_count(), 40);
    assert!(indexer.perform_indexing(vec![content("x", "late")]).is_err());
    assert_eq!(indexer.pending_count(), 40);
}
