mod common;

use common::{content, immediate, open};
use quarry::config::SynchronizationMode;
use quarry::index::document::DocumentBuilder;
use quarry::index::{DrainGuard, Index};
use quarry::{IndexItem, NoopEvents};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn optimize_runs_once_threshold_is_reached() {
    let dir = TempDir::new().unwrap();
    let mut config = common::config(&dir, SynchronizationMode::Immediate);
    config.optimization_commit_threshold = 3;
    let (indexer, events) = open(config);

    indexer
        .perform_indexing(vec![content("1", "one"), content("2", "two")])
        .unwrap();
    assert_eq!(events.optimized.load(Ordering::SeqCst), 0);
    assert_eq!(indexer.commit_count(), 2);

    indexer.perform_indexing(vec![content("3", "three")]).unwrap();
    assert_eq!(events.optimized.load(Ordering::SeqCst), 1);
    assert_eq!(indexer.commit_count(), 0);
    assert_eq!(indexer.searcher().document_count().unwrap(), 3);
}

#[test]
fn optimize_keeps_newest_duplicate() {
    let dir = TempDir::new().unwrap();
    let (indexer, events) = immediate(&dir);
    indexer.create_index().unwrap();

    // Write duplicates behind the indexer's back, one commit each.
    {
        let index = Index::open(indexer.config().index_path()).unwrap();
        let builder = DocumentBuilder::new(index.fields(), indexer.config());
        let flag = Arc::new(AtomicBool::new(false));
        let mut writer = index
            .writer(
                indexer.config().writer_buffer_bytes(),
                DrainGuard::try_acquire(&flag).unwrap(),
            )
            .unwrap();
        for title in ["old", "middle", "new"] {
            let item = IndexItem::new("dup", "content").with_text("title", title);
            writer.add_document(builder.build(&item, &NoopEvents)).unwrap();
            writer.commit().unwrap();
        }
        writer.finish().unwrap();
    }
    assert_eq!(indexer.searcher().find_by_id("dup").unwrap().len(), 3);

    indexer.optimize().unwrap();

    let hits = indexer.searcher().find_by_id("dup").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].get("title"), Some("new"));
    assert_eq!(events.optimized.load(Ordering::SeqCst), 1);
}

#[test]
fn optimize_without_index_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let (indexer, events) = immediate(&dir);
    indexer.optimize().unwrap();
    assert!(!indexer.index_exists());
    assert_eq!(events.optimized.load(Ordering::SeqCst), 0);
}

#[test]
fn optimize_preserves_searchability() {
    let dir = TempDir::new().unwrap();
    let (indexer, _) = immediate(&dir);
    for i in 0..5 {
        indexer
            .perform_indexing(vec![content(&i.to_string(), "searchable kettle")])
            .unwrap();
    }
    indexer.optimize().unwrap();

    let results = indexer.searcher().search_text("kettle", None).unwrap();
    assert_eq!(results.total_hits, 5);
}
