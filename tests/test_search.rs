mod common;

use common::{add, immediate};
use quarry::{
    BooleanOperation, DateResolution, FieldDataType, FieldIndexPolicy, IndexItem,
    IndexOperation, ItemField, QuarryError, SearchValue,
};
use tempfile::TempDir;

fn product(id: &str, title: &str, price: &str, stock: &str, published: &str) -> IndexOperation {
    add(IndexItem::new(id, "product")
        .with_text("title", title)
        .with_field("price", ItemField::typed(price, FieldDataType::Double).sortable())
        .with_field("stock", ItemField::typed(stock, FieldDataType::Int).sortable())
        .with_field(
            "published",
            ItemField::typed(published, FieldDataType::Date(DateResolution::Day)),
        ))
}

fn seeded() -> (TempDir, std::sync::Arc<quarry::Indexer>) {
    let dir = TempDir::new().unwrap();
    let (indexer, _) = immediate(&dir);
    indexer
        .perform_indexing(vec![
            product("1", "Red bicycle", "19.99", "5", "2010-03-15"),
            product("2", "Blue bicycle helmet", "45.50", "12", "2012-07-01"),
            product("3", "Green kettle", "9.25", "40", "2015-11-30"),
            add(IndexItem::new("4", "article").with_text("title", "Bicycle maintenance")),
        ])
        .unwrap();
    (dir, indexer)
}

#[test]
fn date_range_matches_flattened_dates() {
    let (_dir, indexer) = seeded();
    let searcher = indexer.searcher();

    let hit = searcher
        .search(&searcher.create_criteria().range_date(
            "published",
            "2010-03-01",
            "2010-03-31",
            DateResolution::Day,
            true,
        ))
        .unwrap();
    assert_eq!(hit.ids(), vec!["1"]);

    let miss = searcher
        .search(&searcher.create_criteria().range_date(
            "published",
            "2011-01-01",
            "2011-12-31",
            DateResolution::Day,
            true,
        ))
        .unwrap();
    assert_eq!(miss.total_hits, 0);
}

#[test]
fn invalid_date_bound_is_an_invalid_query() {
    let (_dir, indexer) = seeded();
    let searcher = indexer.searcher();
    let err = searcher
        .search(&searcher.create_criteria().range_date(
            "published",
            "someday",
            "2011-12-31",
            DateResolution::Day,
            true,
        ))
        .unwrap_err();
    assert!(matches!(err, QuarryError::InvalidQuery(_)));
}

#[test]
fn numeric_ranges_match_typed_fields() {
    let (_dir, indexer) = seeded();
    let searcher = indexer.searcher();

    let cheap = searcher
        .search(&searcher.create_criteria().range_double("price", 10.0, 20.0, true))
        .unwrap();
    assert_eq!(cheap.ids(), vec!["1"]);

    let none = searcher
        .search(&searcher.create_criteria().range_double("price", 100.0, 200.0, true))
        .unwrap();
    assert_eq!(none.total_hits, 0);

    let stocked = searcher
        .search(&searcher.create_criteria().range_int("stock", 10, 40, false))
        .unwrap();
    assert_eq!(stocked.ids(), vec!["2"]);
}

#[test]
fn text_search_scores_are_non_increasing() {
    let (_dir, indexer) = seeded();
    let results = indexer.searcher().search_text("bicycle helmet", None).unwrap();

    assert_eq!(results.total_hits, 3);
    assert_eq!(results.hits[0].id, "2");
    for pair in results.hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn text_search_within_category() {
    let (_dir, indexer) = seeded();
    let results = indexer
        .searcher()
        .search_text("bicycle", Some("Article"))
        .unwrap();
    assert_eq!(results.ids(), vec!["4"]);
}

#[test]
fn sort_order_follows_direction() {
    let (_dir, indexer) = seeded();
    let searcher = indexer.searcher();

    let ascending = searcher
        .search(&searcher.create_criteria_for("product").order_by("price"))
        .unwrap();
    let descending = searcher
        .search(&searcher.create_criteria_for("product").order_by_descending("price"))
        .unwrap();

    assert_eq!(ascending.ids(), vec!["3", "1", "2"]);
    assert_eq!(descending.ids(), vec!["2", "1", "3"]);
    assert_ne!(ascending.hits[0].id, descending.hits[0].id);
}

#[test]
fn or_starts_a_new_group() {
    let (_dir, indexer) = seeded();
    let searcher = indexer.searcher();

    let criteria = searcher
        .create_criteria()
        .field("title", "bicycle")
        .not()
        .field("title", "helmet")
        .or()
        .field("title", "kettle");
    let results = searcher.search(&criteria).unwrap();
    let mut ids = results.ids();
    ids.sort();
    assert_eq!(ids, vec!["1", "3", "4"]);
}

#[test]
fn grouped_clauses_cover_every_field_and_value() {
    let (_dir, indexer) = seeded();
    let searcher = indexer.searcher();

    let any = searcher
        .search(
            &searcher
                .create_criteria_for("product")
                .grouped_or(&["title"], &["red", "green"]),
        )
        .unwrap();
    assert_eq!(any.total_hits, 2);

    let none_of = searcher
        .search(
            &searcher
                .create_criteria_for("product")
                .grouped_not(&["title"], &["red", "green"]),
        )
        .unwrap();
    assert_eq!(none_of.ids(), vec!["2"]);
}

#[test]
fn max_results_limits_hits_not_total() {
    let (_dir, indexer) = seeded();
    let searcher = indexer.searcher();
    let results = searcher
        .search(&searcher.create_criteria().field("title", "bicycle").max_results(1))
        .unwrap();
    assert_eq!(results.total_hits, 3);
    assert_eq!(results.hits.len(), 1);
}

#[test]
fn search_fields_hide_reserved_names() {
    let (_dir, indexer) = seeded();
    let fields = indexer.searcher().search_fields().unwrap();
    assert!(fields.contains(&"title".to_string()));
    assert!(fields.contains(&"price".to_string()));
    assert!(fields.iter().all(|f| !f.starts_with("__")));
}

#[test]
fn not_analyzed_fields_match_whole_values_only() {
    let dir = TempDir::new().unwrap();
    let config = common::config(&dir, quarry::SynchronizationMode::Immediate)
        .with_field("sku", FieldIndexPolicy::NotAnalyzed)
        .with_field("notes", FieldIndexPolicy::No);
    let (indexer, _) = common::open(config);
    indexer
        .perform_indexing(vec![add(IndexItem::new("1", "product")
            .with_text("sku", "AB-100 X")
            .with_text("notes", "internal only"))])
        .unwrap();

    let searcher = indexer.searcher();
    let whole = searcher
        .search(&searcher.create_criteria().field("sku", "AB-100 X"))
        .unwrap();
    assert_eq!(whole.total_hits, 1);
    assert_eq!(whole.hits[0].get("notes"), Some("internal only"));

    let partial = searcher
        .search(&searcher.create_criteria().field("sku", "AB"))
        .unwrap();
    assert_eq!(partial.total_hits, 0);

    let stored_only = searcher
        .search(&searcher.create_criteria().field("notes", "internal"))
        .unwrap();
    assert_eq!(stored_only.total_hits, 0);
}

#[test]
fn invalid_field_name_is_rejected() {
    let (_dir, indexer) = seeded();
    let searcher = indexer.searcher();
    let err = searcher
        .search(&searcher.create_criteria().field("bad name:", "x"))
        .unwrap_err();
    assert!(matches!(err, QuarryError::InvalidQuery(_)));
}

fn sorted(mut ids: Vec<&str>) -> Vec<&str> {
    ids.sort();
    ids
}

#[test]
fn wildcard_values_match_term_prefixes() {
    let (_dir, indexer) = seeded();
    let searcher = indexer.searcher();

    let many = searcher
        .search(
            &searcher
                .create_criteria()
                .field("title", SearchValue::new("BIC").multiple_character_wildcard()),
        )
        .unwrap();
    assert_eq!(sorted(many.ids()), vec!["1", "2", "4"]);

    let one = searcher
        .search(&searcher.create_criteria().field("title", SearchValue::new("k?ttle").wildcard()))
        .unwrap();
    assert_eq!(one.ids(), vec!["3"]);
}

#[test]
fn fuzzy_values_tolerate_typos() {
    let (_dir, indexer) = seeded();
    let searcher = indexer.searcher();

    let exact = searcher
        .search(&searcher.create_criteria().field("title", "bicycel"))
        .unwrap();
    assert_eq!(exact.total_hits, 0);

    let fuzzy = searcher
        .search(&searcher.create_criteria().field("title", SearchValue::new("bicycel").fuzzy(2)))
        .unwrap();
    assert_eq!(sorted(fuzzy.ids()), vec!["1", "2", "4"]);
}

#[test]
fn boosted_value_ranks_first() {
    let (_dir, indexer) = seeded();
    let searcher = indexer.searcher();

    let plain = searcher
        .search(&searcher.create_criteria().field("title", "red").or().field("title", "blue"))
        .unwrap();
    assert_eq!(plain.hits[0].id, "1");

    let boosted = searcher
        .search(
            &searcher
                .create_criteria()
                .field("title", "red")
                .or()
                .field("title", SearchValue::new("blue").boost(10.0)),
        )
        .unwrap();
    assert_eq!(boosted.hits[0].id, "2");
}

#[test]
fn proximity_and_escaped_values() {
    let (_dir, indexer) = seeded();
    let searcher = indexer.searcher();

    let near = searcher
        .search(
            &searcher
                .create_criteria()
                .field("title", SearchValue::new("blue helmet").proximity(1)),
        )
        .unwrap();
    assert_eq!(near.ids(), vec!["2"]);

    let whole = searcher
        .search(
            &searcher
                .create_criteria()
                .field("title", SearchValue::new("Green kettle").escaped()),
        )
        .unwrap();
    assert_eq!(whole.ids(), vec!["3"]);

    let syntax = searcher
        .search(
            &searcher
                .create_criteria()
                .field("title", SearchValue::new("kettle) OR (title:red").escaped()),
        )
        .unwrap();
    assert_eq!(syntax.total_hits, 0);
}

#[test]
fn grouped_flexible_applies_an_operation_per_field() {
    let (_dir, indexer) = seeded();
    let searcher = indexer.searcher();

    let results = searcher
        .search(&searcher.create_criteria().grouped_flexible(
            &["title", "title"],
            &[BooleanOperation::And, BooleanOperation::Not],
            &[SearchValue::new("bicycle"), SearchValue::new("helmet")],
        ))
        .unwrap();
    assert_eq!(sorted(results.ids()), vec!["1", "4"]);

    let err = searcher
        .search(&searcher.create_criteria().grouped_flexible(
            &["title", "title"],
            &[BooleanOperation::And],
            &[SearchValue::new("bicycle")],
        ))
        .unwrap_err();
    assert!(matches!(err, QuarryError::InvalidQuery(_)));
}

#[test]
fn text_search_with_wildcards_matches_partial_words() {
    let (_dir, indexer) = seeded();
    let searcher = indexer.searcher();

    assert_eq!(searcher.search_text("bicy", None).unwrap().total_hits, 0);
    let partial = searcher.search_text_with("bicy", None, true).unwrap();
    assert_eq!(sorted(partial.ids()), vec!["1", "2", "4"]);
    let in_category = searcher.search_text_with("kett", Some("product"), true).unwrap();
    assert_eq!(in_category.ids(), vec!["3"]);
}
