use crate::error::Result;
use crate::index::document::stored_fields;
use crate::index::schema::{ANALYZED_FIELD, EXACT_FIELD};
use crate::index::Index;
use crate::query::criteria::{analyze, escape_phrase, json_text_pattern, SearchCriteria, SortField};
use crate::types::{CATEGORY_FIELD, NODE_ID_FIELD};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{BooleanQuery, EmptyQuery, Occur, Query, RegexQuery, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::{TantivyDocument, Term};

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    /// Stored values keyed by field name, including `__NodeId` and
    /// `__IndexCategory`.
    pub fields: IndexMap<String, String>,
}

impl SearchResult {
    pub fn category(&self) -> Option<&str> {
        self.fields.get(CATEGORY_FIELD).map(String::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub total_hits: usize,
    pub hits: Vec<SearchResult>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.id.as_str()).collect()
    }
}

/// Read side over an indexer's working folder. Opens a fresh reader per call.
#[derive(Debug, Clone)]
pub struct Searcher {
    path: PathBuf,
}

impl Searcher {
    pub fn new<P: AsRef<Path>>(index_path: P) -> Self {
        Searcher {
            path: index_path.as_ref().to_path_buf(),
        }
    }

    fn open(&self) -> Result<Index> {
        Index::open(&self.path)
    }

    pub fn create_criteria(&self) -> SearchCriteria {
        SearchCriteria::new()
    }

    pub fn create_criteria_for(&self, category: impl Into<String>) -> SearchCriteria {
        SearchCriteria::for_category(category)
    }

    pub fn search(&self, criteria: &SearchCriteria) -> Result<SearchResults> {
        let index = self.open()?;
        let query = criteria.build_query(&index)?;
        self.execute(&index, query.as_ref(), criteria.max_results, criteria.sort_fields())
    }

    /// Disjunction of `text` over every user field, optionally within one category.
    pub fn search_text(&self, text: &str, category: Option<&str>) -> Result<SearchResults> {
        self.search_text_with(text, category, false)
    }

    /// Like [`search_text`](Self::search_text); with `use_wildcards` every
    /// term also matches as a prefix.
    pub fn search_text_with(
        &self,
        text: &str,
        category: Option<&str>,
        use_wildcards: bool,
    ) -> Result<SearchResults> {
        let index = self.open()?;
        let fields = index.search_fields()?;
        let mut query = text_query(&index, &fields, text, use_wildcards)?;

        if let Some(category) = category {
            let term = Term::from_field_text(index.fields().category, &category.to_lowercase());
            query = Box::new(BooleanQuery::new(vec![
                (Occur::Must, query),
                (
                    Occur::Must,
                    Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>,
                ),
            ]));
        }
        self.execute(&index, query.as_ref(), crate::query::DEFAULT_MAX_RESULTS, &[])
    }

    /// User field names present in the index.
    pub fn search_fields(&self) -> Result<Vec<String>> {
        self.open()?.search_fields()
    }

    /// Live documents for `id`; more than one means the index holds duplicates.
    pub fn find_by_id(&self, id: &str) -> Result<Vec<SearchResult>> {
        Ok(self.search(&SearchCriteria::new().id(id))?.hits)
    }

    pub fn document_count(&self) -> Result<u64> {
        let index = self.open()?;
        let count = index.reader()?.searcher().num_docs();
        Ok(count)
    }

    fn execute(
        &self,
        index: &Index,
        query: &dyn Query,
        max_results: usize,
        sort: &[SortField],
    ) -> Result<SearchResults> {
        let reader = index.reader()?;
        let searcher = reader.searcher();

        let total_hits = searcher.search(query, &Count)?;
        // Sorting happens on stored values, so every hit has to be fetched.
        let limit = if sort.is_empty() {
            max_results
        } else {
            total_hits
        };
        let top_docs = searcher.search(query, &TopDocs::with_limit(limit.max(1)))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let (fields, sort_values) = stored_fields(&doc, index.fields());
            let id = fields.get(NODE_ID_FIELD).cloned().unwrap_or_default();
            hits.push((SearchResult { id, score, fields }, sort_values));
        }

        if !sort.is_empty() {
            hits.sort_by(|(_, a), (_, b)| compare_sort_values(a, b, sort));
            hits.truncate(max_results);
        }

        Ok(SearchResults {
            total_hits,
            hits: hits.into_iter().map(|(hit, _)| hit).collect(),
        })
    }
}

fn text_query(
    index: &Index,
    fields: &[String],
    text: &str,
    use_wildcards: bool,
) -> Result<Box<dyn Query>> {
    let tokens = analyze(index, text)?;
    if tokens.is_empty() || fields.is_empty() {
        return Ok(Box::new(EmptyQuery));
    }

    // Analyzed terms per token, plus the whole text for exact fields.
    let mut clauses = Vec::new();
    for field in fields {
        for token in &tokens {
            clauses.push(format!("{}.{}:{}", ANALYZED_FIELD, field, token));
        }
        clauses.push(format!(
            "{}.{}:\"{}\"",
            EXACT_FIELD,
            field,
            escape_phrase(text.trim())
        ));
    }

    let index_fields = index.fields();
    let parser = tantivy::query::QueryParser::for_index(
        index.inner(),
        vec![index_fields.analyzed, index_fields.exact],
    );
    let query = parser.parse_query(&clauses.join(" "))?;
    if !use_wildcards {
        return Ok(query);
    }

    let mut disjuncts: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Should, query)];
    for field in fields {
        for token in &tokens {
            let pattern = json_text_pattern(field, &format!("{}.*", regex::escape(token)));
            disjuncts.push((
                Occur::Should,
                Box::new(RegexQuery::from_pattern(&pattern, index_fields.analyzed)?),
            ));
        }
    }
    Ok(Box::new(BooleanQuery::new(disjuncts)))
}

/// Numeric comparison when both values parse, else lexicographic. Missing
/// values sort last in either direction.
fn compare_sort_values(
    a: &IndexMap<String, String>,
    b: &IndexMap<String, String>,
    sort: &[SortField],
) -> Ordering {
    for field in sort {
        let ordering = match (a.get(&field.name), b.get(&field.name)) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let natural = match (x.trim().parse::<f64>(), y.trim().parse::<f64>()) {
                    (Ok(xn), Ok(yn)) => xn.partial_cmp(&yn).unwrap_or(Ordering::Equal),
                    _ => x.cmp(y),
                };
                if field.descending {
                    natural.reverse()
                } else {
                    natural
                }
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
