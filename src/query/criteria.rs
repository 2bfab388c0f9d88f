use crate::config::IndexerConfig;
use crate::error::{QuarryError, Result};
use crate::index::document::{flatten_date, parse_date};
use crate::index::schema::{ANALYZED_FIELD, EXACT_FIELD};
use crate::index::Index;
use crate::types::DateResolution;
use tantivy::query::{
    AllQuery, BooleanQuery, BoostQuery, FuzzyTermQuery, Occur, Query, QueryParser, RegexQuery,
    TermQuery,
};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::tokenizer::TokenStream;
use tantivy::Term;

/// Connective placed before the next clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanOperation {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeBound {
    Int(i64),
    Double(f64),
}

impl RangeBound {
    fn render(&self) -> String {
        match self {
            RangeBound::Int(i) => i.to_string(),
            // Keep the decimal point so the bound is read as a float.
            RangeBound::Double(f) => format!("{:?}", f),
        }
    }
}

/// How a single search value is matched against a field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueModifier {
    /// Phrase match on the analyzed or the exact value.
    Default,
    /// Query syntax in the value is taken literally. Same match as `Default`.
    Escaped,
    /// `*` and `?` wildcards, matched per term.
    Wildcard,
    /// Per-term edit distance, 1 or 2.
    Fuzzy(u8),
    Boost(f32),
    /// Phrase allowing `slop` positions between terms.
    Proximity(u32),
}

/// A search value plus its matching modifier.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchValue {
    pub value: String,
    pub modifier: ValueModifier,
}

impl SearchValue {
    pub fn new(value: impl Into<String>) -> Self {
        SearchValue {
            value: value.into(),
            modifier: ValueModifier::Default,
        }
    }

    pub fn escaped(mut self) -> Self {
        self.modifier = ValueModifier::Escaped;
        self
    }

    /// Use the value as a wildcard pattern as written.
    pub fn wildcard(mut self) -> Self {
        self.modifier = ValueModifier::Wildcard;
        self
    }

    /// Append `*` unless the value already has a wildcard.
    pub fn multiple_character_wildcard(self) -> Self {
        self.with_wildcard_suffix('*')
    }

    /// Append `?` unless the value already has a wildcard.
    pub fn single_character_wildcard(self) -> Self {
        self.with_wildcard_suffix('?')
    }

    fn with_wildcard_suffix(mut self, suffix: char) -> Self {
        if !self.value.contains(['*', '?']) {
            self.value.push(suffix);
        }
        self.wildcard()
    }

    pub fn fuzzy(mut self, distance: u8) -> Self {
        self.modifier = ValueModifier::Fuzzy(distance.clamp(1, 2));
        self
    }

    pub fn boost(mut self, boost: f32) -> Self {
        self.modifier = ValueModifier::Boost(boost);
        self
    }

    pub fn proximity(mut self, slop: u32) -> Self {
        self.modifier = ValueModifier::Proximity(slop);
        self
    }
}

impl From<&str> for SearchValue {
    fn from(value: &str) -> Self {
        SearchValue::new(value)
    }
}

impl From<String> for SearchValue {
    fn from(value: String) -> Self {
        SearchValue::new(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Id(String),
    Field { name: String, value: SearchValue },
    Range {
        name: String,
        low: RangeBound,
        high: RangeBound,
        inclusive: bool,
    },
    Grouped {
        fields: Vec<String>,
        values: Vec<SearchValue>,
        op: BooleanOperation,
    },
    /// One operation per field; a single value applies to every field.
    Flexible {
        fields: Vec<String>,
        operations: Vec<BooleanOperation>,
        values: Vec<SearchValue>,
    },
    Raw(String),
    /// A clause that could not be built; fails the search.
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub name: String,
    pub descending: bool,
}

pub const DEFAULT_MAX_RESULTS: usize = 500;

/// Fluent query builder.
///
/// Clauses are joined left to right by the preceding operation (`and` by
/// default). `or` starts a new group, so `a and b or c not d` means
/// `(a AND b) OR (c AND NOT d)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCriteria {
    pub(crate) category: Option<String>,
    pub(crate) clauses: Vec<(BooleanOperation, Clause)>,
    pub(crate) sort: Vec<SortField>,
    pub(crate) max_results: usize,
    next_op: BooleanOperation,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        SearchCriteria {
            category: None,
            clauses: Vec::new(),
            sort: Vec::new(),
            max_results: DEFAULT_MAX_RESULTS,
            next_op: BooleanOperation::And,
        }
    }
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_category(category: impl Into<String>) -> Self {
        SearchCriteria {
            category: Some(category.into()),
            ..Self::default()
        }
    }

    fn push(mut self, clause: Clause) -> Self {
        let op = std::mem::replace(&mut self.next_op, BooleanOperation::And);
        self.clauses.push((op, clause));
        self
    }

    pub fn and(mut self) -> Self {
        self.next_op = BooleanOperation::And;
        self
    }

    pub fn or(mut self) -> Self {
        self.next_op = BooleanOperation::Or;
        self
    }

    pub fn not(mut self) -> Self {
        self.next_op = BooleanOperation::Not;
        self
    }

    pub fn id(self, id: impl Into<String>) -> Self {
        self.push(Clause::Id(id.into()))
    }

    /// Match `value` against a user field, analyzed or exact. Pass a
    /// [`SearchValue`] for wildcard, fuzzy, boosted or proximity matching.
    pub fn field(self, name: impl Into<String>, value: impl Into<SearchValue>) -> Self {
        self.push(Clause::Field {
            name: name.into(),
            value: value.into(),
        })
    }

    pub fn range_int(self, name: impl Into<String>, low: i32, high: i32, inclusive: bool) -> Self {
        self.range(name, RangeBound::Int(low as i64), RangeBound::Int(high as i64), inclusive)
    }

    pub fn range_long(self, name: impl Into<String>, low: i64, high: i64, inclusive: bool) -> Self {
        self.range(name, RangeBound::Int(low), RangeBound::Int(high), inclusive)
    }

    pub fn range_double(
        self,
        name: impl Into<String>,
        low: f64,
        high: f64,
        inclusive: bool,
    ) -> Self {
        self.range(name, RangeBound::Double(low), RangeBound::Double(high), inclusive)
    }

    /// Range over a date field indexed at `resolution`. Unparseable bounds
    /// make the whole search fail with `InvalidQuery`.
    pub fn range_date(
        self,
        name: impl Into<String>,
        start: &str,
        end: &str,
        resolution: DateResolution,
        inclusive: bool,
    ) -> Self {
        let bound = |s: &str| parse_date(s.trim()).map(|d| flatten_date(&d, resolution));
        match (bound(start), bound(end)) {
            (Some(low), Some(high)) => {
                self.range(name, RangeBound::Int(low), RangeBound::Int(high), inclusive)
            }
            _ => self.push(Clause::Invalid(format!(
                "invalid date range '{}' TO '{}'",
                start, end
            ))),
        }
    }

    fn range(self, name: impl Into<String>, low: RangeBound, high: RangeBound, inclusive: bool) -> Self {
        self.push(Clause::Range {
            name: name.into(),
            low,
            high,
            inclusive,
        })
    }

    pub fn grouped_or(self, fields: &[&str], values: &[&str]) -> Self {
        self.grouped(fields, values, BooleanOperation::Or)
    }

    pub fn grouped_and(self, fields: &[&str], values: &[&str]) -> Self {
        self.grouped(fields, values, BooleanOperation::And)
    }

    pub fn grouped_not(self, fields: &[&str], values: &[&str]) -> Self {
        self.grouped(fields, values, BooleanOperation::Not)
    }

    fn grouped(self, fields: &[&str], values: &[&str], op: BooleanOperation) -> Self {
        self.push(Clause::Grouped {
            fields: fields.iter().map(|s| s.to_string()).collect(),
            values: values.iter().map(|s| SearchValue::new(*s)).collect(),
            op,
        })
    }

    /// `fields[i]` joins the group with `operations[i]`. Either one value per
    /// field or a single value shared by all of them.
    pub fn grouped_flexible(
        self,
        fields: &[&str],
        operations: &[BooleanOperation],
        values: &[SearchValue],
    ) -> Self {
        self.push(Clause::Flexible {
            fields: fields.iter().map(|s| s.to_string()).collect(),
            operations: operations.to_vec(),
            values: values.to_vec(),
        })
    }

    /// Native tantivy query syntax over the schema (`__Analyzed.title:foo`).
    pub fn raw_query(self, query: impl Into<String>) -> Self {
        self.push(Clause::Raw(query.into()))
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortField {
            name: field.into(),
            descending: false,
        });
        self
    }

    pub fn order_by_descending(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortField {
            name: field.into(),
            descending: true,
        });
        self
    }

    pub fn max_results(mut self, n: usize) -> Self {
        self.max_results = n.max(1);
        self
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn sort_fields(&self) -> &[SortField] {
        &self.sort
    }

    /// Compile into a tantivy query against `index`.
    pub fn build_query(&self, index: &Index) -> Result<Box<dyn Query>> {
        let compiler = ClauseCompiler::new(index);

        let mut groups: Vec<Vec<(Occur, Box<dyn Query>)>> = vec![Vec::new()];
        for (op, clause) in &self.clauses {
            let query = compiler.compile(clause)?;
            let occur = match op {
                BooleanOperation::And => Occur::Must,
                BooleanOperation::Not => Occur::MustNot,
                BooleanOperation::Or => {
                    if groups.last().is_some_and(|g| !g.is_empty()) {
                        groups.push(Vec::new());
                    }
                    Occur::Must
                }
            };
            if let Some(group) = groups.last_mut() {
                group.push((occur, query));
            }
        }

        let mut disjuncts: Vec<(Occur, Box<dyn Query>)> = groups
            .into_iter()
            .filter(|g| !g.is_empty())
            .map(|g| (Occur::Should, conjunction(g)))
            .collect();

        let body: Box<dyn Query> = match disjuncts.len() {
            0 => Box::new(AllQuery),
            1 => disjuncts.remove(0).1,
            _ => Box::new(BooleanQuery::new(disjuncts)),
        };

        match &self.category {
            Some(category) => {
                let term = Term::from_field_text(index.fields().category, &category.to_lowercase());
                Ok(Box::new(BooleanQuery::new(vec![
                    (Occur::Must, body),
                    (
                        Occur::Must,
                        Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>,
                    ),
                ])))
            }
            None => Ok(body),
        }
    }
}

/// A group of only negative clauses matches everything else.
fn conjunction(mut clauses: Vec<(Occur, Box<dyn Query>)>) -> Box<dyn Query> {
    if clauses.iter().all(|(o, _)| *o == Occur::MustNot) {
        clauses.push((Occur::Must, Box::new(AllQuery)));
    }
    if clauses.len() == 1 && clauses[0].0 == Occur::Must {
        return clauses.remove(0).1;
    }
    Box::new(BooleanQuery::new(clauses))
}

struct ClauseCompiler<'a> {
    index: &'a Index,
    parser: QueryParser,
}

impl<'a> ClauseCompiler<'a> {
    fn new(index: &'a Index) -> Self {
        let fields = index.fields();
        let parser = QueryParser::for_index(index.inner(), vec![fields.analyzed, fields.exact]);
        ClauseCompiler { index, parser }
    }

    fn parse(&self, query: &str) -> Result<Box<dyn Query>> {
        self.parser
            .parse_query(query)
            .map_err(|e| QuarryError::InvalidQuery(format!("{}: {}", query, e)))
    }

    fn compile(&self, clause: &Clause) -> Result<Box<dyn Query>> {
        match clause {
            Clause::Id(id) => {
                let term = Term::from_field_text(self.index.fields().node_id, &id.to_lowercase());
                Ok(Box::new(TermQuery::new(term, IndexRecordOption::Basic)))
            }
            Clause::Field { name, value } => self.value_query(name, value),
            Clause::Range {
                name,
                low,
                high,
                inclusive,
            } => {
                check_field_name(name)?;
                let (open, close) = if *inclusive { ('[', ']') } else { ('{', '}') };
                self.parse(&format!(
                    "{}.{}:{}{} TO {}{}",
                    EXACT_FIELD,
                    name,
                    open,
                    low.render(),
                    high.render(),
                    close
                ))
            }
            Clause::Grouped { fields, values, op } => {
                let occur = occurrence(*op);
                let mut subqueries = Vec::new();
                for field in fields {
                    for value in values {
                        subqueries.push((occur, self.value_query(field, value)?));
                    }
                }
                if subqueries.is_empty() {
                    return Err(QuarryError::InvalidQuery(
                        "grouped clause needs at least one field and value".to_string(),
                    ));
                }
                Ok(conjunction_or_any(subqueries))
            }
            Clause::Flexible {
                fields,
                operations,
                values,
            } => {
                if fields.is_empty() || operations.len() != fields.len() {
                    return Err(QuarryError::InvalidQuery(format!(
                        "grouped clause has {} fields but {} operations",
                        fields.len(),
                        operations.len()
                    )));
                }
                if values.len() != 1 && values.len() != fields.len() {
                    return Err(QuarryError::InvalidQuery(format!(
                        "grouped clause has {} fields but {} values",
                        fields.len(),
                        values.len()
                    )));
                }
                let mut subqueries = Vec::with_capacity(fields.len());
                for (i, (field, op)) in fields.iter().zip(operations).enumerate() {
                    let value = values.get(i).unwrap_or(&values[0]);
                    subqueries.push((occurrence(*op), self.value_query(field, value)?));
                }
                Ok(conjunction_or_any(subqueries))
            }
            Clause::Raw(query) => self.parse(query),
            Clause::Invalid(reason) => Err(QuarryError::InvalidQuery(reason.clone())),
        }
    }

    fn value_query(&self, name: &str, value: &SearchValue) -> Result<Box<dyn Query>> {
        check_field_name(name)?;
        let fields = self.index.fields();
        match value.modifier {
            // Values are always quoted, so escaping needs nothing extra.
            ValueModifier::Default | ValueModifier::Escaped => {
                self.parse(&field_match(name, &value.value)?)
            }
            ValueModifier::Boost(boost) => {
                let inner = self.parse(&field_match(name, &value.value)?)?;
                Ok(Box::new(BoostQuery::new(inner, boost)))
            }
            ValueModifier::Proximity(slop) => self.parse(&format!(
                "{}.{}:\"{}\"~{}",
                ANALYZED_FIELD,
                name,
                escape_phrase(&value.value),
                slop
            )),
            ValueModifier::Wildcard => {
                let analyzed = RegexQuery::from_pattern(
                    &json_text_pattern(name, &wildcard_regex(&value.value.to_lowercase())),
                    fields.analyzed,
                )?;
                let exact = RegexQuery::from_pattern(
                    &json_text_pattern(name, &wildcard_regex(&value.value)),
                    fields.exact,
                )?;
                Ok(Box::new(BooleanQuery::new(vec![
                    (Occur::Should, Box::new(analyzed) as Box<dyn Query>),
                    (Occur::Should, Box::new(exact) as Box<dyn Query>),
                ])))
            }
            ValueModifier::Fuzzy(distance) => {
                let tokens = analyze(self.index, &value.value)?;
                if tokens.is_empty() {
                    return Ok(Box::new(tantivy::query::EmptyQuery));
                }
                // Every analyzed term within `distance`, or the whole exact value.
                let per_token: Vec<(Occur, Box<dyn Query>)> = tokens
                    .iter()
                    .map(|token| {
                        let term = json_text_term(fields.analyzed, name, token);
                        (
                            Occur::Must,
                            Box::new(FuzzyTermQuery::new(term, distance, true)) as Box<dyn Query>,
                        )
                    })
                    .collect();
                let exact_term = json_text_term(fields.exact, name, value.value.trim());
                Ok(Box::new(BooleanQuery::new(vec![
                    (Occur::Should, Box::new(BooleanQuery::new(per_token)) as Box<dyn Query>),
                    (
                        Occur::Should,
                        Box::new(FuzzyTermQuery::new(exact_term, distance, true)) as Box<dyn Query>,
                    ),
                ])))
            }
        }
    }
}

fn occurrence(op: BooleanOperation) -> Occur {
    match op {
        BooleanOperation::Or => Occur::Should,
        BooleanOperation::And => Occur::Must,
        BooleanOperation::Not => Occur::MustNot,
    }
}

/// Term for a string value under a JSON path: `<path>\0s<text>`.
pub(crate) fn json_text_term(field: Field, path: &str, text: &str) -> Term {
    Term::from_field_text(field, &format!("{}\0s{}", path, text))
}

/// Regex over the JSON term dictionary for a string value under `path`.
pub(crate) fn json_text_pattern(path: &str, value_regex: &str) -> String {
    format!("{}\\x00s{}", regex::escape(path), value_regex)
}

/// `*` matches any run of characters, `?` exactly one; the rest is literal.
pub(crate) fn wildcard_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out
}

/// Run `text` through the index's text analyzer.
pub(crate) fn analyze(index: &Index, text: &str) -> Result<Vec<String>> {
    let mut analyzer = index
        .inner()
        .tokenizers()
        .get(crate::index::schema::TEXT_TOKENIZER)
        .ok_or_else(|| {
            QuarryError::Tantivy(format!(
                "tokenizer '{}' is not registered",
                crate::index::schema::TEXT_TOKENIZER
            ))
        })?;
    let mut tokens = Vec::new();
    let mut stream = analyzer.token_stream(text);
    while stream.advance() {
        tokens.push(stream.token().text.clone());
    }
    Ok(tokens)
}

fn conjunction_or_any(clauses: Vec<(Occur, Box<dyn Query>)>) -> Box<dyn Query> {
    if clauses.iter().all(|(o, _)| *o == Occur::Should) {
        return Box::new(BooleanQuery::new(clauses));
    }
    conjunction(clauses)
}

fn check_field_name(name: &str) -> Result<()> {
    if IndexerConfig::is_valid_field_name(name) {
        Ok(())
    } else {
        Err(QuarryError::InvalidQuery(format!(
            "invalid field name: {}",
            name
        )))
    }
}

pub(crate) fn escape_phrase(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Either object may hold the field depending on its policy.
fn field_match(name: &str, value: &str) -> Result<String> {
    check_field_name(name)?;
    let phrase = escape_phrase(value);
    Ok(format!(
        "({}.{name}:\"{phrase}\" OR {}.{name}:\"{phrase}\")",
        ANALYZED_FIELD, EXACT_FIELD
    ))
}
