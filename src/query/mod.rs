pub mod criteria;
pub mod searcher;

pub use criteria::{
    BooleanOperation, Clause, SearchCriteria, SearchValue, SortField, ValueModifier,
    DEFAULT_MAX_RESULTS,
};
pub use searcher::{SearchResult, SearchResults, Searcher};
