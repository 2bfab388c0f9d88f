use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum QuarryError {
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index is locked: {0}")]
    IndexLocked(String),

    #[error("Another indexing operation is currently in progress")]
    DrainInProgress,

    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("Could not parse value: {value} into the type: {data_type}")]
    FieldParse { value: String, data_type: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Registration store error: {0}")]
    Registration(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Tantivy error: {0}")]
    Tantivy(String),

    #[error("Query parse error: {0}")]
    QueryParse(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, QuarryError>;

impl From<std::io::Error> for QuarryError {
    fn from(e: std::io::Error) -> Self {
        QuarryError::Io(e.to_string())
    }
}

impl From<tantivy::TantivyError> for QuarryError {
    fn from(e: tantivy::TantivyError) -> Self {
        match e {
            tantivy::TantivyError::LockFailure(lock_err, msg) => QuarryError::IndexLocked(
                msg.unwrap_or_else(|| lock_err.to_string()),
            ),
            other => QuarryError::Tantivy(other.to_string()),
        }
    }
}

impl From<tantivy::query::QueryParserError> for QuarryError {
    fn from(e: tantivy::query::QueryParserError) -> Self {
        QuarryError::QueryParse(e.to_string())
    }
}

impl From<serde_json::Error> for QuarryError {
    fn from(e: serde_json::Error) -> Self {
        QuarryError::Json(e.to_string())
    }
}

impl QuarryError {
    /// Errors a drain can recover from by retrying on the next trigger.
    pub fn is_transient(&self) -> bool {
        matches!(self, QuarryError::IndexLocked(_) | QuarryError::DrainInProgress)
    }
}
