use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Search(#[from] SearchError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid input: {0}")]
    InputValidation(String),

    #[error("embedding provider failed after {attempts} attempt(s): {details}")]
    ProviderTransient { attempts: u32, details: String },

    #[error("embedding provider rejected request: {0}")]
    ProviderPermanent(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("content {file_hash} is already stored as document {document_id}")]
    DuplicateContent {
        file_hash: String,
        document_id: String,
    },

    #[error("index consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl SearchError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Failure reported by an [`crate::Embedder`] for a single provider call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbeddingError {
    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("permanent provider failure: {0}")]
    Permanent(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("provider returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },
}

impl EmbeddingError {
    /// Network, timeout and 5xx-class failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn into_search_error(self, attempts: u32) -> SearchError {
        match self {
            Self::Transient(details) => SearchError::ProviderTransient { attempts, details },
            other => SearchError::ProviderPermanent(other.to_string()),
        }
    }
}

pub type Result<T, E = SearchError> = std::result::Result<T, E>;
