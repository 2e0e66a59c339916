use thiserror::Error;

/// §4.D/§4.E/§4.F failure modes; `From` impls below fold these into
/// `rag_model::RagError` at the `rag-service` boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("corrupt index file {path}: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("{0}")]
    Serialization(String),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<StoreError> for rag_model::RagError {
    fn from(err: StoreError) -> Self {
        let kind = match &err {
            StoreError::NotFound(_) => rag_model::ErrorKind::NotFound,
            StoreError::Conflict(_) => rag_model::ErrorKind::Conflict,
            StoreError::DimensionMismatch { .. } | StoreError::Corrupt { .. } => rag_model::ErrorKind::VectorStore,
            StoreError::Io { .. } | StoreError::Serialization(_) => rag_model::ErrorKind::Registry,
        };
        rag_model::RagError::new(kind, err.to_string())
    }
}
