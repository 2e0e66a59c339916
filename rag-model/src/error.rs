//! §7 error taxonomy. Every crate keeps its own local error enum
//! (`doc_chunker::ChunkError`, `providers::ProviderError`, ...) and converts
//! into `RagError` at the crate boundary, the same way the source workspace
//! keeps one error enum per crate without a shared umbrella — generalised
//! here into a single user-visible shape because the HTTP edge needs one
//! `{error, kind, retryable}` JSON body regardless of which component failed.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parse,
    Chunk,
    Embedding,
    VectorStore,
    GraphStore,
    Registry,
    Rerank,
    ProviderTimeout,
    Llm,
    Cancelled,
    BadRequest,
    NotFound,
    Conflict,
}

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct RagError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl RagError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        RagError { kind, message: message.into(), retryable: false, cause: None }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn cancelled() -> Self {
        RagError::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        RagError::new(ErrorKind::NotFound, what)
    }

    /// Shape required by §7: `{error, kind, retryable}`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.message,
            "kind": self.kind,
            "retryable": self.retryable,
        })
    }
}
