//! §4.C/§4.I/§4.K provider interfaces: three explicit capability traits —
//! embedding, rerank, LLM — each with a single operation and a declared
//! error taxonomy, constructed by a factory keyed on profile config (§9
//! "Replacing duck-typed providers"). Every trait has a real-ish
//! implementation and a deterministic, network-free implementation so the
//! rest of the workspace can be tested without live models, following the
//! `OnnxStdIoEmbedder`/`OnnxHttpEmbedder` split this crate's embedder module
//! already used for exactly that reason.

pub mod config;
pub mod embedder;
pub mod llm;
pub mod rerank;
pub mod retry;

pub use embedder::{Embedder, EmbedderError, EmbedderInfo, ProviderKind};
pub use llm::{LlmError, LlmProvider, StreamEvent};
pub use rerank::{RerankError, RerankProvider};
pub use retry::{with_retry, RetryPolicy};

use rag_model::{ErrorKind, RagError};

impl From<EmbedderError> for RagError {
    fn from(e: EmbedderError) -> Self {
        let retryable = matches!(e, EmbedderError::ProviderFailure { .. });
        RagError::new(ErrorKind::Embedding, e.to_string()).retryable(retryable)
    }
}

impl From<RerankError> for RagError {
    fn from(e: RerankError) -> Self {
        let retryable = matches!(e, RerankError::ProviderFailure { .. });
        RagError::new(ErrorKind::Rerank, e.to_string()).retryable(retryable)
    }
}

impl From<LlmError> for RagError {
    fn from(e: LlmError) -> Self {
        let retryable = matches!(e, LlmError::ProviderFailure { .. });
        RagError::new(ErrorKind::Llm, e.to_string()).retryable(retryable)
    }
}
