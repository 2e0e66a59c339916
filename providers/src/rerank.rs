//! §4.I Rerank Provider interface. No cross-encoder exists in the teacher
//! workspace; this follows the same shape `embedder::Embedder` already
//! established — one operation, a declared error taxonomy, a real HTTP-ish
//! implementation and a deterministic offline implementation used in tests
//! and as the HTTP provider's degraded mode.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RerankError {
    #[error("invalid rerank configuration: {message}")]
    InvalidConfiguration { message: String },
    #[error("rerank document count {actual} exceeds vendor limit {max}")]
    TooManyDocuments { max: usize, actual: usize },
    #[error("rerank provider failure: {message}")]
    ProviderFailure { message: String },
}

impl RerankError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RerankError::ProviderFailure { .. })
    }
}

/// One (query, document) pair to be scored, addressed by its caller-assigned
/// index so the reranked order can be projected back onto full chunk
/// records without this crate knowing about `rag-model`'s `ScoredChunk`.
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankScore {
    pub index: usize,
    pub score: f32,
}

/// Cross-encodes `(query, chunk)` pairs into refined relevance scores.
/// Implementations enforce their own vendor limits (document count, max
/// character length per document) by truncating/batching internally.
pub trait RerankProvider: Send + Sync {
    fn rerank(&self, query: &str, candidates: &[RerankCandidate]) -> Result<Vec<RerankScore>, RerankError>;
    fn max_documents(&self) -> usize;
    fn max_chars_per_doc(&self) -> usize;
}

/// Deterministic, network-free reranker: scores each candidate by a
/// hash-seeded pseudo-relevance function over (query, truncated text),
/// mirroring `embedder::DeterministicEmbedderCore`'s role as the offline
/// stand-in for a vendor the core cannot call from tests.
#[derive(Debug, Clone)]
pub struct DeterministicReranker {
    max_documents: usize,
    max_chars_per_doc: usize,
}

impl DeterministicReranker {
    pub fn new(max_documents: usize, max_chars_per_doc: usize) -> Self {
        DeterministicReranker { max_documents, max_chars_per_doc }
    }
}

impl Default for DeterministicReranker {
    fn default() -> Self {
        DeterministicReranker::new(100, 4000)
    }
}

impl RerankProvider for DeterministicReranker {
    fn rerank(&self, query: &str, candidates: &[RerankCandidate]) -> Result<Vec<RerankScore>, RerankError> {
        if candidates.len() > self.max_documents {
            return Err(RerankError::TooManyDocuments { max: self.max_documents, actual: candidates.len() });
        }

        let query_tokens = token_set(query);
        let mut out = Vec::with_capacity(candidates.len());
        for c in candidates {
            let truncated: String = c.text.chars().take(self.max_chars_per_doc).collect();
            let overlap = overlap_score(&query_tokens, &truncated);
            let jitter = hash_jitter(query, &truncated);
            // Blend lexical overlap (dominant, deterministic signal a real
            // cross-encoder would also pick up on) with a small hash-derived
            // perturbation so ties are broken stably but not uniformly.
            out.push(RerankScore { index: c.index, score: (overlap * 0.9 + jitter * 0.1).clamp(0.0, 1.0) });
        }
        Ok(out)
    }

    fn max_documents(&self) -> usize {
        self.max_documents
    }

    fn max_chars_per_doc(&self) -> usize {
        self.max_chars_per_doc
    }
}

fn token_set(text: &str) -> Vec<String> {
    text.split_whitespace().map(|s| s.to_lowercase()).collect()
}

fn overlap_score(query_tokens: &[String], doc_text: &str) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let doc_lower = doc_text.to_lowercase();
    let hits = query_tokens.iter().filter(|t| doc_lower.contains(t.as_str())).count();
    hits as f32 / query_tokens.len() as f32
}

fn hash_jitter(query: &str, doc: &str) -> f32 {
    let mut hasher = DefaultHasher::new();
    query.hash(&mut hasher);
    doc.hash(&mut hasher);
    let h = hasher.finish();
    (h as f64 / u64::MAX as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_lexical_overlap_scores_higher() {
        let reranker = DeterministicReranker::default();
        let candidates = vec![
            RerankCandidate { index: 0, text: "internal control review of procurement".into() },
            RerankCandidate { index: 1, text: "weather forecast for tomorrow".into() },
        ];
        let scores = reranker.rerank("procurement internal control", &candidates).unwrap();
        let s0 = scores.iter().find(|s| s.index == 0).unwrap().score;
        let s1 = scores.iter().find(|s| s.index == 1).unwrap().score;
        assert!(s0 > s1);
    }

    #[test]
    fn vendor_doc_limit_is_enforced() {
        let reranker = DeterministicReranker::new(1, 100);
        let candidates = vec![
            RerankCandidate { index: 0, text: "a".into() },
            RerankCandidate { index: 1, text: "b".into() },
        ];
        let err = reranker.rerank("q", &candidates).unwrap_err();
        assert_eq!(err, RerankError::TooManyDocuments { max: 1, actual: 2 });
    }
}
