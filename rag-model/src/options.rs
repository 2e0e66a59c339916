//! §9 "Replacing dynamic config objects": request options are enumerated
//! structs, never implicit kwargs.

use crate::DocType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkerMode {
    Regulation,
    AuditReport,
    AuditIssue,
    Default,
    /// Auto-select by scanning a content prefix; see §4.B and §9(i).
    Smart,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkerOptions {
    pub mode: ChunkerMode,
    pub size: usize,
    pub overlap: usize,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        ChunkerOptions { mode: ChunkerMode::Smart, size: 500, overlap: 50 }
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunker: ChunkerOptions,
    pub doc_type: DocType,
    pub save_after: bool,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    Vector,
    Graph,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOptions {
    pub mode: RetrievalMode,
    pub hops: u8,
    pub alpha: f32,
    pub top_k: usize,
    pub rerank_top_k: usize,
    pub use_rerank: bool,
    /// A category (all regulation variants, all report/issue variants), not
    /// a single `DocType` — see `rag_model::ChunkFilter::doc_types`.
    pub doc_type_filter: Option<Vec<DocType>>,
}

/// §4.H default fusion weight, resolving Open Question (ii).
pub const DEFAULT_HYBRID_ALPHA: f32 = 0.65;

impl Default for RetrievalOptions {
    fn default() -> Self {
        RetrievalOptions {
            mode: RetrievalMode::Hybrid,
            hops: 2,
            alpha: DEFAULT_HYBRID_ALPHA,
            top_k: 5,
            rerank_top_k: 15,
            use_rerank: true,
            doc_type_filter: None,
        }
    }
}
