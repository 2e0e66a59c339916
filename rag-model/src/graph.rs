//! §3 Graph Node / Graph Edge data model. `index-store::graph_store` owns
//! the actual in-memory multigraph; this module only defines the node/edge
//! vocabulary shared with the extractors and the retriever.

use crate::{ChunkId, DocId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable hash of `(type, canonical_name)`, computed by
/// `index-store::graph_store::node_id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphNodeType {
    Document,
    Chunk,
    Clause,
    Department,
    RiskType,
    Issue,
    RectificationAction,
    RectificationStatus,
    Year,
    Section,
    Topic,
}

impl GraphNodeType {
    /// `document`/`chunk` are structural scaffolding nodes; §3 requires a
    /// non-empty evidence list for everything else.
    pub fn is_structural(self) -> bool {
        matches!(self, GraphNodeType::Document | GraphNodeType::Chunk)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GraphNodeType::Document => "document",
            GraphNodeType::Chunk => "chunk",
            GraphNodeType::Clause => "clause",
            GraphNodeType::Department => "department",
            GraphNodeType::RiskType => "risk_type",
            GraphNodeType::Issue => "issue",
            GraphNodeType::RectificationAction => "rectification_action",
            GraphNodeType::RectificationStatus => "rectification_status",
            GraphNodeType::Year => "year",
            GraphNodeType::Section => "section",
            GraphNodeType::Topic => "topic",
        }
    }
}

/// Links a node or edge back to the chunk that justified extracting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub doc_id: DocId,
    pub chunk_id: ChunkId,
    pub extractor_name: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub node_id: NodeId,
    pub node_type: GraphNodeType,
    pub display_name: String,
    pub attrs: BTreeMap<String, String>,
    pub evidence: Vec<Evidence>,
}

impl GraphNode {
    pub fn evidence_chunk_ids(&self) -> Vec<ChunkId> {
        self.evidence.iter().map(|e| e.chunk_id.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub relation: String,
    pub weight: f32,
    pub evidence: Vec<Evidence>,
}

impl GraphEdge {
    pub fn evidence_count(&self) -> usize {
        self.evidence.len()
    }
}

/// Cap applied when merging duplicate `(source, target, relation)` edges,
/// per §4.F's `min(w1+w2, W_MAX)` merge rule.
pub const EDGE_WEIGHT_MAX: f32 = 10.0;
