//! Shared data model for the audit/compliance retrieval pipeline.
//!
//! This crate has no I/O of its own: it is the plain-data vocabulary that
//! `doc-chunker`, `providers`, `index-store`, and `rag-service` all share,
//! plus the single error taxonomy every crate's local error converts into.

pub mod error;
pub mod graph;
pub mod options;
pub mod session;

pub use error::{ErrorKind, RagError};
pub use graph::{Evidence, GraphEdge, GraphNode, GraphNodeType, NodeId, EDGE_WEIGHT_MAX};
pub use options::{ChunkerMode, ChunkerOptions, IngestOptions, RetrievalMode, RetrievalOptions};
pub use session::{Role, Session, SessionId, Turn};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Content-addressed document identity: 16 hex chars of a digest over
/// normalised content (Unicode NFC, LF line endings, trimmed trailing
/// whitespace per line). See `doc-chunker::hashing` for the computation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub String);

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl DocId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Stable across restarts: `{doc_id}:{ordinal}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub String);

impl ChunkId {
    pub fn new(doc_id: &DocId, ordinal: u32) -> Self {
        ChunkId(format!("{}:{}", doc_id.0, ordinal))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The owning document id, parsed back out of the chunk id.
    pub fn doc_id(&self) -> DocId {
        match self.0.rsplit_once(':') {
            Some((doc, _ord)) => DocId(doc.to_string()),
            None => DocId(self.0.clone()),
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    InternalRegulation,
    ExternalRegulation,
    InternalReport,
    ExternalReport,
    AuditIssue,
}

impl DocType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocType::InternalRegulation => "internal_regulation",
            DocType::ExternalRegulation => "external_regulation",
            DocType::InternalReport => "internal_report",
            DocType::ExternalReport => "external_report",
            DocType::AuditIssue => "audit_issue",
        }
    }

    /// True for documents the `regulation_query` intent should be scoped to.
    pub fn is_regulation(self) -> bool {
        matches!(self, DocType::InternalRegulation | DocType::ExternalRegulation)
    }

    /// True for documents the `audit_query`/`issue_query` intents should be scoped to.
    pub fn is_report_or_issue(self) -> bool {
        matches!(
            self,
            DocType::InternalReport | DocType::ExternalReport | DocType::AuditIssue
        )
    }

    pub const ALL: [DocType; 5] = [
        DocType::InternalRegulation,
        DocType::ExternalRegulation,
        DocType::InternalReport,
        DocType::ExternalReport,
        DocType::AuditIssue,
    ];

    /// Every `DocType` `is_regulation` admits — the category a
    /// `regulation_query` intent should retrieve across.
    pub fn regulation_types() -> Vec<DocType> {
        DocType::ALL.into_iter().filter(|d| d.is_regulation()).collect()
    }

    /// Every `DocType` `is_report_or_issue` admits — the category an
    /// `audit_query`/`issue_query` intent should retrieve across.
    pub fn report_or_issue_types() -> Vec<DocType> {
        DocType::ALL.into_iter().filter(|d| d.is_report_or_issue()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocStatus {
    Active,
    Deleted,
}

/// §3 Document. Identity is `doc_id`; `(content_hash, status=active)` is
/// unique by construction of the registry's commit path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: DocId,
    pub filename: String,
    pub doc_type: DocType,
    pub title: Option<String>,
    pub content_hash: String,
    pub file_size_bytes: u64,
    pub uploaded_at: chrono::DateTime<chrono::Utc>,
    pub version: u32,
    pub status: DocStatus,
    pub chunk_count: u32,
    pub tags: Vec<String>,
}

/// One of the four structural tags a chunk boundary was cut on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticBoundary {
    Article,
    Section,
    Paragraph,
    Row,
    Generic,
}

/// §3 Chunk. Never exists without its document; `embedding` is populated
/// once the embedding provider has run and is `None` for a freshly-parsed
/// chunk awaiting ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub doc_id: DocId,
    pub ordinal: u32,
    pub text: String,
    pub char_count: usize,
    pub page_nos: Vec<u32>,
    pub header: String,
    pub section_path: Vec<String>,
    pub semantic_boundary: SemanticBoundary,
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn new(
        doc_id: DocId,
        ordinal: u32,
        text: String,
        page_nos: Vec<u32>,
        section_path: Vec<String>,
        semantic_boundary: SemanticBoundary,
    ) -> Self {
        let chunk_id = ChunkId::new(&doc_id, ordinal);
        let header = text.lines().next().unwrap_or("").trim().to_string();
        let char_count = text.chars().count();
        Self {
            chunk_id,
            doc_id,
            ordinal,
            text,
            char_count,
            page_nos,
            header,
            section_path,
            semantic_boundary,
            embedding: None,
        }
    }
}

/// §3 Vector Index Entry's filterable metadata half; the vector itself is
/// stored separately by `index-store::vector_store`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_id: ChunkId,
    pub doc_id: DocId,
    pub doc_type: DocType,
    pub title: Option<String>,
    pub filename: String,
    pub page_nos: Vec<u32>,
    pub header: String,
    pub section_path: Vec<String>,
}

impl ChunkMetadata {
    pub fn from_chunk(c: &Chunk, doc: &Document) -> Self {
        ChunkMetadata {
            chunk_id: c.chunk_id.clone(),
            doc_id: c.doc_id.clone(),
            doc_type: doc.doc_type,
            title: doc.title.clone(),
            filename: doc.filename.clone(),
            page_nos: c.page_nos.clone(),
            header: c.header.clone(),
            section_path: c.section_path.clone(),
        }
    }
}

/// A filter applied at vector-store or graph-retriever query time. AND
/// semantics across populated fields, per §4.D. `doc_types` is a category
/// (e.g. all regulation variants), not a single type, so an intent like
/// `regulation_query` can retrieve across every `DocType` the category
/// admits rather than narrowing to one variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkFilter {
    pub doc_types: Option<Vec<DocType>>,
    pub doc_ids: Option<Vec<DocId>>,
    pub title_contains: Option<String>,
}

impl ChunkFilter {
    pub fn matches(&self, meta: &ChunkMetadata) -> bool {
        if let Some(types) = &self.doc_types {
            if !types.contains(&meta.doc_type) {
                return false;
            }
        }
        if let Some(ids) = &self.doc_ids {
            if !ids.contains(&meta.doc_id) {
                return false;
            }
        }
        if let Some(needle) = &self.title_contains {
            let hay = meta.title.as_deref().unwrap_or(&meta.filename);
            if !hay.contains(needle.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Outcome of processing a single file within an ingest request (§4.M).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    New,
    Skipped,
    Updated,
    Failed,
}

/// Aggregated response for an `ingest` request across all submitted files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub processed: u32,
    pub skipped: u32,
    pub updated: u32,
    pub failed: u32,
    pub total_chunks: u32,
    pub per_file: Vec<FileOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    pub filename: String,
    pub outcome: IngestOutcome,
    pub doc_id: Option<DocId>,
    pub chunk_count: u32,
    pub error: Option<String>,
}

impl IngestReport {
    pub fn record(&mut self, outcome: FileOutcome) {
        match outcome.outcome {
            IngestOutcome::New => {
                self.processed += 1;
                self.total_chunks += outcome.chunk_count;
            }
            IngestOutcome::Skipped => self.skipped += 1,
            IngestOutcome::Updated => {
                self.updated += 1;
                self.total_chunks += outcome.chunk_count;
            }
            IngestOutcome::Failed => self.failed += 1,
        }
        self.per_file.push(outcome);
    }
}

/// A single scored retrieval hit, surfaced from `index-store` through
/// `rag-service`'s hybrid retriever and reranker alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: ChunkId,
    pub doc_id: DocId,
    pub score: f32,
    pub vector_score: Option<f32>,
    pub graph_score: Option<f32>,
    pub rerank_score: Option<f32>,
    pub metadata: ChunkMetadata,
    pub text: String,
}

/// Opaque bag used by extractors and providers to stash extra fields
/// without widening the core structs; mirrors the teacher's `extra` maps.
pub type ExtraFields = BTreeMap<String, serde_json::Value>;
