//! §4.E Document Registry: content-hash dedup, version history, logical
//! delete. Persisted as a single `registry.json`, written temp-then-rename.
//! Mirrors the teacher's upsert/delete orchestration shape (the deleted
//! `orchestrator.rs`'s batched list-then-delete loop) but against a plain
//! in-memory table instead of SQLite, since §6 names `registry.json`
//! literally rather than an embedded database.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rag_model::{Chunk, DocId, Document, DocStatus, DocType};

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestDecision {
    New,
    Duplicate { existing_doc_id: DocId },
    Update { existing_doc_id: DocId, new_version: u32 },
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RegistryStats {
    pub active_documents: u32,
    pub deleted_documents: u32,
    pub total_chunks: u32,
}

#[derive(Default, serde::Serialize, serde::Deserialize)]
pub struct DocumentRegistry {
    documents: HashMap<String, Document>,
    /// `doc_id -> chunk_ids`, in ingest order.
    chunk_index: HashMap<String, Vec<String>>,
    /// `chunk_id -> chunk`, the sole place chunk text is retained (the
    /// vector store only carries `ChunkMetadata`). Embeddings are never
    /// duplicated here; each stored `Chunk`'s `embedding` field stays `None`.
    chunks: HashMap<String, Chunk>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// §4.E: duplicate iff an active doc shares the hash; update iff an
    /// active doc shares the filename but the hash differs.
    pub fn ingest_decision(&self, hash: &str, filename: &str) -> IngestDecision {
        if let Some(doc) = self.active_by_hash(hash) {
            return IngestDecision::Duplicate { existing_doc_id: doc.doc_id.clone() };
        }
        if let Some(doc) = self.active_by_filename(filename) {
            return IngestDecision::Update { existing_doc_id: doc.doc_id.clone(), new_version: doc.version + 1 };
        }
        IngestDecision::New
    }

    fn active_by_hash(&self, hash: &str) -> Option<&Document> {
        self.documents.values().find(|d| d.status == DocStatus::Active && d.content_hash == hash)
    }

    fn active_by_filename(&self, filename: &str) -> Option<&Document> {
        self.documents.values().find(|d| d.status == DocStatus::Active && d.filename == filename)
    }

    pub fn commit_new(&mut self, doc: Document, chunks: &[Chunk]) {
        let ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.0.clone()).collect();
        for c in chunks {
            let mut stored = c.clone();
            stored.embedding = None;
            self.chunks.insert(stored.chunk_id.0.clone(), stored);
        }
        self.chunk_index.insert(doc.doc_id.0.clone(), ids);
        self.documents.insert(doc.doc_id.0.clone(), doc);
    }

    /// Atomic swap: the caller removes the old doc's chunks from the indices
    /// first, then calls this once both sides agree; on any earlier failure
    /// the caller never calls this and the registry stays at the old state.
    pub fn commit_update(&mut self, old_doc_id: &DocId, new_doc: Document, chunks: &[Chunk]) {
        self.remove_doc_chunks(old_doc_id);
        self.documents.remove(&old_doc_id.0);
        self.commit_new(new_doc, chunks);
    }

    /// Marks deleted but retains the row for audit, per §4.E.
    pub fn logical_delete(&mut self, doc_id: &DocId) -> Result<(), StoreError> {
        let doc = self.documents.get_mut(&doc_id.0).ok_or_else(|| StoreError::NotFound(doc_id.0.clone()))?;
        doc.status = DocStatus::Deleted;
        self.remove_doc_chunks(doc_id);
        Ok(())
    }

    fn remove_doc_chunks(&mut self, doc_id: &DocId) {
        if let Some(ids) = self.chunk_index.remove(&doc_id.0) {
            for id in ids {
                self.chunks.remove(&id);
            }
        }
    }

    pub fn get(&self, doc_id: &DocId) -> Option<&Document> {
        self.documents.get(&doc_id.0)
    }

    pub fn list(&self, doc_type: Option<DocType>, keyword: Option<&str>, include_deleted: bool) -> Vec<&Document> {
        self.documents
            .values()
            .filter(|d| include_deleted || d.status == DocStatus::Active)
            .filter(|d| doc_type.map(|t| d.doc_type == t).unwrap_or(true))
            .filter(|d| keyword.map(|k| d.filename.contains(k) || d.title.as_deref().unwrap_or("").contains(k)).unwrap_or(true))
            .collect()
    }

    pub fn get_chunk_ids(&self, doc_id: &DocId) -> Vec<String> {
        self.chunk_index.get(&doc_id.0).cloned().unwrap_or_default()
    }

    /// Full chunk bodies for a document, in ingest order. Used by the graph
    /// builder (rebuilds need chunk text, not just ids) and by the answerer
    /// when resolving citation snippets.
    pub fn get_chunks(&self, doc_id: &DocId) -> Vec<&Chunk> {
        self.chunk_index
            .get(&doc_id.0)
            .map(|ids| ids.iter().filter_map(|id| self.chunks.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks.get(chunk_id)
    }

    pub fn stats(&self) -> RegistryStats {
        let active_documents = self.documents.values().filter(|d| d.status == DocStatus::Active).count() as u32;
        let deleted_documents = self.documents.values().filter(|d| d.status == DocStatus::Deleted).count() as u32;
        let total_chunks = self.documents.values().filter(|d| d.status == DocStatus::Active).map(|d| d.chunk_count).sum();
        RegistryStats { active_documents, deleted_documents, total_chunks }
    }

    pub fn clear_all(&mut self) {
        self.documents.clear();
        self.chunk_index.clear();
        self.chunks.clear();
    }

    pub fn save(&self, dir: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(dir).map_err(|e| StoreError::Io { path: dir.display().to_string(), source: e })?;
        let path = dir.join("registry.json");
        let tmp: PathBuf = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| StoreError::Serialization(e.to_string()))?;
        fs::write(&tmp, &bytes).map_err(|e| StoreError::Io { path: tmp.display().to_string(), source: e })?;
        fs::rename(&tmp, &path).map_err(|e| StoreError::Io { path: path.display().to_string(), source: e })?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let path = dir.join("registry.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(&path).map_err(|e| StoreError::Io { path: path.display().to_string(), source: e })?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt { path: path.display().to_string(), reason: e.to_string() })
    }
}

/// Builds the `Document` row for a freshly-parsed file (version 1, active).
pub fn new_document(doc_id: DocId, filename: String, doc_type: DocType, title: Option<String>, content_hash: String, file_size_bytes: u64, chunk_count: u32) -> Document {
    Document {
        doc_id,
        filename,
        doc_type,
        title,
        content_hash,
        file_size_bytes,
        uploaded_at: Utc::now(),
        version: 1,
        status: DocStatus::Active,
        chunk_count,
        tags: Vec::new(),
    }
}
