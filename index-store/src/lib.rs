//! Persistence layer for the retrieval pipeline: §4.D Vector Store, §4.E
//! Document Registry, §4.F Graph Store/Builder, §4.G Graph Retriever. All
//! four on-disk artifacts named in §6 (`registry.json`, `vector.index`,
//! `vector.docs`, `graph.bin`) live under one data root and are loaded /
//! reconciled together by `Indices::open`.

pub mod error;
pub mod graph_retriever;
pub mod graph_store;
pub mod registry;
pub mod vector_store;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rag_model::{ChunkId, DocId};

pub use error::StoreError;
pub use graph_store::GraphStore;
pub use registry::{DocumentRegistry, IngestDecision, RegistryStats};
pub use vector_store::VectorStore;

/// The three persisted stores, owned exclusively by the orchestrator per
/// §5's "no other component may mutate them".
pub struct Indices {
    pub root: PathBuf,
    pub registry: DocumentRegistry,
    pub vectors: VectorStore,
    pub graph: GraphStore,
}

impl Indices {
    /// Loads all three stores and reconciles them against the registry, the
    /// single commit marker (§7 "on crash mid-commit, recovery at startup:
    /// scan registry vs indices; drop any chunk set whose owning document
    /// row is not marked committed"): orphan vectors (whose chunk_id isn't
    /// in any active document's chunk set) are dropped, and graph evidence
    /// for any doc_id the registry doesn't list as active is pruned. A
    /// missing graph file is left empty rather than triggering a rebuild
    /// here — `rag-service::orchestrator` decides when to call
    /// `rebuild_graph` against the reconciled registry.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        let registry = DocumentRegistry::load(&root)?;
        let mut vectors = VectorStore::load(&root)?;
        let mut graph = GraphStore::load(&root)?;

        let live_chunks: HashSet<ChunkId> = registry_live_chunk_ids(&registry);
        let dropped_vectors = vectors.retain_live(&live_chunks);
        if dropped_vectors > 0 {
            tracing::warn!(dropped = dropped_vectors, "dropped orphan vector entries at load reconciliation");
        }

        let live_docs: HashSet<DocId> = registry.list(None, None, false).into_iter().map(|d| d.doc_id.clone()).collect();
        let dropped_graph_nodes = graph.retain_live(&live_docs);
        if dropped_graph_nodes > 0 {
            tracing::warn!(dropped = dropped_graph_nodes, "dropped orphan graph evidence at load reconciliation");
        }

        Ok(Self { root, registry, vectors, graph })
    }

    /// Writes vectors and the graph before the registry, so the registry
    /// file on disk is always the last thing to change (§7's commit
    /// marker): a crash mid-save can only leave vector/graph entries the
    /// registry doesn't yet know about, which `open`'s reconciliation pass
    /// drops as orphans, never the reverse (a registry that claims chunks
    /// the other stores never received).
    pub fn save(&self) -> Result<(), StoreError> {
        self.vectors.save(&self.root)?;
        self.graph.save(&self.root)?;
        self.registry.save(&self.root)?;
        Ok(())
    }

    /// Deletes everything belonging to `doc_id` across all three stores, per
    /// the §3 invariant "deleting a document deletes all its chunks
    /// atomically" and the §8 graph-evidence cleanup invariant.
    pub fn delete_document(&mut self, doc_id: &DocId) -> Result<(), StoreError> {
        self.vectors.delete_by_doc(doc_id);
        self.graph.prune_evidence_for_doc(doc_id);
        self.registry.logical_delete(doc_id)
    }

    pub fn clear_all(&mut self) {
        self.registry.clear_all();
        self.vectors = VectorStore::new();
        self.graph.clear();
    }
}

fn registry_live_chunk_ids(registry: &DocumentRegistry) -> HashSet<ChunkId> {
    registry
        .list(None, None, false)
        .into_iter()
        .flat_map(|doc| registry.get_chunk_ids(&doc.doc_id))
        .map(ChunkId)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_model::{Chunk, ChunkFilter, ChunkMetadata, DocType, SemanticBoundary};

    #[test]
    fn open_on_empty_dir_yields_empty_indices() {
        let dir = tempfile::tempdir().unwrap();
        let indices = Indices::open(dir.path()).unwrap();
        assert_eq!(indices.vectors.len(), 0);
        assert_eq!(indices.registry.stats().active_documents, 0);
    }

    #[test]
    fn save_then_open_round_trips_and_reconciles_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let mut indices = Indices::open(dir.path()).unwrap();

        let doc_id = DocId("d1".into());
        let chunk = Chunk::new(doc_id.clone(), 0, "第一条 内容。".into(), vec![1], vec![], SemanticBoundary::Article);
        let doc = registry::new_document(doc_id.clone(), "regs.txt".into(), DocType::InternalRegulation, None, "h1".into(), 10, 1);
        indices.registry.commit_new(doc, &[chunk.clone()]);
        let meta = ChunkMetadata::from_chunk(&chunk, indices.registry.get(&doc_id).unwrap());
        indices.vectors.add(vec![vec![0.1, 0.2]], vec![meta]).unwrap();
        // An orphan vector with no backing registry chunk.
        let orphan_doc = registry::new_document(DocId("ghost".into()), "ghost.txt".into(), DocType::InternalRegulation, None, "h2".into(), 1, 1);
        let orphan_chunk = Chunk::new(DocId("ghost".into()), 0, "幽灵".into(), vec![], vec![], SemanticBoundary::Generic);
        let orphan_meta = ChunkMetadata::from_chunk(&orphan_chunk, &orphan_doc);
        indices.vectors.add(vec![vec![0.9, 0.1]], vec![orphan_meta]).unwrap();

        indices.save().unwrap();

        let reopened = Indices::open(dir.path()).unwrap();
        assert_eq!(reopened.vectors.len(), 1);
        let hits = reopened.vectors.search(&[0.1, 0.2], 5, &ChunkFilter::default());
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn reopen_drops_graph_evidence_for_docs_the_registry_never_committed() {
        let dir = tempfile::tempdir().unwrap();
        let mut indices = Indices::open(dir.path()).unwrap();

        // Simulates a crash between `vectors.save`/`graph.save` and
        // `registry.save`: the graph has evidence for a doc the registry
        // never learned about.
        let ghost_id = DocId("ghost".into());
        let ghost_chunk = Chunk::new(ghost_id.clone(), 0, "第一条 幽灵条款。".into(), vec![], vec![], SemanticBoundary::Article);
        graph_store::extract_and_merge(&mut indices.graph, &ghost_id, "ghost.txt", &[ghost_chunk]);
        assert!(indices.graph.nodes().any(|n| n.node_type == rag_model::GraphNodeType::Clause));

        indices.save().unwrap();
        let reopened = Indices::open(dir.path()).unwrap();
        assert!(!reopened.graph.nodes().any(|n| n.node_type == rag_model::GraphNodeType::Clause));
    }

    #[test]
    fn delete_document_removes_vectors_and_marks_registry_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let mut indices = Indices::open(dir.path()).unwrap();
        let doc_id = DocId("d1".into());
        let chunk = Chunk::new(doc_id.clone(), 0, "第一条 内容。".into(), vec![1], vec![], SemanticBoundary::Article);
        let doc = registry::new_document(doc_id.clone(), "regs.txt".into(), DocType::InternalRegulation, None, "h1".into(), 10, 1);
        indices.registry.commit_new(doc, &[chunk.clone()]);
        let meta = ChunkMetadata::from_chunk(&chunk, indices.registry.get(&doc_id).unwrap());
        indices.vectors.add(vec![vec![0.1, 0.2]], vec![meta]).unwrap();

        indices.delete_document(&doc_id).unwrap();
        assert_eq!(indices.vectors.len(), 0);
        assert_eq!(indices.registry.stats().active_documents, 0);
    }
}
