//! §4.D Vector Store: dense float matrix + parallel metadata list, persisted
//! as two files (`vector.index`, `vector.docs`) written temp-then-rename so a
//! crash never leaves a half-written pair. No embedded search engine (the
//! teacher's tantivy/HNSW/SQLite stack) sits behind this — §4.D specifies
//! the on-disk shape literally, so a flat matrix is the grounded contract.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rag_model::{ChunkFilter, ChunkId, ChunkMetadata, DocId};

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

#[derive(Default)]
pub struct VectorStore {
    dimension: Option<usize>,
    vectors: Vec<Vec<f32>>,
    metadata: Vec<ChunkMetadata>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Appends rows; returns the assigned `[start, end)` ordinal range.
    pub fn add(&mut self, vectors: Vec<Vec<f32>>, metadatas: Vec<ChunkMetadata>) -> Result<(usize, usize), StoreError> {
        if vectors.len() != metadatas.len() {
            return Err(StoreError::Serialization("vectors/metadata length mismatch".into()));
        }
        let dim = match self.dimension {
            Some(d) => d,
            None => vectors.first().map(|v| v.len()).unwrap_or(0),
        };
        for v in &vectors {
            if v.len() != dim {
                return Err(StoreError::DimensionMismatch { expected: dim, actual: v.len() });
            }
        }
        self.dimension = Some(dim);
        let start = self.vectors.len();
        self.vectors.extend(vectors);
        self.metadata.extend(metadatas);
        Ok((start, self.vectors.len()))
    }

    /// Cosine-similarity top-k search with an AND filter (§4.D).
    pub fn search(&self, query: &[f32], top_k: usize, filter: &ChunkFilter) -> Vec<ScoredEntry> {
        let mut scored: Vec<ScoredEntry> = self
            .vectors
            .iter()
            .zip(self.metadata.iter())
            .filter(|(_, meta)| filter.matches(meta))
            .map(|(v, meta)| ScoredEntry { chunk_id: meta.chunk_id.clone(), score: cosine_similarity(query, v), metadata: meta.clone() })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    /// Metadata for a single chunk, used by the graph-only retrieval path to
    /// resolve filename/section_path lazily for graph-seeded hits (§4.H).
    pub fn metadata_for(&self, chunk_id: &ChunkId) -> Option<&ChunkMetadata> {
        self.metadata.iter().find(|m| &m.chunk_id == chunk_id)
    }

    /// Removes every entry whose metadata references `doc_id`, compacting
    /// the matrix. Invalidates nothing cached, since this store holds no
    /// query-plan cache.
    pub fn delete_by_doc(&mut self, doc_id: &DocId) -> usize {
        let before = self.vectors.len();
        let keep: Vec<bool> = self.metadata.iter().map(|m| &m.doc_id != doc_id).collect();
        let mut vi = 0usize;
        self.vectors.retain(|_| { let k = keep[vi]; vi += 1; k });
        self.metadata.retain(|m| &m.doc_id != doc_id);
        before - self.vectors.len()
    }

    /// Drops entries whose `chunk_id` is not in `live`; used at load-time
    /// reconciliation against the registry (§4.D orphan-removal invariant).
    pub fn retain_live(&mut self, live: &std::collections::HashSet<ChunkId>) -> usize {
        let before = self.vectors.len();
        let keep: Vec<bool> = self.metadata.iter().map(|m| live.contains(&m.chunk_id)).collect();
        let mut vi = 0usize;
        self.vectors.retain(|_| { let k = keep[vi]; vi += 1; k });
        self.metadata.retain(|m| live.contains(&m.chunk_id));
        before - self.vectors.len()
    }

    pub fn save(&self, dir: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(dir).map_err(|e| StoreError::Io { path: dir.display().to_string(), source: e })?;
        let index_path = dir.join("vector.index");
        let docs_path = dir.join("vector.docs");

        let dim = self.dimension.unwrap_or(0) as u32;
        let mut buf: Vec<u8> = Vec::with_capacity(4 + self.vectors.len() * dim as usize * 4);
        buf.extend_from_slice(&dim.to_le_bytes());
        buf.extend_from_slice(&(self.vectors.len() as u32).to_le_bytes());
        for v in &self.vectors {
            for f in v {
                buf.extend_from_slice(&f.to_le_bytes());
            }
        }
        write_atomic(&index_path, &buf)?;

        let docs_json = serde_json::to_vec(&self.metadata).map_err(|e| StoreError::Serialization(e.to_string()))?;
        write_atomic(&docs_path, &docs_json)?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let index_path = dir.join("vector.index");
        let docs_path = dir.join("vector.docs");
        if !index_path.exists() || !docs_path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read(&index_path).map_err(|e| StoreError::Io { path: index_path.display().to_string(), source: e })?;
        if raw.len() < 8 {
            return Err(StoreError::Corrupt { path: index_path.display().to_string(), reason: "truncated header".into() });
        }
        let dim = u32::from_le_bytes(raw[0..4].try_into().unwrap()) as usize;
        let count = u32::from_le_bytes(raw[4..8].try_into().unwrap()) as usize;
        let expected_len = 8 + count * dim * 4;
        if raw.len() != expected_len {
            return Err(StoreError::Corrupt { path: index_path.display().to_string(), reason: "length does not match header".into() });
        }
        let mut vectors = Vec::with_capacity(count);
        let mut cursor = 8usize;
        for _ in 0..count {
            let mut v = Vec::with_capacity(dim);
            for _ in 0..dim {
                let f = f32::from_le_bytes(raw[cursor..cursor + 4].try_into().unwrap());
                v.push(f);
                cursor += 4;
            }
            vectors.push(v);
        }

        let docs_raw = fs::read(&docs_path).map_err(|e| StoreError::Io { path: docs_path.display().to_string(), source: e })?;
        let metadata: Vec<ChunkMetadata> = serde_json::from_slice(&docs_raw).map_err(|e| StoreError::Corrupt { path: docs_path.display().to_string(), reason: e.to_string() })?;

        if metadata.len() != vectors.len() {
            return Err(StoreError::Corrupt { path: docs_path.display().to_string(), reason: "vector/metadata count mismatch".into() });
        }

        Ok(Self { dimension: if count > 0 { Some(dim) } else { None }, vectors, metadata })
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp: PathBuf = path.with_extension(format!("{}.tmp", path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")));
    {
        let mut f = fs::File::create(&tmp).map_err(|e| StoreError::Io { path: tmp.display().to_string(), source: e })?;
        f.write_all(bytes).map_err(|e| StoreError::Io { path: tmp.display().to_string(), source: e })?;
        f.sync_all().map_err(|e| StoreError::Io { path: tmp.display().to_string(), source: e })?;
    }
    fs::rename(&tmp, path).map_err(|e| StoreError::Io { path: path.display().to_string(), source: e })?;
    Ok(())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_model::{ChunkId, DocId, DocType};

    fn meta(doc: &str, chunk: &str) -> ChunkMetadata {
        ChunkMetadata {
            chunk_id: ChunkId(chunk.to_string()),
            doc_id: DocId(doc.to_string()),
            doc_type: DocType::InternalRegulation,
            title: None,
            filename: "regs.txt".into(),
            page_nos: vec![1],
            header: "h".into(),
            section_path: vec![],
        }
    }

    #[test]
    fn search_ranks_by_cosine_similarity_descending() {
        let mut store = VectorStore::new();
        store.add(vec![vec![1.0, 0.0], vec![0.0, 1.0]], vec![meta("d1", "d1:0"), meta("d1", "d1:1")]).unwrap();
        let hits = store.search(&[1.0, 0.0], 2, &ChunkFilter::default());
        assert_eq!(hits[0].chunk_id, ChunkId("d1:0".to_string()));
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn delete_by_doc_removes_all_its_entries_and_compacts() {
        let mut store = VectorStore::new();
        store.add(vec![vec![1.0, 0.0], vec![0.0, 1.0]], vec![meta("d1", "d1:0"), meta("d2", "d2:0")]).unwrap();
        let removed = store.delete_by_doc(&DocId("d1".to_string()));
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn save_then_load_round_trips_vectors_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new();
        store.add(vec![vec![0.1, 0.2, 0.3]], vec![meta("d1", "d1:0")]).unwrap();
        store.save(dir.path()).unwrap();
        let loaded = VectorStore::load(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.metadata[0].chunk_id, ChunkId("d1:0".to_string()));
    }

    #[test]
    fn mismatched_vector_and_metadata_lengths_are_rejected() {
        let mut store = VectorStore::new();
        let err = store.add(vec![vec![1.0]], vec![]).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
