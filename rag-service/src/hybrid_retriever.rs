//! §4.H Hybrid Retriever. Grounded directly on
//! `hybrid_service::HybridService::search_hybrid`'s score-map fusion
//! (`HashMap<chunk_id, f32>` accumulation of weighted contributions, then
//! sort and truncate) — generalized from the teacher's fixed text/vector
//! weight pair to the vector/graph α fusion, with both sides normalized to
//! `[0,1]` before fusing so α=1.0/α=0.0 degrade exactly to the pure-mode
//! paths (§8 property 6).

use std::collections::HashMap;

use index_store::Indices;
use rag_model::{ChunkFilter, ChunkId, ChunkMetadata, RetrievalMode, RetrievalOptions, ScoredChunk};

const GRAPH_NODE_CAP: usize = 200;

/// Min-max normalizes a score map into `[0,1]`. An empty map, or one where
/// every score is equal, normalizes to all-zero (no signal to rank by)
/// except the single-candidate case, which normalizes to 1.0.
fn normalize(mut scores: HashMap<ChunkId, f32>) -> HashMap<ChunkId, f32> {
    if scores.is_empty() {
        return scores;
    }
    let min = scores.values().cloned().fold(f32::INFINITY, f32::min);
    let max = scores.values().cloned().fold(f32::NEG_INFINITY, f32::max);
    let span = max - min;
    for v in scores.values_mut() {
        *v = if span > 0.0 { (*v - min) / span } else if max > 0.0 { 1.0 } else { 0.0 };
    }
    scores
}

fn resolve_chunk(indices: &Indices, chunk_id: &ChunkId) -> Option<(ChunkMetadata, String)> {
    let meta = indices.vectors.metadata_for(chunk_id)?;
    let text = indices
        .registry
        .get_chunk(chunk_id.as_str())
        .map(|c| c.text.clone())
        .unwrap_or_default();
    Some((meta.clone(), text))
}

fn to_scored(indices: &Indices, chunk_id: ChunkId, score: f32, vector_score: Option<f32>, graph_score: Option<f32>) -> Option<ScoredChunk> {
    let (metadata, text) = resolve_chunk(indices, &chunk_id)?;
    Some(ScoredChunk {
        chunk_id,
        doc_id: metadata.doc_id.clone(),
        score,
        vector_score,
        graph_score,
        rerank_score: None,
        metadata,
        text,
    })
}

/// Vector-only, graph-only, or α-fused retrieval over the reconciled
/// indices. `query_embedding` is `None` when no embedder is configured (the
/// graph-only and a degraded hybrid-as-graph-only path still work); a vector
/// or hybrid request with no embedding yields no vector-side candidates.
pub fn retrieve(indices: &Indices, query_text: &str, query_embedding: Option<&[f32]>, opts: &RetrievalOptions) -> Vec<ScoredChunk> {
    let filter = ChunkFilter { doc_types: opts.doc_type_filter.clone(), ..Default::default() };
    let fetch_n = opts.rerank_top_k.max(opts.top_k).max(1);

    let vector_raw: HashMap<ChunkId, f32> = match query_embedding {
        Some(q) if !indices.vectors.is_empty() => indices
            .vectors
            .search(q, fetch_n, &filter)
            .into_iter()
            .map(|h| (h.chunk_id, h.score))
            .collect(),
        _ => HashMap::new(),
    };

    let graph_raw: HashMap<ChunkId, f32> = if matches!(opts.mode, RetrievalMode::Vector) {
        HashMap::new()
    } else {
        index_store::graph_retriever::retrieve(&indices.graph, query_text, opts.hops, GRAPH_NODE_CAP)
            .into_iter()
            .filter(|hit| indices.vectors.metadata_for(&hit.chunk_id).map(|m| filter.matches(m)).unwrap_or(false))
            .map(|hit| (hit.chunk_id, hit.score))
            .collect()
    };

    let vector_norm = normalize(vector_raw);
    let graph_norm = normalize(graph_raw);

    let fused: HashMap<ChunkId, (f32, Option<f32>, Option<f32>)> = match opts.mode {
        RetrievalMode::Vector => vector_norm.into_iter().map(|(id, s)| (id, (s, Some(s), None))).collect(),
        RetrievalMode::Graph => graph_norm.into_iter().map(|(id, s)| (id, (s, None, Some(s)))).collect(),
        RetrievalMode::Hybrid => {
            let mut out: HashMap<ChunkId, (f32, Option<f32>, Option<f32>)> = HashMap::new();
            for (id, v) in &vector_norm {
                out.insert(id.clone(), (opts.alpha * v, Some(*v), None));
            }
            for (id, g) in &graph_norm {
                out.entry(id.clone())
                    .and_modify(|(score, _, gscore)| {
                        *score += (1.0 - opts.alpha) * g;
                        *gscore = Some(*g);
                    })
                    .or_insert(((1.0 - opts.alpha) * g, None, Some(*g)));
            }
            out
        }
    };

    let mut hits: Vec<ScoredChunk> = fused
        .into_iter()
        .filter_map(|(id, (score, v, g))| to_scored(indices, id, score, v, g))
        .collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(opts.rerank_top_k.max(opts.top_k));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use index_store::registry;
    use rag_model::{Chunk, DocId, DocType, RetrievalMode, SemanticBoundary};

    fn build(dir: &std::path::Path) -> Indices {
        let mut indices = Indices::open(dir).unwrap();
        let doc_id = DocId("d1".into());
        let chunks = vec![
            Chunk::new(doc_id.clone(), 0, "第一条 适用范围。".into(), vec![1], vec![], SemanticBoundary::Article),
            Chunk::new(doc_id.clone(), 1, "第二条 监督管理。".into(), vec![1], vec![], SemanticBoundary::Article),
        ];
        let doc = registry::new_document(doc_id.clone(), "regs.txt".into(), DocType::InternalRegulation, None, "h1".into(), 10, 2);
        indices.registry.commit_new(doc, &chunks);
        let metas: Vec<_> = chunks.iter().map(|c| ChunkMetadata::from_chunk(c, indices.registry.get(&doc_id).unwrap())).collect();
        indices.vectors.add(vec![vec![1.0, 0.0], vec![0.0, 1.0]], metas).unwrap();
        index_store::graph_store::extract_and_merge(&mut indices.graph, &doc_id, "regs.txt", &chunks);
        indices
    }

    #[test]
    fn vector_mode_ranks_by_cosine_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let indices = build(dir.path());
        let opts = RetrievalOptions { mode: RetrievalMode::Vector, top_k: 2, rerank_top_k: 2, ..Default::default() };
        let hits = retrieve(&indices, "第一条", Some(&[1.0, 0.0]), &opts);
        assert_eq!(hits[0].chunk_id, ChunkId("d1:0".into()));
    }

    #[test]
    fn alpha_one_matches_pure_vector_order_and_scores() {
        let dir = tempfile::tempdir().unwrap();
        let indices = build(dir.path());
        let vector_opts = RetrievalOptions { mode: RetrievalMode::Vector, top_k: 2, rerank_top_k: 2, ..Default::default() };
        let hybrid_opts = RetrievalOptions { mode: RetrievalMode::Hybrid, alpha: 1.0, top_k: 2, rerank_top_k: 2, hops: 2, ..Default::default() };
        let vector_hits = retrieve(&indices, "第一条", Some(&[1.0, 0.0]), &vector_opts);
        let hybrid_hits = retrieve(&indices, "第一条", Some(&[1.0, 0.0]), &hybrid_opts);
        assert_eq!(vector_hits.len(), hybrid_hits.len());
        for (v, h) in vector_hits.iter().zip(hybrid_hits.iter()) {
            assert_eq!(v.chunk_id, h.chunk_id);
            assert!((v.score - h.score).abs() < 1e-6);
        }
    }

    #[test]
    fn alpha_zero_matches_pure_graph_order_and_scores() {
        let dir = tempfile::tempdir().unwrap();
        let indices = build(dir.path());
        let graph_opts = RetrievalOptions { mode: RetrievalMode::Graph, top_k: 2, rerank_top_k: 2, hops: 2, ..Default::default() };
        let hybrid_opts = RetrievalOptions { mode: RetrievalMode::Hybrid, alpha: 0.0, top_k: 2, rerank_top_k: 2, hops: 2, ..Default::default() };
        let graph_hits = retrieve(&indices, "第一条", None, &graph_opts);
        let hybrid_hits = retrieve(&indices, "第一条", None, &hybrid_opts);
        assert_eq!(graph_hits.len(), hybrid_hits.len());
        for (g, h) in graph_hits.iter().zip(hybrid_hits.iter()) {
            assert_eq!(g.chunk_id, h.chunk_id);
            assert!((g.score - h.score).abs() < 1e-6);
        }
    }

    #[test]
    fn doc_type_filter_excludes_non_matching_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let indices = build(dir.path());
        let opts = RetrievalOptions { mode: RetrievalMode::Vector, top_k: 2, rerank_top_k: 2, doc_type_filter: Some(vec![DocType::AuditIssue]), ..Default::default() };
        let hits = retrieve(&indices, "第一条", Some(&[1.0, 0.0]), &opts);
        assert!(hits.is_empty());
    }
}
