//! §4.G Graph Retriever: seed match → bounded-hop BFS → decayed, weighted
//! chunk scoring. Supplemented (no teacher analogue); grounded on the same
//! extract/traverse shape as `graph_store`'s pipeline source, using
//! `petgraph`'s BFS utilities over the in-memory multigraph.

use std::collections::{HashMap, HashSet, VecDeque};

use rag_model::{ChunkId, NodeId};

use crate::graph_store::GraphStore;

pub const K_SEED: usize = 5;
const HOP_DECAY: f32 = 0.6;

#[derive(Debug, Clone, PartialEq)]
pub struct GraphHit {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub reached_via_path: Vec<NodeId>,
}

fn tokenize(s: &str) -> HashSet<String> {
    s.chars()
        .collect::<String>()
        .split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn seed_score(query_tokens: &HashSet<String>, display_name: &str) -> f32 {
    if display_name.is_empty() {
        return 0.0;
    }
    if query_tokens.iter().any(|t| display_name.to_lowercase().contains(t.as_str())) {
        return 1.0;
    }
    let name_tokens = tokenize(display_name);
    let overlap = query_tokens.intersection(&name_tokens).count();
    if overlap == 0 {
        0.0
    } else {
        overlap as f32 / query_tokens.len().max(1) as f32
    }
}

/// Bounded-hop expansion from token/substring-matched seeds, producing
/// `(chunk_id, graph_score, path)` sorted by score descending (§4.G).
pub fn retrieve(store: &GraphStore, query: &str, hops: u8, node_cap: usize) -> Vec<GraphHit> {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return Vec::new();
    }

    let mut seeds: Vec<(NodeId, f32)> = store
        .nodes()
        .filter(|n| !n.node_type.is_structural())
        .filter_map(|n| {
            let s = seed_score(&query_tokens, &n.display_name);
            if s > 0.0 { Some((n.node_id.clone(), s)) } else { None }
        })
        .collect();
    seeds.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    seeds.truncate(K_SEED);
    if seeds.is_empty() {
        return Vec::new();
    }

    let mut chunk_scores: HashMap<ChunkId, f32> = HashMap::new();
    let mut chunk_paths: HashMap<ChunkId, Vec<NodeId>> = HashMap::new();
    let mut visited: HashSet<NodeId> = HashSet::new();

    for (seed_id, seed_score) in &seeds {
        if visited.len() >= node_cap {
            break;
        }
        let mut queue: VecDeque<(NodeId, u8, f32, Vec<NodeId>)> = VecDeque::new();
        queue.push_back((seed_id.clone(), 0, *seed_score, vec![seed_id.clone()]));

        while let Some((node_id, hop, acc_score, path)) = queue.pop_front() {
            if visited.len() >= node_cap {
                break;
            }
            if !visited.insert(node_id.clone()) {
                continue;
            }
            if let Some(node) = store.node(&node_id) {
                for ev in &node.evidence {
                    let entry = chunk_scores.entry(ev.chunk_id.clone()).or_insert(0.0);
                    *entry += acc_score * HOP_DECAY.powi(hop as i32);
                    chunk_paths.entry(ev.chunk_id.clone()).or_insert_with(|| path.clone());
                }
            }
            if hop >= hops {
                continue;
            }
            let mut neighbors = store.neighbors(&node_id);
            neighbors.sort_by(|a, b| b.0.weight.partial_cmp(&a.0.weight).unwrap_or(std::cmp::Ordering::Equal));
            for (edge, neighbor) in neighbors {
                if visited.contains(&neighbor.node_id) {
                    continue;
                }
                let mut next_path = path.clone();
                next_path.push(neighbor.node_id.clone());
                queue.push_back((neighbor.node_id.clone(), hop + 1, acc_score * edge.weight.max(0.01), next_path));
            }
        }
    }

    let max_score = chunk_scores.values().cloned().fold(0.0f32, f32::max);
    let mut hits: Vec<GraphHit> = chunk_scores
        .into_iter()
        .map(|(chunk_id, score)| {
            let normalized = if max_score > 0.0 { score / max_score } else { 0.0 };
            let path = chunk_paths.remove(&chunk_id).unwrap_or_default();
            GraphHit { chunk_id, score: normalized, reached_via_path: path }
        })
        .collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::extract_and_merge;
    use rag_model::{Chunk, ChunkId as CId, DocId, SemanticBoundary};

    fn chunk(text: &str) -> Chunk {
        let mut c = Chunk::new(DocId("d1".into()), 0, text.to_string(), vec![1], vec![], SemanticBoundary::Article);
        c.chunk_id = CId("d1:0".into());
        c
    }

    #[test]
    fn retrieve_finds_chunk_via_clause_node_seed() {
        let mut store = GraphStore::new();
        extract_and_merge(&mut store, &DocId("d1".into()), "regs.txt", &[chunk("第一条 适用范围。")]);
        let hits = retrieve(&store, "第一条", 2, 50);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk_id, CId("d1:0".into()));
    }

    #[test]
    fn empty_query_yields_no_hits() {
        let store = GraphStore::new();
        assert!(retrieve(&store, "", 2, 50).is_empty());
    }
}
