//! §4.F Graph Store / Builder: a typed multigraph over `GraphNode`/`GraphEdge`
//! extracted from committed chunks. Teacher has no graph component, so this
//! module is grounded on the pipeline shape in
//! `other_examples/36557a19_raghav-rama-knowledge-graph` (extract → merge →
//! persist) rather than on `chunking-store`; `petgraph` backs the in-memory
//! multigraph and `bincode` is the `graph.bin` wire format per §6.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rag_model::{Chunk, DocId, Evidence, GraphEdge, GraphNode, GraphNodeType, NodeId, EDGE_WEIGHT_MAX};

use crate::error::StoreError;

/// Stable hash of `(type, canonical_name)` (§3 Graph Node identity).
pub fn node_id(node_type: GraphNodeType, canonical_name: &str) -> NodeId {
    let digest = blake3_short(&format!("{}:{}", node_type.as_str(), canonical_name));
    NodeId(digest)
}

fn blake3_short(s: &str) -> String {
    // index-store has no direct blake3 dependency; a cheap FNV-1a is enough
    // for an in-process node handle, unlike doc-chunker's content-addressed
    // doc_id which must be stable across tooling.
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in s.as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}")
}

pub struct GraphStore {
    graph: DiGraph<GraphNode, GraphEdge>,
    index_by_node_id: BTreeMap<NodeId, NodeIndex>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self { graph: DiGraph::new(), index_by_node_id: BTreeMap::new() }
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_weights()
    }

    pub fn node(&self, id: &NodeId) -> Option<&GraphNode> {
        self.index_by_node_id.get(id).and_then(|&i| self.graph.node_weight(i))
    }

    pub fn neighbors(&self, id: &NodeId) -> Vec<(&GraphEdge, &GraphNode)> {
        let Some(&idx) = self.index_by_node_id.get(id) else { return Vec::new() };
        self.graph
            .edges(idx)
            .filter_map(|e| self.graph.node_weight(e.target()).map(|n| (e.weight(), n)))
            .collect()
    }

    /// Inserts or merges a node; coalesces on `(type, canonical_name)` per
    /// §4.F's merge rule, unioning evidence.
    pub fn upsert_node(&mut self, node_type: GraphNodeType, canonical_name: &str, display_name: &str, attrs: BTreeMap<String, String>, evidence: Evidence) -> NodeId {
        let id = node_id(node_type, canonical_name);
        if let Some(&idx) = self.index_by_node_id.get(&id) {
            let existing = &mut self.graph[idx];
            existing.evidence.push(evidence);
            for (k, v) in attrs { existing.attrs.insert(k, v); }
        } else {
            let node = GraphNode { node_id: id.clone(), node_type, display_name: display_name.to_string(), attrs, evidence: vec![evidence] };
            let idx = self.graph.add_node(node);
            self.index_by_node_id.insert(id.clone(), idx);
        }
        id
    }

    /// Merges `(source, target, relation)` by capped-sum weight, per §4.F.
    pub fn upsert_edge(&mut self, source: &NodeId, target: &NodeId, relation: &str, weight: f32, evidence: Evidence) {
        let (Some(&s), Some(&t)) = (self.index_by_node_id.get(source), self.index_by_node_id.get(target)) else { return };
        if let Some(edge_idx) = self.graph.find_edge(s, t) {
            let existing = &mut self.graph[edge_idx];
            if existing.relation == relation {
                existing.weight = (existing.weight + weight).min(EDGE_WEIGHT_MAX);
                existing.evidence.push(evidence);
                return;
            }
        }
        self.graph.add_edge(s, t, GraphEdge { source: source.clone(), target: target.clone(), relation: relation.to_string(), weight: weight.min(EDGE_WEIGHT_MAX), evidence: vec![evidence] });
    }

    /// Drops every node (and incident edges) whose evidence list no longer
    /// references a live chunk, per the §8 invariant "nodes whose evidence
    /// lists become empty are removed".
    pub fn prune_evidence_for_doc(&mut self, doc_id: &DocId) {
        self.prune_nodes(|e| &e.doc_id != doc_id);
    }

    /// Recovery pass (§7 "on crash mid-commit, recovery at startup: scan
    /// registry vs indices; drop any chunk set whose owning document row is
    /// not marked committed"): strips evidence for any doc_id not in
    /// `live_doc_ids`, then drops nodes left with no evidence. Used at
    /// load-time reconciliation alongside `VectorStore::retain_live`.
    pub fn retain_live(&mut self, live_doc_ids: &std::collections::HashSet<DocId>) -> usize {
        self.prune_nodes(|e| live_doc_ids.contains(&e.doc_id))
    }

    /// Shared node-pruning pass: keeps evidence entries `keep` accepts,
    /// drops non-structural nodes left with empty evidence. Returns the
    /// number of nodes dropped.
    fn prune_nodes(&mut self, mut keep: impl FnMut(&Evidence) -> bool) -> usize {
        let indices: Vec<NodeIndex> = self.graph.node_indices().collect();
        let mut doomed = Vec::new();
        for idx in indices {
            let node = &mut self.graph[idx];
            if node.node_type.is_structural() {
                continue;
            }
            node.evidence.retain(|e| keep(e));
            if node.evidence.is_empty() {
                doomed.push(idx);
            }
        }
        // `remove_node` swaps the highest-index node into the removed slot;
        // removing highest-first keeps every other queued index stable.
        doomed.sort_unstable_by(|a, b| b.index().cmp(&a.index()));
        let dropped = doomed.len();
        for idx in doomed {
            if let Some(w) = self.graph.node_weight(idx) {
                self.index_by_node_id.remove(&w.node_id.clone());
            }
            self.graph.remove_node(idx);
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.graph.clear();
        self.index_by_node_id.clear();
    }

    pub fn save(&self, dir: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(dir).map_err(|e| StoreError::Io { path: dir.display().to_string(), source: e })?;
        let path = dir.join("graph.bin");
        let tmp: PathBuf = path.with_extension("bin.tmp");
        let nodes: Vec<GraphNode> = self.graph.node_weights().cloned().collect();
        let edges: Vec<GraphEdge> = self.graph.edge_weights().cloned().collect();
        let bytes = bincode::serialize(&(nodes, edges)).map_err(|e| StoreError::Serialization(e.to_string()))?;
        fs::write(&tmp, &bytes).map_err(|e| StoreError::Io { path: tmp.display().to_string(), source: e })?;
        fs::rename(&tmp, &path).map_err(|e| StoreError::Io { path: path.display().to_string(), source: e })?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let path = dir.join("graph.bin");
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(&path).map_err(|e| StoreError::Io { path: path.display().to_string(), source: e })?;
        let (nodes, edges): (Vec<GraphNode>, Vec<GraphEdge>) = bincode::deserialize(&bytes).map_err(|e| StoreError::Corrupt { path: path.display().to_string(), reason: e.to_string() })?;
        let mut store = GraphStore::default();
        for node in nodes {
            let idx = store.graph.add_node(node.clone());
            store.index_by_node_id.insert(node.node_id, idx);
        }
        for edge in edges {
            if let (Some(&s), Some(&t)) = (store.index_by_node_id.get(&edge.source), store.index_by_node_id.get(&edge.target)) {
                store.graph.add_edge(s, t, edge);
            }
        }
        Ok(store)
    }
}

/// `rebuild(registry)`'s extractor palette (§4.F, rule-based MVP). Runs over
/// one document's committed chunks; the caller re-invokes per document to
/// rebuild the whole graph.
pub fn extract_and_merge(store: &mut GraphStore, doc_id: &DocId, filename: &str, chunks: &[Chunk]) {
    let doc_node = node_id(GraphNodeType::Document, &doc_id.0);
    let doc_evidence = |chunk_id: &rag_model::ChunkId| Evidence { doc_id: doc_id.clone(), chunk_id: chunk_id.clone(), extractor_name: "document".into(), confidence: 1.0 };
    if store.node(&doc_node).is_none() {
        let idx = store.graph.add_node(GraphNode { node_id: doc_node.clone(), node_type: GraphNodeType::Document, display_name: filename.to_string(), attrs: BTreeMap::new(), evidence: Vec::new() });
        store.index_by_node_id.insert(doc_node.clone(), idx);
    }

    for chunk in chunks {
        extract_clause(store, doc_id, &doc_node, chunk);
        let issue_node = extract_rectification(store, doc_id, chunk);
        extract_topic(store, doc_id, chunk);
        extract_year(store, doc_id, chunk, issue_node.as_ref());
        extract_department(store, doc_id, chunk, issue_node.as_ref());
        let _ = doc_evidence;
    }
}

fn clause_re() -> &'static regex::Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"第[一二三四五六七八九十百千0-9]+[章节条]").unwrap())
}

fn extract_clause(store: &mut GraphStore, doc_id: &DocId, doc_node: &NodeId, chunk: &Chunk) {
    let Some(m) = clause_re().find(&chunk.text) else { return };
    let label = m.as_str().to_string();
    let canonical = format!("{}:{}", doc_id.0, label);
    let evidence = Evidence { doc_id: doc_id.clone(), chunk_id: chunk.chunk_id.clone(), extractor_name: "clause".into(), confidence: 0.9 };
    let node = store.upsert_node(GraphNodeType::Clause, &canonical, &label, BTreeMap::new(), evidence.clone());
    store.upsert_edge(&node, doc_node, "belongs_to", 1.0, evidence);
}

const RECTIFICATION_STATUSES: &[&str] = &["已整改", "整改中", "未整改"];

/// Issue + rectification-status extractor. Table rows from audit-issue mode
/// and free-text issue paragraphs both surface a status keyword; returns the
/// `Issue` node id so the year/department extractors can attach to it.
fn extract_rectification(store: &mut GraphStore, doc_id: &DocId, chunk: &Chunk) -> Option<NodeId> {
    let status = RECTIFICATION_STATUSES.iter().find(|s| chunk.text.contains(**s))?;
    let issue_canonical = format!("{}:{}", doc_id.0, chunk.chunk_id.0);
    let issue_evidence = Evidence { doc_id: doc_id.clone(), chunk_id: chunk.chunk_id.clone(), extractor_name: "issue".into(), confidence: 0.7 };
    let issue_node = store.upsert_node(GraphNodeType::Issue, &issue_canonical, &chunk.header, BTreeMap::new(), issue_evidence.clone());

    let status_evidence = Evidence { doc_id: doc_id.clone(), chunk_id: chunk.chunk_id.clone(), extractor_name: "rectification".into(), confidence: 0.8 };
    let status_node = store.upsert_node(GraphNodeType::RectificationStatus, status, status, BTreeMap::new(), status_evidence.clone());
    store.upsert_edge(&issue_node, &status_node, "has_status", 1.0, status_evidence);

    if let Some(action) = rectification_action_re().find(&chunk.text) {
        let action_text = action.as_str().trim();
        if !action_text.is_empty() {
            let action_canonical = format!("{}:{}", doc_id.0, action_text);
            let action_evidence = Evidence { doc_id: doc_id.clone(), chunk_id: chunk.chunk_id.clone(), extractor_name: "rectification_action".into(), confidence: 0.6 };
            let action_node = store.upsert_node(GraphNodeType::RectificationAction, &action_canonical, action_text, BTreeMap::new(), action_evidence.clone());
            store.upsert_edge(&issue_node, &action_node, "has_action", 1.0, action_evidence);
        }
    }

    Some(issue_node)
}

fn rectification_action_re() -> &'static regex::Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?:已整改|整改中|未整改)[：:]?\s*([^。\n]{2,60})").unwrap())
}

fn extract_topic(store: &mut GraphStore, doc_id: &DocId, chunk: &Chunk) {
    if chunk.section_path.is_empty() {
        return;
    }
    let topic = chunk.section_path.last().unwrap();
    let evidence = Evidence { doc_id: doc_id.clone(), chunk_id: chunk.chunk_id.clone(), extractor_name: "topic".into(), confidence: 0.5 };
    store.upsert_node(GraphNodeType::Topic, topic, topic, BTreeMap::new(), evidence);
}

fn year_re() -> &'static regex::Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(19|20)\d{2}年").unwrap())
}

/// Links an issue to the year it mentions, when one is present (§4.F's
/// `Year` node). A bare regex match, not a date parser: audit text mostly
/// uses this form for the fiscal year an issue belongs to.
fn extract_year(store: &mut GraphStore, doc_id: &DocId, chunk: &Chunk, issue_node: Option<&NodeId>) {
    let Some(m) = year_re().find(&chunk.text) else { return };
    let label = m.as_str();
    let evidence = Evidence { doc_id: doc_id.clone(), chunk_id: chunk.chunk_id.clone(), extractor_name: "year".into(), confidence: 0.6 };
    let year_node = store.upsert_node(GraphNodeType::Year, label, label, BTreeMap::new(), evidence.clone());
    if let Some(issue) = issue_node {
        store.upsert_edge(issue, &year_node, "occurred_in", 1.0, evidence);
    }
}

/// Fixed dictionary of organisational units; audit reports reuse a small,
/// stable set of department names, so co-occurrence in an issue chunk is
/// enough signal without a learned NER model.
const DEPARTMENTS: &[&str] = &["财务部", "审计部", "采购部", "人力资源部", "信息技术部", "内控部", "运营部", "风险管理部"];

fn extract_department(store: &mut GraphStore, doc_id: &DocId, chunk: &Chunk, issue_node: Option<&NodeId>) {
    for dept in DEPARTMENTS {
        if !chunk.text.contains(dept) {
            continue;
        }
        let evidence = Evidence { doc_id: doc_id.clone(), chunk_id: chunk.chunk_id.clone(), extractor_name: "department".into(), confidence: 0.6 };
        let dept_node = store.upsert_node(GraphNodeType::Department, dept, dept, BTreeMap::new(), evidence.clone());
        if let Some(issue) = issue_node {
            store.upsert_edge(issue, &dept_node, "involves", 1.0, evidence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_model::{ChunkId, SemanticBoundary};

    fn chunk(text: &str, header: &str) -> Chunk {
        let mut c = Chunk::new(DocId("d1".into()), 0, text.to_string(), vec![1], vec![], SemanticBoundary::Article);
        c.header = header.to_string();
        c.chunk_id = ChunkId("d1:0".into());
        c
    }

    #[test]
    fn clause_extractor_links_clause_to_document() {
        let mut store = GraphStore::new();
        let doc_id = DocId("d1".to_string());
        extract_and_merge(&mut store, &doc_id, "regs.txt", &[chunk("第一条 适用范围。", "第一条 适用范围。")]);
        assert!(store.nodes().any(|n| n.node_type == GraphNodeType::Clause));
        assert!(store.nodes().any(|n| n.node_type == GraphNodeType::Document));
        assert_eq!(store.edge_count(), 1);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let mut a = GraphStore::new();
        let doc_id = DocId("d1".to_string());
        let chunks = [chunk("未整改：采购审批缺失。", "问题1")];
        extract_and_merge(&mut a, &doc_id, "issues.xlsx", &chunks);

        let mut b = GraphStore::new();
        extract_and_merge(&mut b, &doc_id, "issues.xlsx", &chunks);

        assert_eq!(a.node_count(), b.node_count());
        assert_eq!(a.edge_count(), b.edge_count());
    }

    #[test]
    fn rectification_chunk_links_issue_to_department_and_year() {
        let mut store = GraphStore::new();
        let doc_id = DocId("d1".to_string());
        let chunks = [chunk("2023年采购部未整改：缺少验收单据。", "问题1")];
        extract_and_merge(&mut store, &doc_id, "issues.xlsx", &chunks);
        assert!(store.nodes().any(|n| n.node_type == GraphNodeType::Department && n.display_name == "采购部"));
        assert!(store.nodes().any(|n| n.node_type == GraphNodeType::Year && n.display_name == "2023年"));
        assert!(store.nodes().any(|n| n.node_type == GraphNodeType::RectificationAction));
    }

    #[test]
    fn pruning_removes_nodes_whose_evidence_becomes_empty() {
        let mut store = GraphStore::new();
        let doc_id = DocId("d1".to_string());
        extract_and_merge(&mut store, &doc_id, "regs.txt", &[chunk("第一条 适用范围。", "第一条 适用范围。")]);
        let non_structural_before = store.nodes().filter(|n| !n.node_type.is_structural()).count();
        assert!(non_structural_before > 0);
        store.prune_evidence_for_doc(&doc_id);
        let non_structural_after = store.nodes().filter(|n| !n.node_type.is_structural()).count();
        assert_eq!(non_structural_after, 0);
    }

    #[test]
    fn retain_live_drops_evidence_for_docs_missing_from_the_live_set() {
        let mut store = GraphStore::new();
        let doc_id = DocId("d1".to_string());
        extract_and_merge(&mut store, &doc_id, "regs.txt", &[chunk("第一条 适用范围。", "第一条 适用范围。")]);

        let dropped = store.retain_live(&std::collections::HashSet::new());
        assert!(dropped > 0);
        assert_eq!(store.nodes().filter(|n| !n.node_type.is_structural()).count(), 0);
    }

    #[test]
    fn retain_live_keeps_evidence_for_docs_in_the_live_set() {
        let mut store = GraphStore::new();
        let doc_id = DocId("d1".to_string());
        extract_and_merge(&mut store, &doc_id, "regs.txt", &[chunk("第一条 适用范围。", "第一条 适用范围。")]);

        let live: std::collections::HashSet<DocId> = [doc_id.clone()].into_iter().collect();
        let dropped = store.retain_live(&live);
        assert_eq!(dropped, 0);
        assert!(store.nodes().any(|n| n.node_type == GraphNodeType::Clause));
    }
}
