//! §4.M Orchestrator. Grounded directly on `HybridService` as the thing that
//! owns config, opens the repo, and exposes
//! `ingest_file`/`ingest_chunks`/`search_hybrid`/`delete_by_filter` —
//! generalized into `ingest`/`ask`/`search_with_intent`/`rebuild_graph`/
//! `start`/`stop` with per-file outcome aggregation and staged progress
//! events layered on top.
//!
//! Concurrency (§5): every trait in `providers` is a blocking call, not an
//! async one, so the single-writer lane is a plain `std::sync::Mutex`
//! (exactly the teacher's `Mutex<Session>` around its ONNX session) rather
//! than a `tokio` primitive — introducing an async runtime here would only
//! wrap synchronous calls in `spawn_blocking` for no benefit. Ingest
//! concurrency is a bounded `std::thread::scope` worker batch; cancellation
//! is a plain `Arc<AtomicBool>` handle polled at stage boundaries, the same
//! shape `providers::llm::LlmProvider::generate`'s `should_cancel` already
//! expects.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use doc_chunker::hashing;
use index_store::{graph_store, registry, Indices};
use providers::embedder::embed_all_capped;
use providers::rerank::RerankCandidate;
use providers::retry::RetryPolicy;
use providers::{Embedder, LlmProvider, RerankProvider};
use rag_model::{
    ChunkMetadata, ChunkerOptions, DocType, ErrorKind, FileOutcome, IngestOutcome, IngestReport, RagError, Role, ScoredChunk, SessionId,
};

use crate::config::RuntimeConfig;
use crate::events::{AskEvent, AskStage};
use crate::session_memory::SessionMemory;
use crate::{answerer, hybrid_retriever, intent};

/// Cooperative cancellation handle, checked at ask-pipeline stage boundaries
/// and inside the LLM token-forwarding loop (§5).
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        CancelHandle::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Orchestrator {
    config: RuntimeConfig,
    embedder: Box<dyn Embedder>,
    reranker: Box<dyn RerankProvider>,
    llm: Box<dyn LlmProvider>,
    sessions: SessionMemory,
    indices: Mutex<Option<Indices>>,
}

impl Orchestrator {
    pub fn new(config: RuntimeConfig, embedder: Box<dyn Embedder>, reranker: Box<dyn RerankProvider>, llm: Box<dyn LlmProvider>) -> Self {
        let sessions = SessionMemory::new(config.session_max_turns, config.session_max_age);
        Orchestrator { config, embedder, reranker, llm, sessions, indices: Mutex::new(None) }
    }

    /// Opens (or reconciles) the data root; rebuilds the graph once if no
    /// `graph.bin` is on disk (§6 "a missing graph file triggers an
    /// automatic rebuild").
    #[tracing::instrument(skip(self))]
    pub fn start(&self) -> Result<(), RagError> {
        let needs_rebuild = !self.config.data_root.join("graph.bin").exists();
        let opened = Indices::open(&self.config.data_root)?;
        *self.indices.lock().unwrap() = Some(opened);
        if needs_rebuild {
            self.rebuild_graph()?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn stop(&self) -> Result<(), RagError> {
        let mut guard = self.indices.lock().unwrap();
        if let Some(indices) = guard.as_ref() {
            indices.save()?;
        }
        *guard = None;
        Ok(())
    }

    fn with_indices<R>(&self, f: impl FnOnce(&mut Indices) -> Result<R, RagError>) -> Result<R, RagError> {
        let mut guard = self.indices.lock().unwrap();
        let indices = guard.as_mut().ok_or_else(|| RagError::new(ErrorKind::BadRequest, "orchestrator not started"))?;
        f(indices)
    }

    fn read_indices<R>(&self, f: impl FnOnce(&Indices) -> R) -> Result<R, RagError> {
        let guard = self.indices.lock().unwrap();
        let indices = guard.as_ref().ok_or_else(|| RagError::new(ErrorKind::BadRequest, "orchestrator not started"))?;
        Ok(f(indices))
    }

    /// Per-file parse→chunk→dedup→embed→commit units, run sequentially in
    /// batches of `config.ingest_concurrency`; each file's outcome is
    /// reported independently so one failure never fails the whole batch.
    /// Results land in `report.per_file` in submission order.
    #[tracing::instrument(skip(self, files), fields(file_count = files.len()))]
    pub fn ingest(&self, files: &[PathBuf], chunker: ChunkerOptions, doc_type: DocType, save_after: bool) -> Result<IngestReport, RagError> {
        let mut report = IngestReport::default();
        let cap = self.config.ingest_concurrency.max(1);
        for batch in files.chunks(cap) {
            let outcomes: Vec<FileOutcome> = std::thread::scope(|scope| {
                let handles: Vec<_> = batch.iter().map(|path| scope.spawn(move || self.ingest_one(path, chunker, doc_type))).collect();
                handles
                    .into_iter()
                    .map(|h| {
                        h.join().unwrap_or_else(|_| FileOutcome {
                            filename: "<unknown>".to_string(),
                            outcome: IngestOutcome::Failed,
                            doc_id: None,
                            chunk_count: 0,
                            error: Some("ingest worker panicked".to_string()),
                        })
                    })
                    .collect()
            });
            for outcome in outcomes {
                report.record(outcome);
            }
        }
        if save_after {
            self.with_indices(|indices| indices.save().map_err(RagError::from))?;
        }
        tracing::info!(processed = report.processed, updated = report.updated, skipped = report.skipped, failed = report.failed, "ingest batch complete");
        Ok(report)
    }

    #[tracing::instrument(skip(self, chunker))]
    fn ingest_one(&self, path: &Path, chunker: ChunkerOptions, doc_type: DocType) -> FileOutcome {
        let filename = path.file_name().and_then(|f| f.to_str()).unwrap_or("unknown").to_string();
        let failed = |error: String| FileOutcome { filename: filename.clone(), outcome: IngestOutcome::Failed, doc_id: None, chunk_count: 0, error: Some(error) };

        let blocks = match doc_chunker::parse_file(&path.to_string_lossy()) {
            Ok(b) => b,
            Err(e) => return failed(e.to_string()),
        };
        let joined = doc_chunker::join_block_text(&blocks);
        let content_hash = hashing::content_hash(&joined);
        let doc_id = hashing::doc_id_for(&joined);
        let chunks = match doc_chunker::chunk_blocks(&blocks, &doc_id, &chunker) {
            Ok(c) => c,
            Err(e) => return failed(e.to_string()),
        };
        let file_size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = match embed_all_capped(self.embedder.as_ref(), &texts, RetryPolicy::default()) {
            Ok(v) => v,
            Err(e) => return failed(e.to_string()),
        };

        // §4.E's commit is "registry row not updated, partial index writes
        // reversed" on any step failing. Rather than an undo log, the write
        // order defers every *infallible* mutation (registry commit, old
        // vector/graph removal) until after the one *fallible* step
        // (`vectors.add`) has already succeeded — so a failure here leaves
        // the old document's registry row, vectors, and graph evidence
        // completely untouched, and nothing after this point can fail.
        let result = self.with_indices(|indices| {
            let decision = indices.registry.ingest_decision(&content_hash, &filename);
            match decision {
                index_store::IngestDecision::Duplicate { existing_doc_id } => {
                    Ok(FileOutcome { filename: filename.clone(), outcome: IngestOutcome::Skipped, doc_id: Some(existing_doc_id), chunk_count: 0, error: None })
                }
                index_store::IngestDecision::New | index_store::IngestDecision::Update { .. } => {
                    let is_update = matches!(decision, index_store::IngestDecision::Update { .. });
                    let mut doc = registry::new_document(doc_id.clone(), filename.clone(), doc_type, None, content_hash.clone(), file_size_bytes, chunks.len() as u32);
                    if let index_store::IngestDecision::Update { new_version, .. } = &decision {
                        doc.version = *new_version;
                    }
                    let metas: Vec<ChunkMetadata> = chunks.iter().map(|c| ChunkMetadata::from_chunk(c, &doc)).collect();

                    indices.vectors.add(vectors.clone(), metas)?;

                    if let index_store::IngestDecision::Update { existing_doc_id, .. } = &decision {
                        indices.vectors.delete_by_doc(existing_doc_id);
                        indices.graph.prune_evidence_for_doc(existing_doc_id);
                        indices.registry.commit_update(existing_doc_id, doc, &chunks);
                    } else {
                        indices.registry.commit_new(doc, &chunks);
                    }
                    graph_store::extract_and_merge(&mut indices.graph, &doc_id, &filename, &chunks);

                    Ok(FileOutcome {
                        filename: filename.clone(),
                        outcome: if is_update { IngestOutcome::Updated } else { IngestOutcome::New },
                        doc_id: Some(doc_id.clone()),
                        chunk_count: chunks.len() as u32,
                        error: None,
                    })
                }
            }
        });

        result.unwrap_or_else(|e| {
            tracing::warn!(filename, error = %e, "ingest failed");
            failed(e.to_string())
        })
    }

    /// §4.M `search_with_intent`: routes intent, then retrieves under the
    /// routed options. No reranking and no session threading — this is the
    /// non-streaming list endpoint, not `ask`.
    #[tracing::instrument(skip(self))]
    pub fn search_with_intent(&self, query: &str) -> Result<Vec<ScoredChunk>, RagError> {
        let routed = intent::route(self.llm.as_ref(), query, self.config.default_retrieval.mode);
        let mut opts = self.config.default_retrieval.clone();
        opts.top_k = routed.top_k;
        opts.doc_type_filter = routed.doc_type_filter.clone();
        opts.mode = routed.retrieval_mode;

        let embedding = self.embedder.embed(query).ok();
        let hits = self.read_indices(|indices| hybrid_retriever::retrieve(indices, query, embedding.as_deref(), &opts))?;
        Ok(hits.into_iter().take(routed.top_k).collect())
    }

    /// §4.M `ask`: single logical task, sequential across intent →
    /// retrieval → generation, emitting exactly one running/done pair per
    /// stage. Checks `cancel` at every stage boundary and again inside the
    /// LLM token loop via `should_cancel`.
    #[tracing::instrument(skip(self, cancel, on_event))]
    pub fn ask(&self, query: &str, session_id: Option<SessionId>, cancel: &CancelHandle, mut on_event: impl FnMut(AskEvent)) -> Result<(), RagError> {
        let now = Utc::now();
        let session_id = match session_id {
            Some(id) => {
                self.sessions.ensure(&id, now);
                id
            }
            None => {
                let id = self.sessions.new_session(now);
                on_event(AskEvent::Session { session_id: id.clone() });
                id
            }
        };
        self.sessions.append(&session_id, Role::User, query.to_string(), now);

        if cancel.is_cancelled() {
            return Err(RagError::cancelled());
        }
        on_event(AskEvent::StageRunning { stage: AskStage::Intent });
        let routed = intent::route(self.llm.as_ref(), query, self.config.default_retrieval.mode);
        on_event(AskEvent::StageDone { stage: AskStage::Intent, hits: None });

        if cancel.is_cancelled() {
            return Err(RagError::cancelled());
        }
        on_event(AskEvent::StageRunning { stage: AskStage::Retrieval });
        let mut opts = self.config.default_retrieval.clone();
        opts.top_k = routed.top_k;
        opts.doc_type_filter = routed.doc_type_filter.clone();
        opts.mode = routed.retrieval_mode;
        let embedding = self.embedder.embed(query).ok();
        let fused = self.read_indices(|indices| hybrid_retriever::retrieve(indices, query, embedding.as_deref(), &opts))?;
        let ranked = self.apply_rerank(query, fused, &routed);
        on_event(AskEvent::StageDone { stage: AskStage::Retrieval, hits: Some(ranked.len()) });

        if cancel.is_cancelled() {
            return Err(RagError::cancelled());
        }
        on_event(AskEvent::StageRunning { stage: AskStage::Generation });
        let history = self.sessions.history(&session_id, 6, now);
        let prior_turns: Vec<String> = history.iter().map(|t| format!("{:?}: {}", t.role, t.content)).collect();
        let top_chunks: Vec<ScoredChunk> = ranked.into_iter().take(routed.top_k).collect();

        let cancel_for_llm = cancel.clone();
        let result = answerer::generate(self.llm.as_ref(), query, &top_chunks, &prior_turns, &(move || cancel_for_llm.is_cancelled()), |token| {
            on_event(AskEvent::DeltaContent(token.to_string()));
        });

        let answer = match result {
            Ok(a) => a,
            Err(e) => {
                let rag_err: RagError = e.into();
                on_event(AskEvent::Error { kind: rag_err.kind, message: rag_err.message.clone() });
                on_event(AskEvent::Done);
                return Err(rag_err);
            }
        };
        on_event(AskEvent::StageDone { stage: AskStage::Generation, hits: None });

        let now = Utc::now();
        self.sessions.append(&session_id, Role::Assistant, answer.text.clone(), now);
        on_event(AskEvent::Citations(answer.citations));
        on_event(AskEvent::Done);
        Ok(())
    }

    /// §4.I call site: truncates to the provider's vendor limits, falls back
    /// to the fused order (tagging nothing further downstream needs to know
    /// about `rerank_applied=false` beyond keeping `rerank_score` unset) on
    /// provider failure.
    fn apply_rerank(&self, query: &str, fused: Vec<ScoredChunk>, routed: &intent::RoutedIntent) -> Vec<ScoredChunk> {
        if !routed.use_rerank || fused.is_empty() {
            return fused;
        }
        let max_docs = self.reranker.max_documents().min(fused.len()).max(1);
        let max_chars = self.reranker.max_chars_per_doc();
        let (head, tail) = fused.split_at(max_docs.min(fused.len()));
        let candidates: Vec<RerankCandidate> = head.iter().enumerate().map(|(i, c)| RerankCandidate { index: i, text: c.text.chars().take(max_chars).collect() }).collect();

        match self.reranker.rerank(query, &candidates) {
            Ok(scores) => {
                let mut scored: Vec<ScoredChunk> = head.to_vec();
                for s in scores {
                    if let Some(c) = scored.get_mut(s.index) {
                        c.rerank_score = Some(s.score);
                    }
                }
                scored.sort_by(|a, b| b.rerank_score.unwrap_or(b.score).partial_cmp(&a.rerank_score.unwrap_or(a.score)).unwrap_or(std::cmp::Ordering::Equal));
                scored.extend(tail.to_vec());
                scored
            }
            Err(_) => fused,
        }
    }

    /// §5 "exclusive — takes the write lane of both the graph store and the
    /// registry for its duration". Re-extracts every active document's
    /// committed chunks from the registry (which is why the registry keeps
    /// full chunk bodies, not just ids) into a freshly cleared graph.
    #[tracing::instrument(skip(self))]
    pub fn rebuild_graph(&self) -> Result<(), RagError> {
        self.with_indices(|indices| {
            indices.graph.clear();
            let docs: Vec<_> = indices.registry.list(None, None, false).into_iter().cloned().collect();
            for doc in &docs {
                let chunks: Vec<_> = indices.registry.get_chunks(&doc.doc_id).into_iter().cloned().collect();
                graph_store::extract_and_merge(&mut indices.graph, &doc.doc_id, &doc.filename, &chunks);
            }
            indices.save().map_err(RagError::from)
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_document(&self, doc_id: &rag_model::DocId) -> Result<(), RagError> {
        self.with_indices(|indices| {
            indices.delete_document(doc_id)?;
            indices.save().map_err(RagError::from)
        })
    }

    pub fn stats(&self) -> Result<index_store::RegistryStats, RagError> {
        self.read_indices(|indices| indices.registry.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::embedder::{OnnxHttpConfig, OnnxHttpEmbedder, ProviderKind};
    use providers::llm::DeterministicLlm;
    use providers::rerank::DeterministicReranker;
    use rag_model::ChunkerMode;
    use std::io::Write;

    fn test_embedder() -> Box<dyn Embedder> {
        Box::new(
            OnnxHttpEmbedder::new(OnnxHttpConfig {
                endpoint: "offline://test".into(),
                auth_token: None,
                dimension: 8,
                max_input_length: 4096,
                embedding_model_id: "test-embed".into(),
                text_repr_version: "v1".into(),
            })
            .unwrap(),
        )
    }

    fn test_orchestrator(data_root: &Path) -> Orchestrator {
        let mut config = RuntimeConfig::default();
        config.data_root = data_root.to_path_buf();
        config.ingest_concurrency = 2;
        let orch = Orchestrator::new(config, test_embedder(), Box::new(DeterministicReranker::default()), Box::new(DeterministicLlm));
        orch.start().unwrap();
        orch
    }

    fn write_txt(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    fn regulation_chunker() -> ChunkerOptions {
        ChunkerOptions { mode: ChunkerMode::Regulation, size: 500, overlap: 50 }
    }

    #[test]
    fn provider_kind_is_http_for_the_test_double() {
        assert_eq!(test_embedder().info().provider, ProviderKind::OnnxHttp);
    }

    #[test]
    fn ingest_new_file_commits_chunks_and_reports_processed() {
        let data = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let orch = test_orchestrator(data.path());
        let path = write_txt(src.path(), "regs.txt", "第一条 适用范围。\n第二条 监督管理职责。");

        let report = orch.ingest(&[path], regulation_chunker(), DocType::InternalRegulation, true).unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 0);
        assert!(report.total_chunks > 0);
        assert_eq!(orch.stats().unwrap().active_documents, 1);
    }

    #[test]
    fn reingesting_identical_content_is_skipped() {
        let data = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let orch = test_orchestrator(data.path());
        let content = "第一条 适用范围。\n第二条 监督管理职责。";
        let path_a = write_txt(src.path(), "regs.txt", content);
        orch.ingest(&[path_a], regulation_chunker(), DocType::InternalRegulation, true).unwrap();

        let path_b = write_txt(src.path(), "regs.txt", content);
        let report = orch.ingest(&[path_b], regulation_chunker(), DocType::InternalRegulation, true).unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(orch.stats().unwrap().active_documents, 1);
    }

    #[test]
    fn reingesting_same_filename_with_new_content_bumps_version() {
        let data = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let orch = test_orchestrator(data.path());
        let path_a = write_txt(src.path(), "regs.txt", "第一条 适用范围。\n第二条 监督管理职责。");
        orch.ingest(&[path_a], regulation_chunker(), DocType::InternalRegulation, true).unwrap();

        let path_b = write_txt(src.path(), "regs.txt", "第一条 新适用范围。\n第二条 新监督职责。\n第三条 附则。");
        let report = orch.ingest(&[path_b], regulation_chunker(), DocType::InternalRegulation, true).unwrap();
        assert_eq!(report.updated, 1);
        let stats = orch.stats().unwrap();
        assert_eq!(stats.active_documents, 1);
        assert_eq!(stats.deleted_documents, 0);
    }

    #[test]
    fn ask_with_no_ingested_documents_returns_insufficient_context_and_done() {
        let data = tempfile::tempdir().unwrap();
        let orch = test_orchestrator(data.path());
        let cancel = CancelHandle::new();
        let mut events = Vec::new();
        orch.ask("第三条是什么", None, &cancel, |e| events.push(e)).unwrap();
        assert!(matches!(events.last(), Some(AskEvent::Done)));
        assert!(events.iter().any(|e| matches!(e, AskEvent::Citations(c) if c.is_empty())));
    }

    #[test]
    fn ask_after_ingest_streams_tokens_and_citations() {
        let data = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let orch = test_orchestrator(data.path());
        let path = write_txt(src.path(), "regs.txt", "第一条 适用范围。\n第二条 监督管理职责。");
        orch.ingest(&[path], regulation_chunker(), DocType::InternalRegulation, true).unwrap();

        let cancel = CancelHandle::new();
        let mut events = Vec::new();
        orch.ask("第一条讲了什么", None, &cancel, |e| events.push(e)).unwrap();
        assert!(events.iter().any(|e| matches!(e, AskEvent::DeltaContent(_))));
        assert!(matches!(events.last(), Some(AskEvent::Done)));
    }

    #[test]
    fn cancelling_before_generation_skips_the_llm_call() {
        let data = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let orch = test_orchestrator(data.path());
        let path = write_txt(src.path(), "regs.txt", "第一条 适用范围。\n第二条 监督管理职责。");
        orch.ingest(&[path], regulation_chunker(), DocType::InternalRegulation, true).unwrap();

        let cancel = CancelHandle::new();
        cancel.cancel();
        let mut events = Vec::new();
        let result = orch.ask("第一条讲了什么", None, &cancel, |e| events.push(e));
        assert!(result.is_err());
        assert!(!events.iter().any(|e| matches!(e, AskEvent::DeltaContent(_))));
    }

    #[test]
    fn delete_document_cascades_to_registry_and_vectors() {
        let data = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let orch = test_orchestrator(data.path());
        let path = write_txt(src.path(), "regs.txt", "第一条 适用范围。\n第二条 监督管理职责。");
        let report = orch.ingest(&[path], regulation_chunker(), DocType::InternalRegulation, true).unwrap();
        let doc_id = report.per_file[0].doc_id.clone().unwrap();

        orch.delete_document(&doc_id).unwrap();
        let stats = orch.stats().unwrap();
        assert_eq!(stats.active_documents, 0);
        assert_eq!(stats.deleted_documents, 1);

        let hits = orch.search_with_intent("第一条").unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn rebuild_graph_is_idempotent_over_an_unchanged_registry() {
        let data = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let orch = test_orchestrator(data.path());
        let path = write_txt(src.path(), "issue.txt", "2023年采购部未整改：缺少验收单据。");
        orch.ingest(&[path], regulation_chunker(), DocType::AuditIssue, true).unwrap();

        orch.rebuild_graph().unwrap();
        let first = orch.read_indices(|i| i.graph.node_count()).unwrap();
        orch.rebuild_graph().unwrap();
        let second = orch.read_indices(|i| i.graph.node_count()).unwrap();
        assert_eq!(first, second);
        assert!(first > 0);
    }
}
