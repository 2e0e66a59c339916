//! Ambient configuration layer (§2's "RuntimeConfig, profiles selected by
//! env var"). Mirrors `providers::config::default_stdio_config`'s pattern of
//! a plain defaults struct plus a loader that layers environment overrides
//! on top, since `RuntimeConfig` is the thing that wires every
//! provider/store together at `Orchestrator::start`.

use std::path::PathBuf;
use std::time::Duration;

use providers::config::default_stdio_config;
use providers::embedder::OnnxStdIoConfig;
use rag_model::RetrievalOptions;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub data_root: PathBuf,
    pub embedder: OnnxStdIoConfig,
    pub default_retrieval: RetrievalOptions,
    pub ingest_concurrency: usize,
    pub session_max_turns: usize,
    pub session_max_age: Duration,
    pub rerank_max_documents: usize,
    pub rerank_max_chars_per_doc: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            data_root: PathBuf::from("./data"),
            embedder: default_stdio_config(),
            default_retrieval: RetrievalOptions::default(),
            ingest_concurrency: 4,
            session_max_turns: 20,
            session_max_age: Duration::from_secs(60 * 60 * 4),
            rerank_max_documents: 100,
            rerank_max_chars_per_doc: 4000,
        }
    }
}

impl RuntimeConfig {
    /// Layers environment overrides onto the defaults (§6 "Provider
    /// credentials and endpoints are read from a layered config,
    /// environment-selected profile overrides defaults").
    pub fn from_env() -> Self {
        let mut cfg = RuntimeConfig::default();
        if let Ok(root) = std::env::var("RAG_DATA_ROOT") {
            cfg.data_root = PathBuf::from(root);
        }
        if let Ok(n) = std::env::var("RAG_INGEST_CONCURRENCY").and_then(|v| v.parse::<usize>().map_err(|_| std::env::VarError::NotPresent)) {
            cfg.ingest_concurrency = n.max(1);
        }
        if let Ok(alpha) = std::env::var("RAG_HYBRID_ALPHA").and_then(|v| v.parse::<f32>().map_err(|_| std::env::VarError::NotPresent)) {
            cfg.default_retrieval.alpha = alpha.clamp(0.0, 1.0);
        }
        cfg
    }
}
