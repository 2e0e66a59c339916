//! Typed event sequence the `ask` pipeline emits (§4.K/§4.M). An HTTP layer
//! (external collaborator, per §6) adapts this to SSE: `progress`, `session`,
//! `citations`, `delta.content`, terminated by `[DONE]`. Modeled as a plain
//! enum rather than raising through the transport, per §9 "replacing
//! exception-based control flow".

use rag_model::{ChunkId, ErrorKind, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskStage {
    Intent,
    Retrieval,
    Generation,
}

impl AskStage {
    pub fn as_str(self) -> &'static str {
        match self {
            AskStage::Intent => "intent",
            AskStage::Retrieval => "retrieval",
            AskStage::Generation => "generation",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    /// `S1`, `S2`, ... in first-appearance order within the answer text.
    pub source_id: String,
    pub chunk_id: ChunkId,
    pub filename: String,
    pub section_path: Vec<String>,
    pub page_nos: Vec<u32>,
    pub score: f32,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AskEvent {
    /// Emitted once, before the first progress event, when `ask` creates a
    /// new session rather than continuing one the caller supplied.
    Session { session_id: SessionId },
    StageRunning { stage: AskStage },
    StageDone { stage: AskStage, hits: Option<usize> },
    DeltaContent(String),
    /// Emitted once generation finishes, before `Done`; contains one entry
    /// per `S<n>` actually referenced in the accumulated answer text.
    Citations(Vec<Citation>),
    /// A terminal error surfaced before `Done` (§7: "SSE streams surface
    /// errors as a terminal `error` event before `[DONE]`").
    Error { kind: ErrorKind, message: String },
    Done,
}
