//! §4.K Answerer: builds the grounded prompt, streams the LLM provider's
//! tokens, and resolves citation tokens after generation. Grounded on
//! `providers::llm::LlmProvider`'s streaming shape (a real-ish impl and a
//! deterministic offline impl, mirroring `embedder::Embedder`); the citation
//! resolution/ordering logic is new orchestration, since nothing in the
//! teacher workspace generates text.

use std::collections::HashSet;

use providers::llm::StreamEvent;
use providers::LlmProvider;
use rag_model::ScoredChunk;

use crate::events::Citation;

const INSUFFICIENT_CONTEXT_REPLY: &str = "insufficient context to answer from the provided sources.";

/// Builds the system+context+question prompt with `[S<n>]`-addressable
/// sources (§4.K): per-chunk `source_id`, filename, section path, then the
/// prior turns and the question.
pub fn build_prompt(question: &str, chunks: &[ScoredChunk], prior_turns: &[String]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are an audit and compliance assistant. Answer only from the \
         sources below, citing every claim inline with its source id in the \
         form [S<n>]. Never invent a source id. If the sources do not cover \
         the question, say so plainly.\n\n",
    );
    for (i, c) in chunks.iter().enumerate() {
        let n = i + 1;
        let section = if c.metadata.section_path.is_empty() { String::new() } else { format!(" > {}", c.metadata.section_path.join(" > ")) };
        prompt.push_str(&format!("S{n}: {}{}\n{}\n\n", c.metadata.filename, section, c.text));
    }
    if !prior_turns.is_empty() {
        prompt.push_str("Prior conversation:\n");
        for t in prior_turns {
            prompt.push_str(t);
            prompt.push('\n');
        }
        prompt.push('\n');
    }
    prompt.push_str("Q: ");
    prompt.push_str(question);
    prompt
}

pub struct AnswerResult {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// Streams the answer through a `CitationScrubber` so unresolved `[S<n>]`
/// tokens never reach `on_token`, then resolves citations from the
/// already-scrubbed accumulated text (§4.K guarantees a/b/c). Returns the
/// fixed insufficient-context reply with empty citations when `chunks` is
/// empty, without calling the provider at all.
pub fn generate(
    llm: &dyn LlmProvider,
    question: &str,
    chunks: &[ScoredChunk],
    prior_turns: &[String],
    should_cancel: &dyn Fn() -> bool,
    mut on_token: impl FnMut(&str),
) -> Result<AnswerResult, providers::llm::LlmError> {
    if chunks.is_empty() {
        return Ok(AnswerResult { text: INSUFFICIENT_CONTEXT_REPLY.to_string(), citations: Vec::new() });
    }

    let prompt = build_prompt(question, chunks, prior_turns);
    let mut text = String::new();
    let mut scrubber = CitationScrubber::new(chunks.len());
    llm.generate(&prompt, should_cancel, &mut |event| {
        if let StreamEvent::Token(t) = event {
            scrubber.push(&t, |piece| {
                text.push_str(piece);
                on_token(piece);
            });
        }
    })?;
    scrubber.flush(|piece| {
        text.push_str(piece);
        on_token(piece);
    });

    let citations = resolve_citations(&text, chunks);
    Ok(AnswerResult { text, citations })
}

/// Past this many buffered characters with no closing `]`, a held-back `[`
/// is forwarded as ordinary prose rather than a possible citation token —
/// long enough for `[S<n>]` with a multi-digit `n`, short enough not to
/// stall streaming on a stray bracket.
const MAX_TOKEN_LOOKAHEAD: usize = 8;

/// Buffers streamed text just far enough to recognize `[S<n>]` citation
/// tokens before they reach the caller: §4.K(a) "unresolved tokens are
/// stripped before emit" applies to the emitted prose itself, not only the
/// citation table built afterward, so a token that doesn't resolve to a
/// provided chunk must never reach `on_token` in the first place.
struct CitationScrubber {
    buf: String,
    max_source: usize,
}

impl CitationScrubber {
    fn new(max_source: usize) -> Self {
        CitationScrubber { buf: String::new(), max_source }
    }

    /// Feeds `incoming` into the buffer and forwards every piece of text
    /// that is now known not to be (part of) a citation token via `emit`.
    fn push(&mut self, incoming: &str, mut emit: impl FnMut(&str)) {
        self.buf.push_str(incoming);
        loop {
            let Some(start) = self.buf.find('[') else {
                if !self.buf.is_empty() {
                    emit(&self.buf);
                    self.buf.clear();
                }
                return;
            };
            if start > 0 {
                let prefix = self.buf[..start].to_string();
                emit(&prefix);
            }
            let candidate = self.buf[start..].to_string();
            match candidate.find(']') {
                Some(end) => {
                    let token = &candidate[1..end];
                    let valid = token.strip_prefix('S').and_then(|n| n.parse::<usize>().ok()).is_some_and(|n| n >= 1 && n <= self.max_source);
                    if valid {
                        emit(&candidate[..=end]);
                    }
                    self.buf = candidate[end + 1..].to_string();
                }
                None if candidate.len() > MAX_TOKEN_LOOKAHEAD => {
                    emit(&candidate[..1]);
                    self.buf = candidate[1..].to_string();
                }
                None => {
                    self.buf = candidate;
                    return;
                }
            }
        }
    }

    /// Forwards whatever remains unresolved once the stream has ended —
    /// there is no more input that could complete a pending bracket, so
    /// it's emitted as plain text.
    fn flush(self, mut emit: impl FnMut(&str)) {
        if !self.buf.is_empty() {
            emit(&self.buf);
        }
    }
}

/// Extracts `[S<n>]` tokens from `text` in first-appearance order,
/// deduplicated, and resolves each to its source chunk. By the time this
/// runs, `text` has already passed through `CitationScrubber`, so every
/// bracketed token it finds is in range; this just builds the citation
/// table and de-duplicates repeated references to the same source.
fn resolve_citations(text: &str, chunks: &[ScoredChunk]) -> Vec<Citation> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some(end) = text[i..].find(']') {
                let token = &text[i + 1..i + end];
                if let Some(n) = token.strip_prefix('S').and_then(|n| n.parse::<usize>().ok()) {
                    if n >= 1 && n <= chunks.len() && seen.insert(n) {
                        let c = &chunks[n - 1];
                        out.push(Citation {
                            source_id: format!("S{n}"),
                            chunk_id: c.chunk_id.clone(),
                            filename: c.metadata.filename.clone(),
                            section_path: c.metadata.section_path.clone(),
                            page_nos: c.metadata.page_nos.clone(),
                            score: c.rerank_score.unwrap_or(c.score),
                            preview: c.text.chars().take(160).collect(),
                        });
                    }
                }
                i += end + 1;
                continue;
            }
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::llm::DeterministicLlm;
    use rag_model::{ChunkId, ChunkMetadata, DocId, DocType};

    fn chunk(id: &str, text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk_id: ChunkId(id.to_string()),
            doc_id: DocId("d1".into()),
            score: 0.9,
            vector_score: Some(0.9),
            graph_score: None,
            rerank_score: None,
            metadata: ChunkMetadata {
                chunk_id: ChunkId(id.to_string()),
                doc_id: DocId("d1".into()),
                doc_type: DocType::InternalRegulation,
                title: None,
                filename: "regs.txt".into(),
                page_nos: vec![1],
                header: text.to_string(),
                section_path: vec!["第一章".into()],
            },
            text: text.to_string(),
        }
    }

    #[test]
    fn empty_chunk_list_returns_fixed_reply_without_calling_provider() {
        let llm = DeterministicLlm;
        let result = generate(&llm, "summarize", &[], &[], &|| false, |_| panic!("should not stream")).unwrap();
        assert_eq!(result.text, INSUFFICIENT_CONTEXT_REPLY);
        assert!(result.citations.is_empty());
    }

    #[test]
    fn citations_resolve_in_first_appearance_order() {
        let text = "The policy requires approval [S2] and disclosure [S1] and [S2] again.";
        let chunks = vec![chunk("d1:0", "approval rule"), chunk("d1:1", "disclosure rule")];
        let citations = resolve_citations(text, &chunks);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].source_id, "S2");
        assert_eq!(citations[1].source_id, "S1");
    }

    #[test]
    fn out_of_range_citation_token_is_dropped() {
        let text = "See [S9] for details.";
        let chunks = vec![chunk("d1:0", "approval rule")];
        assert!(resolve_citations(text, &chunks).is_empty());
    }

    struct ScriptedLlm {
        tokens: Vec<&'static str>,
    }

    impl LlmProvider for ScriptedLlm {
        fn classify(&self, _prompt: &str) -> Result<String, providers::llm::LlmError> {
            unimplemented!()
        }

        fn generate(&self, _prompt: &str, _should_cancel: &dyn Fn() -> bool, on_event: &mut dyn FnMut(StreamEvent)) -> Result<(), providers::llm::LlmError> {
            for t in &self.tokens {
                on_event(StreamEvent::Token(t.to_string()));
            }
            on_event(StreamEvent::Done);
            Ok(())
        }
    }

    #[test]
    fn unresolved_citation_token_never_reaches_on_token_even_when_split_mid_stream() {
        let llm = ScriptedLlm { tokens: vec!["See ", "[S", "9", "] ", "for ", "details."] };
        let chunks = vec![chunk("d1:0", "approval rule")];
        let mut streamed = String::new();
        let result = generate(&llm, "q", &chunks, &[], &|| false, |t| streamed.push_str(t)).unwrap();
        assert!(!streamed.contains("[S9]"), "streamed output leaked an unresolved citation token: {streamed:?}");
        assert!(!result.text.contains("[S9]"));
        assert!(result.citations.is_empty());
        assert_eq!(streamed, "See  for details.");
    }

    #[test]
    fn valid_citation_token_is_forwarded_even_when_split_mid_stream() {
        let llm = ScriptedLlm { tokens: vec!["Approval needs ", "[S", "1", "]", " review."] };
        let chunks = vec![chunk("d1:0", "approval rule")];
        let mut streamed = String::new();
        let result = generate(&llm, "q", &chunks, &[], &|| false, |t| streamed.push_str(t)).unwrap();
        assert_eq!(streamed, "Approval needs [S1] review.");
        assert_eq!(result.text, streamed);
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.citations[0].source_id, "S1");
    }

    #[test]
    fn unterminated_bracket_past_lookahead_is_forwarded_as_prose() {
        let llm = ScriptedLlm { tokens: vec!["weird [not a citation at all here"] };
        let chunks = vec![chunk("d1:0", "approval rule")];
        let mut streamed = String::new();
        generate(&llm, "q", &chunks, &[], &|| false, |t| streamed.push_str(t)).unwrap();
        assert_eq!(streamed, "weird [not a citation at all here");
    }
}
