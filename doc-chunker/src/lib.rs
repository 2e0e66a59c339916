//! Parses supported document formats into `UnifiedBlock`s (§4.A) and chunks
//! them into `rag_model::Chunk`s under one of the `ChunkerMode`s (§4.B).
//! Readers never fail the pipeline outright; a failed parse degrades to a
//! single diagnostic block, and the chunk count only ever becomes zero
//! (rejected with `ChunkError::Empty`) when the source itself has no text.

pub mod error;
pub mod hashing;
pub mod reader_docx;
pub mod reader_excel;
pub mod reader_pdf;
#[cfg(feature = "pure-pdf")]
pub mod reader_pdf_pure;
pub mod reader_txt;
pub mod structural;
pub mod text_segmenter;
pub mod unified_blocks;

use rag_model::{Chunk, ChunkerMode, ChunkerOptions, DocId};
use structural::Segment;
use text_segmenter::TextChunkParams;
use unified_blocks::UnifiedBlock;

pub use error::ChunkError;

/// Parses a file by its extension into reader-agnostic blocks. Unrecognised
/// extensions are a hard `UnsupportedFormat` error rather than a silent
/// best-effort guess, since downstream chunking assumes block semantics
/// that only the matching reader produces.
pub fn parse_file(path: &str) -> Result<Vec<UnifiedBlock>, ChunkError> {
    let lower = path.to_lowercase();
    let blocks = if lower.ends_with(".txt") {
        reader_txt::read_txt_to_blocks(path)
    } else if lower.ends_with(".docx") {
        reader_docx::read_docx_to_blocks(path)
    } else if lower.ends_with(".pdf") {
        reader_pdf::read_pdf_to_blocks(path)
    } else if lower.ends_with(".xlsx") || lower.ends_with(".xls") || lower.ends_with(".ods") {
        reader_excel::read_excel_to_blocks(path)
    } else {
        return Err(ChunkError::UnsupportedFormat { file: path.to_string() });
    };

    let blocks: Vec<UnifiedBlock> = blocks.into_iter().filter(|b| !b.text.trim().is_empty()).collect();
    if blocks.is_empty() {
        return Err(ChunkError::Parse { file: path.to_string(), cause: "no extractable text".to_string() });
    }
    Ok(blocks)
}

/// Concatenation of block text in order, used by the document registry to
/// hash a document's canonical content (§3 `content_hash`).
pub fn join_block_text(blocks: &[UnifiedBlock]) -> String {
    blocks.iter().map(|b| b.text.as_str()).collect::<Vec<_>>().join("\n")
}

/// Chunks parsed blocks into ordered `Chunk`s under `opts`. `Smart` resolves
/// to a concrete mode first (§4.B Open Question i) so callers always know
/// which mode actually ran.
pub fn chunk_blocks(blocks: &[UnifiedBlock], doc_id: &DocId, opts: &ChunkerOptions) -> Result<Vec<Chunk>, ChunkError> {
    let resolved_mode = match opts.mode {
        ChunkerMode::Smart => structural::select_smart_mode(blocks),
        other => other,
    };

    let segments: Vec<Segment> = match resolved_mode {
        ChunkerMode::Regulation => structural::regulation_segments(blocks),
        ChunkerMode::AuditReport => structural::audit_report_segments(blocks),
        ChunkerMode::AuditIssue => structural::audit_issue_segments(blocks),
        ChunkerMode::Default | ChunkerMode::Smart => default_segments(blocks, opts),
    };

    if segments.is_empty() {
        return Err(ChunkError::Empty);
    }

    let cap = opts.size.max(1) * 2;
    let chunks = segments
        .into_iter()
        .enumerate()
        .map(|(ordinal, seg)| {
            let actual = seg.text.chars().count();
            if actual > cap {
                return Err(ChunkError::OversizedChunk { cap, actual });
            }
            Ok(Chunk::new(doc_id.clone(), ordinal as u32, seg.text, seg.page_nos, seg.section_path, seg.semantic_boundary))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(chunks)
}

fn default_segments(blocks: &[UnifiedBlock], opts: &ChunkerOptions) -> Vec<Segment> {
    let params = TextChunkParams::from_size(opts.size);
    let raw = text_segmenter::chunk_blocks_to_segments(blocks, &params);
    let with_overlap = text_segmenter::apply_overlap(raw, opts.overlap);
    with_overlap
        .into_iter()
        .map(|(text, page_start, page_end)| {
            let page_nos = match (page_start, page_end) {
                (Some(s), Some(e)) => (s..=e).collect(),
                (Some(s), None) => vec![s],
                _ => Vec::new(),
            };
            Segment { text, page_nos, section_path: Vec::new(), semantic_boundary: rag_model::SemanticBoundary::Paragraph }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_model::DocId;
    use unified_blocks::BlockKind;

    fn doc_id() -> DocId { DocId("abc123".to_string()) }

    #[test]
    fn regulation_mode_produces_expected_headers() {
        let blocks = vec![UnifiedBlock::new(BlockKind::Paragraph, "第一条 A内容。第二条 B内容。", 0, "regs.txt", "txt")];
        let opts = ChunkerOptions { mode: ChunkerMode::Regulation, size: 500, overlap: 50 };
        let chunks = chunk_blocks(&blocks, &doc_id(), &opts).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].header, "第一条 A内容。");
        assert_eq!(chunks[1].header, "第二条 B内容。");
    }

    #[test]
    fn empty_document_is_rejected() {
        let blocks: Vec<UnifiedBlock> = Vec::new();
        let opts = ChunkerOptions::default();
        let err = chunk_blocks(&blocks, &doc_id(), &opts).unwrap_err();
        assert!(matches!(err, ChunkError::Empty));
    }

    #[test]
    fn unsupported_extension_is_rejected_before_chunking() {
        let err = parse_file("report.pptx").unwrap_err();
        assert!(matches!(err, ChunkError::UnsupportedFormat { .. }));
    }

    #[test]
    fn smart_mode_resolves_to_audit_issue_for_spreadsheet_rows() {
        let row = UnifiedBlock::new(BlockKind::TableRow, "部门\t问题\t状态", 0, "x.xlsx", "xlsx").mark_table();
        let opts = ChunkerOptions { mode: ChunkerMode::Smart, size: 500, overlap: 0 };
        let chunks = chunk_blocks(&[row], &doc_id(), &opts).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(matches!(chunks[0].semantic_boundary, rag_model::SemanticBoundary::Row));
    }
}
