//! Structural splitters for the `regulation`, `audit_report`, and
//! `audit_issue` chunker modes (§4.B), plus the `smart`-mode heuristic that
//! picks among them and `default`. Unlike `text_segmenter`'s generic
//! boundary scoring, these cut on domain markers: clause numbering for
//! regulations, enumerated-list hierarchies for audit reports, and
//! table-row boundaries for issue ledgers.

use regex::Regex;
use std::sync::OnceLock;

use rag_model::SemanticBoundary;
use crate::unified_blocks::UnifiedBlock;

fn chapter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"第[一二三四五六七八九十百千0-9]+章").unwrap())
}

fn section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"第[一二三四五六七八九十百千0-9]+节").unwrap())
}

fn clause_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"第[一二三四五六七八九十百千0-9]+条").unwrap())
}

fn report_l1_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*[一二三四五六七八九十]+、").unwrap())
}

fn report_l2_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*（[一二三四五六七八九十]+）").unwrap())
}

fn report_l3_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*\d+[.、]").unwrap())
}

/// A structural segment before it becomes a `rag_model::Chunk`; ordinals and
/// `doc_id` are assigned by the caller once all segments for a document are
/// known.
pub struct Segment {
    pub text: String,
    pub page_nos: Vec<u32>,
    pub section_path: Vec<String>,
    pub semantic_boundary: SemanticBoundary,
}

struct FlatBlock { start: usize, end: usize, page_start: Option<u32>, page_end: Option<u32> }

fn flatten(blocks: &[UnifiedBlock]) -> (String, Vec<FlatBlock>) {
    let mut text = String::new();
    let mut flat = Vec::with_capacity(blocks.len());
    for b in blocks {
        let t = b.text.replace('\r', "");
        let start = text.len();
        text.push_str(&t);
        if !t.ends_with('\n') { text.push('\n'); }
        flat.push(FlatBlock { start, end: text.len(), page_start: b.page_start, page_end: b.page_end });
    }
    (text, flat)
}

fn pages_in_range(start: usize, end: usize, flat: &[FlatBlock]) -> Vec<u32> {
    let mut pages = Vec::new();
    for f in flat {
        if f.end <= start || f.start >= end { continue; }
        if let Some(ps) = f.page_start {
            let pe = f.page_end.unwrap_or(ps);
            for p in ps..=pe { if !pages.contains(&p) { pages.push(p); } }
        }
    }
    pages.sort_unstable();
    pages
}

#[derive(Clone, Copy)]
enum Level { Chapter, Section, Clause }

/// Cuts `text` at every marker occurrence, tracking a two-level ancestor
/// stack (chapter, section) for `section_path`; clause markers are leaves
/// and never enter the stack, so `(一)`-style sub-enumerations inside a
/// clause's body stay attached to that clause (they are never matched as
/// markers at all).
fn walk_markers(text: &str, flat: &[FlatBlock], markers: &[(usize, Level)]) -> Vec<Segment> {
    let mut out = Vec::new();
    if markers.is_empty() {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            out.push(Segment { text: trimmed.to_string(), page_nos: pages_in_range(0, text.len(), flat), section_path: Vec::new(), semantic_boundary: SemanticBoundary::Generic });
        }
        return out;
    }

    let mut stack: Vec<String> = Vec::new();

    if markers[0].0 > 0 {
        let pre = text[..markers[0].0].trim();
        if !pre.is_empty() {
            out.push(Segment { text: pre.to_string(), page_nos: pages_in_range(0, markers[0].0, flat), section_path: Vec::new(), semantic_boundary: SemanticBoundary::Generic });
        }
    }

    for (i, (idx, level)) in markers.iter().enumerate() {
        let end = markers.get(i + 1).map(|(n, _)| *n).unwrap_or(text.len());
        let seg_text = text[*idx..end].trim();
        if seg_text.is_empty() { continue; }

        let ancestors = stack.clone();
        let boundary = match level {
            Level::Chapter | Level::Section => SemanticBoundary::Section,
            Level::Clause => SemanticBoundary::Article,
        };
        out.push(Segment { text: seg_text.to_string(), page_nos: pages_in_range(*idx, end, flat), section_path: ancestors, semantic_boundary: boundary });

        let label = seg_text.lines().next().unwrap_or(seg_text).trim().to_string();
        match level {
            Level::Chapter => stack = vec![label],
            Level::Section => { stack.truncate(1); stack.push(label); }
            Level::Clause => {}
        }
    }
    out
}

fn merge_marker_indices(text: &str, regexes: &[(&Regex, Level)]) -> Vec<(usize, Level)> {
    let mut found: Vec<(usize, Level)> = Vec::new();
    for (re, level) in regexes {
        for m in re.find_iter(text) {
            found.push((m.start(), *level));
        }
    }
    found.sort_by_key(|(i, _)| *i);
    found.dedup_by_key(|(i, _)| *i);
    found
}

pub fn regulation_segments(blocks: &[UnifiedBlock]) -> Vec<Segment> {
    let (text, flat) = flatten(blocks);
    let markers = merge_marker_indices(&text, &[(chapter_re(), Level::Chapter), (section_re(), Level::Section), (clause_re(), Level::Clause)]);
    walk_markers(&text, &flat, &markers)
}

pub fn audit_report_segments(blocks: &[UnifiedBlock]) -> Vec<Segment> {
    let (text, flat) = flatten(blocks);
    let markers = merge_marker_indices(&text, &[(report_l1_re(), Level::Chapter), (report_l2_re(), Level::Section), (report_l3_re(), Level::Clause)]);
    walk_markers(&text, &flat, &markers)
}

/// Each table row is its own chunk; the nearest preceding non-table block
/// (usually a sheet or section heading) supplies `section_path` context.
pub fn audit_issue_segments(blocks: &[UnifiedBlock]) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut last_heading: Option<String> = None;
    for b in blocks {
        if b.is_table() {
            let text = b.text.trim();
            if text.is_empty() { continue; }
            let section_path = last_heading.clone().into_iter().collect();
            let mut pages = Vec::new();
            if let Some(ps) = b.page_start {
                let pe = b.page_end.unwrap_or(ps);
                for p in ps..=pe { pages.push(p); }
            }
            out.push(Segment { text: text.to_string(), page_nos: pages, section_path, semantic_boundary: SemanticBoundary::Row });
        } else if !b.text.trim().is_empty() {
            last_heading = Some(b.text.trim().lines().next().unwrap_or("").to_string());
        }
    }
    out
}

const SMART_PREFIX_BLOCKS: usize = 20;
const SMART_PREFIX_CHARS: usize = 2000;

/// Auto-selection order: `audit_issue`, `regulation`, `audit_report`,
/// `default` (§4.B Open Question i). The first heuristic that matches in
/// the document's prefix wins.
pub fn select_smart_mode(blocks: &[UnifiedBlock]) -> rag_model::ChunkerMode {
    use rag_model::ChunkerMode;

    let prefix_blocks = &blocks[..blocks.len().min(SMART_PREFIX_BLOCKS)];
    if prefix_blocks.iter().any(|b| b.is_table()) {
        return ChunkerMode::AuditIssue;
    }

    let mut prefix_text = String::new();
    for b in blocks {
        prefix_text.push_str(&b.text);
        if prefix_text.len() >= SMART_PREFIX_CHARS { break; }
    }
    let prefix_text: String = prefix_text.chars().take(SMART_PREFIX_CHARS).collect();

    if clause_re().is_match(&prefix_text) || chapter_re().is_match(&prefix_text) {
        return ChunkerMode::Regulation;
    }
    if report_l1_re().is_match(&prefix_text) || report_l2_re().is_match(&prefix_text) || report_l3_re().is_match(&prefix_text) {
        return ChunkerMode::AuditReport;
    }
    ChunkerMode::Default
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unified_blocks::BlockKind;

    fn block(text: &str) -> UnifiedBlock {
        UnifiedBlock::new(BlockKind::Paragraph, text, 0, "regs.txt", "txt")
    }

    #[test]
    fn regulation_mode_splits_on_clause_markers() {
        let blocks = vec![block("第一条 A内容。第二条 B内容。")];
        let segs = regulation_segments(&blocks);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].text, "第一条 A内容。");
        assert_eq!(segs[1].text, "第二条 B内容。");
    }

    #[test]
    fn regulation_mode_keeps_chapter_as_ancestor_for_clauses() {
        let blocks = vec![block("第一章 总则\n第一条 适用范围。")];
        let segs = regulation_segments(&blocks);
        assert_eq!(segs.len(), 2);
        assert!(segs[1].section_path.contains(&"第一章 总则".to_string()));
    }

    #[test]
    fn audit_report_mode_splits_top_level_enumeration() {
        let blocks = vec![block("一、采购管理\n问题描述。\n二、合同管理\n问题描述二。")];
        let segs = audit_report_segments(&blocks);
        assert_eq!(segs.len(), 2);
    }

    #[test]
    fn audit_issue_mode_emits_one_chunk_per_table_row() {
        let mut heading = block("2023年度审计问题");
        heading.kind = BlockKind::Heading;
        let row1 = UnifiedBlock::new(BlockKind::TableRow, "采购\t未履行审批\t未整改", 1, "issues.xlsx", "xlsx").mark_table();
        let row2 = UnifiedBlock::new(BlockKind::TableRow, "合同\t超期未签订\t已整改", 2, "issues.xlsx", "xlsx").mark_table();
        let segs = audit_issue_segments(&[heading, row1, row2]);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].section_path, vec!["2023年度审计问题".to_string()]);
        assert!(matches!(segs[0].semantic_boundary, SemanticBoundary::Row));
    }

    #[test]
    fn smart_mode_prefers_audit_issue_when_tables_present() {
        let row = UnifiedBlock::new(BlockKind::TableRow, "部门\t问题\t状态", 0, "x.xlsx", "xlsx").mark_table();
        assert_eq!(select_smart_mode(&[row]), rag_model::ChunkerMode::AuditIssue);
    }

    #[test]
    fn smart_mode_falls_back_to_default_for_prose() {
        let blocks = vec![block("本公司年度经营情况良好，各项指标稳步增长。")];
        assert_eq!(select_smart_mode(&blocks), rag_model::ChunkerMode::Default);
    }
}
