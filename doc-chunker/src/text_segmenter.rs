//! Generic paragraph-boundary scorer backing the `default` chunker mode
//! (§4.B). Boundaries are scored block-end > double-newline > single-newline
//! > sentence-end, penalized for following a very short line or crossing a
//! page boundary without a newline, and for sitting inside a run of TOC-style
//! dot leaders; table blocks are never split internally. Cuts are chosen in
//! `[start+min_chars, start+cap_chars]`, preferring the point closest to
//! `start+max_chars`, with a hard-cap fallback that still respects UTF-8
//! char boundaries.

use crate::unified_blocks::UnifiedBlock;

#[derive(Debug, Clone, Copy)]
pub struct TextChunkParams {
    pub min_chars: usize,
    pub max_chars: usize,
    pub cap_chars: usize,
    /// Penalize cutting immediately after a very short line.
    pub penalize_short_line: bool,
    /// Penalize cutting at a page boundary when there is no newline before.
    pub penalize_page_boundary_no_newline: bool,
}

impl Default for TextChunkParams {
    fn default() -> Self {
        Self { min_chars: 400, max_chars: 600, cap_chars: 800, penalize_short_line: true, penalize_page_boundary_no_newline: true }
    }
}

impl TextChunkParams {
    /// Derives segmenter bounds from `ChunkerOptions::size`: a chunk is
    /// preferred at `size` chars, allowed as small as half that, and capped
    /// at `2 * size` so the §4.B invariant "no chunk exceeds 2 × chunk_size"
    /// holds by construction.
    pub fn from_size(size: usize) -> Self {
        Self {
            min_chars: (size / 2).max(1),
            max_chars: size.max(1),
            cap_chars: (size * 2).max(2),
            penalize_short_line: true,
            penalize_page_boundary_no_newline: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Boundary { idx: usize, base_score: f32 }

#[derive(Debug, Clone, Copy)]
struct BlockSpan { start: usize, end: usize, page_start: Option<u32>, page_end: Option<u32> }

fn collect_text_and_boundaries(blocks: &[UnifiedBlock]) -> (String, Vec<Boundary>, Vec<BlockSpan>) {
    let mut text = String::new();
    let mut boundaries: Vec<Boundary> = Vec::new();
    let mut spans: Vec<BlockSpan> = Vec::new();

    let mut cursor = 0usize;
    for (i, b) in blocks.iter().enumerate() {
        let t = b.text.replace('\r', "");
        let start_idx = cursor;
        text.push_str(&t);
        cursor += t.len();
        spans.push(BlockSpan { start: start_idx, end: cursor, page_start: b.page_start, page_end: b.page_end });
        if i + 1 < blocks.len() {
            boundaries.push(Boundary { idx: cursor, base_score: 1.0 });
        }
    }

    let bytes = text.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'\n' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'\n' {
                boundaries.push(Boundary { idx: i + 2, base_score: 0.95 });
                i += 2;
                continue;
            } else {
                boundaries.push(Boundary { idx: i + 1, base_score: 0.8 });
            }
        }
        i += 1;
    }

    for (idx, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?' | '。' | '！' | '？') {
            boundaries.push(Boundary { idx: idx + ch.len_utf8(), base_score: 0.6 });
        }
    }

    boundaries.sort_by_key(|b| b.idx);
    boundaries.dedup_by(|a, b| {
        if a.idx == b.idx {
            if a.base_score < b.base_score { a.base_score = b.base_score; }
            true
        } else { false }
    });

    (text, boundaries, spans)
}

fn penalize_after_short_line(text: &str, idx: usize) -> f32 {
    let mut j = if idx > 0 { idx - 1 } else { 0 };
    while j > 0 && text.as_bytes()[j] != b'\n' { j -= 1; }
    let line_start = if text.as_bytes()[j] == b'\n' { j + 1 } else { j };
    let line_len = idx.saturating_sub(line_start);
    if line_len < 10 { 0.35 } else { 0.0 }
}

fn extra_penalty_page_boundary_no_newline(idx: usize, text: &str, spans: &[BlockSpan]) -> f32 {
    for w in spans.windows(2) {
        let a = &w[0];
        let b = &w[1];
        if a.end == idx {
            let page_transition = match (a.page_end, b.page_start) { (Some(pe), Some(ps)) => pe != ps, _ => false };
            let has_newline_before = idx > 0 && text.as_bytes()[idx.saturating_sub(1)] == b'\n';
            if page_transition && !has_newline_before { return 0.4; }
        }
    }
    0.0
}

fn pick_boundary_in_range(scored: &[(usize, f32)], lo: usize, hi: usize, prefer: usize) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, score) in scored {
        if *idx < lo || *idx > hi { continue; }
        let dist = if *idx > prefer { *idx - prefer } else { prefer - *idx } as f32;
        let span = (hi.saturating_sub(lo)) as f32 + 1.0;
        let eff = *score - dist / span;
        if let Some((_, b)) = best { if eff > b { best = Some((*idx, eff)); } } else { best = Some((*idx, eff)); }
    }
    best.map(|(i, _)| i)
}

fn page_range_for_segment(start: usize, end: usize, spans: &[BlockSpan]) -> (Option<u32>, Option<u32>) {
    let mut min_p: Option<u32> = None;
    let mut max_p: Option<u32> = None;
    for s in spans {
        if s.end <= start || s.start >= end { continue; }
        if let Some(ps) = s.page_start { min_p = Some(match min_p { Some(v) => v.min(ps), None => ps }); }
        if let Some(pe) = s.page_end { max_p = Some(match max_p { Some(v) => v.max(pe), None => pe }); }
    }
    (min_p, max_p)
}

/// Generic, format-agnostic segmenter backing the `default` chunker mode.
pub fn chunk_blocks_to_segments(blocks: &[UnifiedBlock], params: &TextChunkParams) -> Vec<(String, Option<u32>, Option<u32>)> {
    let (text, boundaries, spans) = collect_text_and_boundaries(blocks);
    if text.trim().is_empty() { return Vec::new(); }

    let is_leader_char = |c: char| matches!(c, '.' | '…' | '・');

    let mut table_ranges: Vec<(usize, usize)> = Vec::new();
    for (i, b) in blocks.iter().enumerate() {
        if b.is_table() {
            if let Some(span) = spans.get(i) { table_ranges.push((span.start, span.end)); }
        }
    }
    table_ranges.sort_by_key(|r| r.0);

    let mut scored: Vec<(usize, f32)> = boundaries.iter().map(|b| {
        let mut s = b.base_score;
        if params.penalize_short_line { s -= penalize_after_short_line(&text, b.idx); }
        if params.penalize_page_boundary_no_newline { s -= extra_penalty_page_boundary_no_newline(b.idx, &text, &spans); }

        let mut left_len = 0usize;
        {
            let mut pos = b.idx;
            while pos > 0 {
                let mut p = pos - 1; while p > 0 && !text.is_char_boundary(p) { p -= 1; }
                if !text.is_char_boundary(p) { break; }
                if let Some(ch) = text[p..pos].chars().next() { if is_leader_char(ch) { left_len += 1; pos = p; continue; } }
                break;
            }
        }
        let mut right_len = 0usize;
        {
            let mut pos = b.idx;
            while pos < text.len() {
                if !text.is_char_boundary(pos) { break; }
                if let Some(ch) = text[pos..].chars().next() {
                    let next = pos + ch.len_utf8();
                    if is_leader_char(ch) { right_len += 1; pos = next; continue; }
                }
                break;
            }
        }
        if left_len + right_len >= 3 && left_len > 0 {
            s -= 0.6;
        }
        (b.idx, s)
    }).collect();
    scored.sort_by_key(|p| p.0);

    scored.retain(|(idx, _)| !table_ranges.iter().any(|(s, e)| *idx > *s && *idx < *e));

    if !table_ranges.is_empty() {
        let idxs: Vec<usize> = scored.iter().map(|p| p.0).collect();
        for (ts, te) in &table_ranges {
            if let Ok(pos) = idxs.binary_search(te) {
                if let Some((_i, score)) = scored.get_mut(pos) { *score += 0.25; }
            }
            match idxs.binary_search(ts) {
                Ok(pos) | Err(pos) => {
                    if pos > 0 {
                        let prev = pos - 1;
                        if let Some((_i, score)) = scored.get_mut(prev) { *score -= 0.3; }
                        if prev > 0 {
                            let prev2 = prev - 1;
                            if let Some((_i, score)) = scored.get_mut(prev2) { *score += 0.15; }
                        }
                    }
                }
            }
        }
    }

    let total = text.len();
    let mut start = 0usize;
    let mut out: Vec<(String, Option<u32>, Option<u32>)> = Vec::new();
    while start < total {
        let min = start.saturating_add(params.min_chars.min(total - start));
        let max = start.saturating_add(params.max_chars.min(total - start));
        let cap = start.saturating_add(params.cap_chars.min(total - start));
        let mut hard_cap = cap;
        while hard_cap > start && !text.is_char_boundary(hard_cap) { hard_cap -= 1; }
        if hard_cap <= start { hard_cap = (cap + 1).min(total); while hard_cap < total && !text.is_char_boundary(hard_cap) { hard_cap += 1; } }
        {
            let mut pos = hard_cap;
            let mut moved = false;
            loop {
                if pos == start { break; }
                let mut p = pos - 1; while p > 0 && !text.is_char_boundary(p) { p -= 1; }
                if !text.is_char_boundary(p) { break; }
                if let Some(ch) = text[p..pos].chars().next() {
                    if is_leader_char(ch) { pos = p; moved = true; continue; }
                }
                break;
            }
            if moved { hard_cap = pos.max(start + 1); }
        }

        if start + params.min_chars >= total {
            let seg = text[start..total].trim_end();
            if !seg.is_empty() {
                let (ps, pe) = page_range_for_segment(start, total, &spans);
                out.push((seg.to_string(), ps, pe));
            }
            break;
        }

        let next_table = table_ranges.iter().find(|(s, _e)| *s >= start);

        if let Some(mut cut) = pick_boundary_in_range(&scored, min, cap, max) {
            if cut > start {
                if let Some((ts, te)) = next_table.copied() {
                    if cut <= ts && te <= cap {
                        let idxs: Vec<usize> = scored.iter().map(|p| p.0).collect();
                        let mut prev2: Option<usize> = None;
                        match idxs.binary_search(&ts) {
                            Ok(pos) | Err(pos) => {
                                if pos > 1 { prev2 = Some(idxs[pos - 2]); }
                                else if pos > 0 { prev2 = Some(idxs[pos - 1]); }
                            }
                        }
                        if let Some(b2) = prev2 { if b2 >= min { cut = b2; } }
                    }
                }
                let seg = text[start..cut].trim_end();
                if !seg.is_empty() {
                    let (ps, pe) = page_range_for_segment(start, cut, &spans);
                    out.push((seg.to_string(), ps, pe));
                }
                start = cut;
                continue;
            }
        }

        let mut fallback_cut: Option<usize> = None;
        for (idx, _) in &scored { if *idx > cap { fallback_cut = Some(*idx); break; } }
        if fallback_cut.is_none() { if let Some((idx, _)) = scored.last() { fallback_cut = Some(*idx); } }
        let mut cut = fallback_cut.unwrap_or(hard_cap);
        if cut > hard_cap { cut = hard_cap; }
        if cut <= start { cut = hard_cap; }
        if cut <= start { cut = total; }
        let seg = text[start..cut].trim_end();
        if !seg.is_empty() {
            let (ps, pe) = page_range_for_segment(start, cut, &spans);
            out.push((seg.to_string(), ps, pe));
        }
        start = cut;
    }

    // Merge overly short trailing segments into the previous one, avoiding
    // orphan fragments (§4.B tie-break), when the merge still fits the cap.
    let mut merged: Vec<(String, Option<u32>, Option<u32>)> = Vec::with_capacity(out.len());
    let orphan_threshold = params.max_chars / 4;
    for (text, ps, pe) in out.into_iter() {
        if let Some((prev_text, prev_ps, prev_pe)) = merged.last_mut() {
            let curr_len = text.chars().count();
            let prev_len = prev_text.chars().count();
            if curr_len <= orphan_threshold && prev_len + curr_len <= params.cap_chars {
                if !prev_text.ends_with('\n') { prev_text.push('\n'); }
                prev_text.push_str(&text);
                *prev_ps = min_opt(*prev_ps, ps);
                *prev_pe = max_opt(*prev_pe, pe);
                continue;
            }
        }
        merged.push((text, ps, pe));
    }
    merged
}

fn min_opt(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) { (Some(a), Some(b)) => Some(a.min(b)), (Some(a), None) => Some(a), (None, Some(b)) => Some(b), _ => None }
}

fn max_opt(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) { (Some(a), Some(b)) => Some(a.max(b)), (Some(a), None) => Some(a), (None, Some(b)) => Some(b), _ => None }
}

/// Prepends the tail of the previous segment to each following one, per
/// `ChunkerOptions::overlap`. Reconstructing the source requires stripping
/// the first `overlap` chars from every chunk but the first.
pub fn apply_overlap(mut segments: Vec<(String, Option<u32>, Option<u32>)>, overlap: usize) -> Vec<(String, Option<u32>, Option<u32>)> {
    if overlap == 0 || segments.len() < 2 {
        return segments;
    }
    for i in (1..segments.len()).rev() {
        let tail: String = {
            let prev = &segments[i - 1].0;
            let char_count = prev.chars().count();
            let skip = char_count.saturating_sub(overlap);
            prev.chars().skip(skip).collect()
        };
        if !tail.is_empty() {
            segments[i].0 = format!("{tail}{}", segments[i].0);
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unified_blocks::BlockKind;

    fn block(text: &str) -> UnifiedBlock {
        UnifiedBlock::new(BlockKind::Paragraph, text, 0, "doc.txt", "txt")
    }

    #[test]
    fn short_document_becomes_a_single_chunk() {
        let blocks = vec![block("内部控制制度适用于全体员工。")];
        let params = TextChunkParams::from_size(500);
        let segs = chunk_blocks_to_segments(&blocks, &params);
        assert_eq!(segs.len(), 1);
    }

    #[test]
    fn no_segment_exceeds_twice_the_configured_size() {
        let long_text = "本制度规定了采购审批流程与凭证保存要求。".repeat(200);
        let blocks = vec![block(&long_text)];
        let params = TextChunkParams::from_size(300);
        let segs = chunk_blocks_to_segments(&blocks, &params);
        for (text, _, _) in &segs {
            assert!(text.chars().count() <= 600, "segment exceeded 2x size: {}", text.chars().count());
        }
    }

    #[test]
    fn overlap_duplicates_tail_of_previous_segment() {
        let segments = vec![
            ("第一段内容，较长一些用于测试重叠。".to_string(), None, None),
            ("第二段内容紧随其后。".to_string(), None, None),
        ];
        let with_overlap = apply_overlap(segments.clone(), 4);
        assert!(with_overlap[1].0.starts_with(&segments[0].0.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect::<String>()));
    }
}
