//! Pure-Rust PDF reader behind feature `pure-pdf`: extracts per-page text
//! with `lopdf` and lowers it into paragraph/heading blocks the same way
//! `reader_txt` does, so the chunker's structural splitters work
//! identically regardless of source format.

#![cfg(feature = "pure-pdf")]

use lopdf::Document;

use crate::unified_blocks::{BlockKind, UnifiedBlock};

pub fn read_pdf_to_blocks_pure(path: &str) -> Vec<UnifiedBlock> {
    let doc = match Document::load(path) {
        Ok(d) => d,
        Err(err) => {
            return vec![UnifiedBlock::new(
                BlockKind::Paragraph,
                format!("(error) failed to read .pdf file: {err}"),
                0,
                path,
                "lopdf",
            )]
        }
    };

    let pages = doc.get_pages();
    let mut order = 0u32;
    let mut out = Vec::new();

    for (page_num, _page_id) in pages {
        let text = match doc.extract_text(&[page_num]) {
            Ok(t) => t,
            Err(_) => continue,
        };
        for para in split_into_paragraphs(&text) {
            let kind = if looks_like_heading(&para) { BlockKind::Heading } else { BlockKind::Paragraph };
            let mut b = UnifiedBlock::new(kind, para, order, path, "lopdf");
            b.page_start = Some(page_num);
            b.page_end = Some(page_num);
            out.push(b);
            order += 1;
        }
    }

    if out.is_empty() {
        out.push(UnifiedBlock::new(BlockKind::Paragraph, "(empty document)", 0, path, "lopdf"));
    }
    out
}

fn split_into_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(|s| s.lines().collect::<Vec<_>>().join(" ").trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn looks_like_heading(line: &str) -> bool {
    let chars = line.chars().count();
    chars > 0 && chars <= 30 && !line.ends_with(['。', '.', '!', '?', '！', '？'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_double_newline_separated_text_into_paragraphs() {
        let text = "第一章 总则\n\n本制度适用于全体员工，自发布之日起施行。";
        let paras = split_into_paragraphs(text);
        assert_eq!(paras.len(), 2);
        assert_eq!(paras[0], "第一章 总则");
    }

    #[test]
    fn short_non_terminated_line_is_treated_as_heading() {
        assert!(looks_like_heading("第一章 总则"));
        assert!(!looks_like_heading("本制度适用于全体员工，自发布之日起施行。"));
    }
}
