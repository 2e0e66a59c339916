//! DOCX reader: walks `word/document.xml` inside the OOXML zip package and
//! lowers paragraphs/headings/table rows into `UnifiedBlock`s. Heading
//! style (`w:pStyle w:val="HeadingN"`) is preserved as `heading_level`, per
//! §4.A's "DOCX preserves heading style -> heading kind".

use std::fs::File;
use std::io::Read as _;

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

use crate::unified_blocks::{BlockKind, UnifiedBlock};

const W_NS_LOCALS: &[&str] = &["p", "tbl", "tr", "tc", "t", "pStyle", "pPr", "br"];

pub fn read_docx_to_blocks(path: &str) -> Vec<UnifiedBlock> {
    match try_read_docx_to_blocks(path) {
        Ok(blocks) if !blocks.is_empty() => blocks,
        Ok(_) => vec![UnifiedBlock::new(BlockKind::Paragraph, "(empty document)", 0, path, "docx")],
        Err(err) => vec![UnifiedBlock::new(
            BlockKind::Paragraph,
            format!("(error) failed to read .docx file: {err}"),
            0,
            path,
            "docx",
        )],
    }
}

fn try_read_docx_to_blocks(path: &str) -> Result<Vec<UnifiedBlock>, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let mut archive = ZipArchive::new(file).map_err(|e| e.to_string())?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| e.to_string())?
        .read_to_string(&mut xml)
        .map_err(|e| e.to_string())?;

    Ok(parse_document_xml(&xml, path))
}

/// Strips a namespace prefix (`w:p` -> `p`) so matching doesn't depend on
/// which prefix the producing application chose.
fn local_name(qname: &[u8]) -> &str {
    let s = std::str::from_utf8(qname).unwrap_or("");
    match s.rsplit_once(':') {
        Some((_, local)) => local,
        None => s,
    }
}

#[derive(Default)]
struct ParaState {
    text: String,
    heading_level: Option<u32>,
}

fn parse_document_xml(xml: &str, path: &str) -> Vec<UnifiedBlock> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut blocks = Vec::new();
    let mut order = 0u32;

    let mut in_table_depth = 0u32;
    let mut row_cells: Vec<String> = Vec::new();
    let mut current_cell = String::new();
    let mut in_row = false;

    let mut para = ParaState::default();
    let mut in_para = false;
    let mut in_pstyle_tag = false;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let local = local_name(e.name().as_ref()).to_string();
                if !W_NS_LOCALS.contains(&local.as_str()) {
                    buf.clear();
                    continue;
                }
                match local.as_str() {
                    "tbl" => in_table_depth += 1,
                    "tr" if in_table_depth > 0 => {
                        in_row = true;
                        row_cells.clear();
                    }
                    "tc" if in_row => current_cell.clear(),
                    "p" if in_table_depth == 0 => {
                        in_para = true;
                        para = ParaState::default();
                    }
                    "pStyle" => {
                        in_pstyle_tag = true;
                        for attr in e.attributes().flatten() {
                            if local_name(attr.key.as_ref()) == "val" {
                                let val = String::from_utf8_lossy(&attr.value).to_string();
                                para.heading_level = heading_level_from_style(&val);
                            }
                        }
                        in_pstyle_tag = false;
                    }
                    "br" if in_para => para.text.push('\n'),
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                if in_row && !in_pstyle_tag {
                    current_cell.push_str(&text);
                } else if in_para {
                    para.text.push_str(&text);
                }
            }
            Ok(Event::End(e)) => {
                let local = local_name(e.name().as_ref()).to_string();
                match local.as_str() {
                    "tc" if in_row => row_cells.push(current_cell.trim().to_string()),
                    "tr" if in_table_depth > 0 => {
                        in_row = false;
                        let line = row_cells.join("\t");
                        if row_cells.iter().any(|c| !c.is_empty()) {
                            let mut b = UnifiedBlock::new(BlockKind::TableRow, line, order, path, "docx").mark_table();
                            b.attrs.insert("column_count".into(), row_cells.len().to_string());
                            blocks.push(b);
                            order += 1;
                        }
                    }
                    "tbl" => in_table_depth = in_table_depth.saturating_sub(1),
                    "p" if in_table_depth == 0 => {
                        in_para = false;
                        let trimmed = para.text.trim();
                        if !trimmed.is_empty() {
                            let kind = if para.heading_level.is_some() { BlockKind::Heading } else { BlockKind::Paragraph };
                            let mut b = UnifiedBlock::new(kind, trimmed.to_string(), order, path, "docx");
                            b.heading_level = para.heading_level;
                            blocks.push(b);
                            order += 1;
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    blocks
}

fn heading_level_from_style(style_val: &str) -> Option<u32> {
    let lower = style_val.to_lowercase();
    let digits: String = lower.chars().filter(|c| c.is_ascii_digit()).collect();
    if lower.starts_with("heading") || lower.starts_with("titre") {
        Some(digits.parse().unwrap_or(1))
    } else if lower == "title" {
        Some(1)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_style_maps_to_level() {
        assert_eq!(heading_level_from_style("Heading1"), Some(1));
        assert_eq!(heading_level_from_style("Heading3"), Some(3));
        assert_eq!(heading_level_from_style("Normal"), None);
        assert_eq!(heading_level_from_style("Title"), Some(1));
    }

    #[test]
    fn parses_paragraphs_and_table_rows_from_minimal_document_xml() {
        let xml = r#"<?xml version="1.0"?>
        <w:document xmlns:w="http://x">
          <w:body>
            <w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>第一章 总则</w:t></w:r></w:p>
            <w:p><w:r><w:t>本制度适用于全体员工。</w:t></w:r></w:p>
            <w:tbl>
              <w:tr><w:tc><w:p><w:r><w:t>部门</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>负责人</w:t></w:r></w:p></w:tc></w:tr>
            </w:tbl>
          </w:body>
        </w:document>"#;
        let blocks = parse_document_xml(xml, "x.docx");
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].kind, BlockKind::Heading);
        assert_eq!(blocks[0].heading_level, Some(1));
        assert_eq!(blocks[1].kind, BlockKind::Paragraph);
        assert_eq!(blocks[2].kind, BlockKind::TableRow);
        assert!(blocks[2].text.contains("部门"));
    }
}
