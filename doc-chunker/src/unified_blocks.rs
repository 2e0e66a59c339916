//! A reader-agnostic block: every format-specific reader (PDF, DOCX, TXT,
//! spreadsheet) lowers its native structure into a flat ordered sequence of
//! these before the chunker sees anything, so `text_segmenter` and the
//! structural splitters never need to know which parser produced a block.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    Heading,
    ListItem,
    TableRow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedBlock {
    pub kind: BlockKind,
    pub text: String,
    pub order: u32,
    pub source_uri: String,
    pub backend: String,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
    pub heading_level: Option<u32>,
    pub attrs: HashMap<String, String>,
}

impl UnifiedBlock {
    pub fn new(kind: BlockKind, text: impl Into<String>, order: u32, source_uri: &str, backend: &str) -> Self {
        Self {
            kind,
            text: text.into(),
            order,
            source_uri: source_uri.to_string(),
            backend: backend.to_string(),
            page_start: None,
            page_end: None,
            heading_level: None,
            attrs: HashMap::new(),
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self.kind, BlockKind::TableRow)
            || self.attrs.get("is_table").map(|v| v == "true").unwrap_or(false)
    }

    pub fn mark_table(mut self) -> Self {
        self.attrs.insert("is_table".to_string(), "true".to_string());
        self
    }
}
