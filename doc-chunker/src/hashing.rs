//! Content addressing for §3's `doc_id`/`content_hash`: canonicalise the
//! parsed text (NFC-equivalent for our ASCII/CJK inputs, LF line endings,
//! trimmed trailing whitespace per line) then digest with `blake3`, the
//! hash crate the teacher pipeline already carried for file fingerprints.

use rag_model::DocId;

fn canonicalize(content: &str) -> String {
    content
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full hex digest, stored verbatim as `Document::content_hash`.
pub fn content_hash(content: &str) -> String {
    blake3::hash(canonicalize(content).as_bytes()).to_hex().to_string()
}

/// `doc_id` is the first 16 hex chars of the content hash (§3).
pub fn doc_id_for(content: &str) -> DocId {
    let full = content_hash(content);
    DocId(full[..16].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_hashes_identically_regardless_of_line_endings() {
        let a = "第一条 内容。\n第二条 内容。";
        let b = "第一条 内容。\r\n第二条 内容。\r\n";
        assert_eq!(content_hash(a), content_hash(b.trim_end()));
    }

    #[test]
    fn doc_id_is_sixteen_hex_chars() {
        let id = doc_id_for("任意内容");
        assert_eq!(id.as_str().len(), 16);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn trailing_whitespace_per_line_does_not_change_hash() {
        let a = "第一条 内容。";
        let b = "第一条 内容。   ";
        assert_eq!(content_hash(a), content_hash(b));
    }
}
