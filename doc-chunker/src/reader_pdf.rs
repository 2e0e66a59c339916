//! Dispatches to whichever PDF backend is compiled in. `pure-pdf` (via
//! `lopdf`) is the default backend; with the feature off a stub block keeps
//! the pipeline total instead of panicking. A prior `pdfium` backend was
//! dropped — see DESIGN.md — since vendoring the pdfium native library is
//! out of scope for this core and `lopdf` already satisfies the parser
//! contract for plain-text PDFs.

use crate::unified_blocks::{BlockKind, UnifiedBlock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfBackend {
    PureRust,
    Stub,
}

pub fn default_backend() -> PdfBackend {
    if cfg!(feature = "pure-pdf") {
        PdfBackend::PureRust
    } else {
        PdfBackend::Stub
    }
}

pub fn read_pdf_to_blocks(path: &str) -> Vec<UnifiedBlock> {
    #[cfg(feature = "pure-pdf")]
    {
        return crate::reader_pdf_pure::read_pdf_to_blocks_pure(path);
    }
    #[cfg(not(feature = "pure-pdf"))]
    {
        vec![UnifiedBlock::new(BlockKind::Paragraph, "(stub) no PDF backend compiled in", 0, path, "stub.pdf")]
    }
}
