use thiserror::Error;

/// §4.A/§4.B failure modes. Parsing never partial-commits: on `Parse` the
/// caller has no blocks to chunk at all.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("failed to parse {file}: {cause}")]
    Parse { file: String, cause: String },
    #[error("unsupported file extension for {file}")]
    UnsupportedFormat { file: String },
    #[error("document produced zero chunks")]
    Empty,
    #[error("chunk exceeded hard cap of {cap} characters ({actual} actual)")]
    OversizedChunk { cap: usize, actual: usize },
}
