//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! The variants map directly onto how failures propagate: configuration and
//! parse errors abort an ingestion task, embedding errors are fatal during
//! ingestion but fall back to the original query during retrieval, and
//! store/index errors during enrichment drop the affected candidate rather
//! than failing the query.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required credential or setting is missing. Raised before any
    /// external call is made.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The source parser could not extract structured blocks.
    #[error("parse error: {0}")]
    Parse(String),

    /// No parser or reader handles this file extension.
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    /// The embedding collaborator failed after retries.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The vector index rejected an upsert, query, or delete.
    #[error("vector index error: {0}")]
    Index(String),

    /// The document store failed a lookup or write.
    #[error("store error: {0}")]
    Store(String),

    /// The LLM collaborator failed to produce a completion.
    #[error("llm error: {0}")]
    Llm(String),

    /// A split level at or beyond the configured number of chunk sizes was
    /// requested. This is a programming-contract violation, never clamped.
    #[error("split level {level} is out of range for {splitters} configured splitters")]
    LevelOutOfRange { level: usize, splitters: usize },
}
