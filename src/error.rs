//! Error taxonomy for the ingestion pipeline.
//!
//! Every stage returns [`IngestError`]. The orchestrator in [`crate::ingest`]
//! catches all of them and turns them into a `FAILED` status write, so none
//! of these reach an end user directly.

use thiserror::Error;

/// Errors produced by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The uploaded file is not a valid PDF/EPUB container.
    #[error("parse error: {0}")]
    Parse(String),

    /// The file exceeds the plan's byte-size ceiling.
    #[error("payload too large: {size} bytes exceeds plan limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    /// The file has more pages (or EPUB chunks) than the plan allows.
    #[error("too many units: {count} exceeds plan limit of {limit}")]
    TooManyUnits { count: usize, limit: usize },

    /// Embedding or vector-store failure while indexing.
    #[error("index error: {0}")]
    Index(String),

    /// Network failure while downloading the file or calling a remote API.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Relational store failure.
    #[error("store error: {0}")]
    Store(String),

    /// The file name does not map to a supported format.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl IngestError {
    /// Short stage label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Parse(_) => "parse",
            IngestError::PayloadTooLarge { .. } => "payload_too_large",
            IngestError::TooManyUnits { .. } => "too_many_units",
            IngestError::Index(_) => "index",
            IngestError::TransientIo(_) => "transient_io",
            IngestError::Store(_) => "store",
            IngestError::UnsupportedFormat(_) => "unsupported_format",
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        IngestError::TransientIo(err.to_string())
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Store(err.to_string())
    }
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        IngestError::TransientIo(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
