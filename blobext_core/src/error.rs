use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::compress::CompressionType;

/// Result alias used throughout the blobext crates.
pub type Result<T> = std::result::Result<T, ShortenError>;

/// Coarse classification of a [`ShortenError`].
///
/// The pipeline treats data and backend failures alike (both are row-scoped),
/// but callers inspecting a failure can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid settings, reported before any row is processed.
    Config,
    /// A single row carries a malformed blob or identifier.
    Data,
    /// The blob store or compressor failed for a row.
    Backend,
    /// The input or output record stream is malformed or failed.
    Stream,
    /// The run was cancelled from outside.
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ShortenError {
    #[error("invalid configuration: {}", problems.join("; "))]
    InvalidConfig { problems: Vec<String> },

    #[error("unknown compress type '{0}' (expected one of: none, gzip, bzip2)")]
    InvalidCompressionType(String),

    #[error("unsupported compress type '{0}'")]
    UnsupportedCompressionType(CompressionType),

    #[error("invalid compression level {level} for {kind} (expected 0..=9)")]
    InvalidCompressionLevel { kind: CompressionType, level: u32 },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("schema source {path:?} exceeds the {limit} byte limit")]
    SchemaTooLarge { path: PathBuf, limit: u64 },

    #[error("cannot read schema source {path:?}: {source}")]
    SchemaSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("blob field '{field}' not found")]
    BlobFieldMissing { field: String },

    #[error("blob field '{field}' holds {found}, not bytes")]
    InvalidBlobType { field: String, found: &'static str },

    #[error("blob id field '{field}' not found")]
    IdentifierFieldMissing { field: String },

    #[error("invalid blob id: {0}")]
    InvalidIdentifier(String),

    #[error("row does not match schema '{schema}': {reason}")]
    SchemaMismatch { schema: String, reason: String },

    #[error("failed to store blob at {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("compression failed: {0}")]
    Compression(#[source] io::Error),

    #[error("malformed record stream: {0}")]
    Decode(String),

    #[error("failed to encode record: {0}")]
    Encode(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl ShortenError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig { .. }
            | Self::InvalidCompressionType(_)
            | Self::UnsupportedCompressionType(_)
            | Self::InvalidCompressionLevel { .. }
            | Self::InvalidSchema(_)
            | Self::SchemaTooLarge { .. }
            | Self::SchemaSource { .. } => ErrorKind::Config,
            Self::BlobFieldMissing { .. }
            | Self::InvalidBlobType { .. }
            | Self::IdentifierFieldMissing { .. }
            | Self::InvalidIdentifier(_)
            | Self::SchemaMismatch { .. } => ErrorKind::Data,
            Self::Storage { .. } | Self::Compression(_) => ErrorKind::Backend,
            Self::Decode(_) | Self::Encode(_) | Self::Io(_) => ErrorKind::Stream,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Row-scoped failures: the row can be dropped and the run continued.
    pub fn is_row_scoped(&self) -> bool {
        matches!(self.kind(), ErrorKind::Data | ErrorKind::Backend)
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub(crate) fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub(crate) fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidIdentifier(msg.into())
    }
}
