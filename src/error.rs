//! Error type shared by every filer operation.

use std::path::PathBuf;

use range_dl::RangeError;

pub type TransferResult<T> = Result<T, TransferError>;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("{op} failed with status {status}: {body}")]
    Status {
        op: &'static str,
        status: u16,
        body: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reading upload source failed: {0}")]
    Source(#[source] std::io::Error),

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("listing {dir} stalled: cursor {cursor:?} repeated after {pages} pages")]
    PaginationStalled {
        dir: String,
        cursor: String,
        pages: usize,
    },

    #[error("listing {dir} exceeded {limit} pages")]
    PageLimitExceeded { dir: String, limit: usize },

    #[error("chunk at offset {offset} rejected: {source}")]
    ChunkRejected {
        offset: u64,
        #[source]
        source: Box<TransferError>,
    },

    #[error("chunk at offset {offset} failed after {retries} retries: {source}")]
    RetriesExhausted {
        offset: u64,
        retries: u32,
        #[source]
        source: Box<TransferError>,
    },

    #[error("source ended early: read {read} of {expected} bytes")]
    ShortSource { expected: u64, read: u64 },

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("config error: {0}")]
    Config(String),
}

impl TransferError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TransferError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the cancellation signal, including a cancelled range worker.
    pub fn is_cancelled(&self) -> bool {
        match self {
            TransferError::Cancelled => true,
            TransferError::Range(e) => e.is_cancelled(),
            _ => false,
        }
    }

    /// HTTP status attached to the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransferError::Status { status, .. } => Some(*status),
            TransferError::Network(e) => e.status().map(|s| s.as_u16()),
            TransferError::Range(e) => e.status(),
            TransferError::ChunkRejected { source, .. }
            | TransferError::RetriesExhausted { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Offset of the chunk an upload stopped at.
    pub fn failed_offset(&self) -> Option<u64> {
        match self {
            TransferError::ChunkRejected { offset, .. }
            | TransferError::RetriesExhausted { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}
