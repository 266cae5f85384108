//! Error types for range downloads.

use std::path::PathBuf;

/// Errors produced while downloading a payload or one of its ranges.
#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    #[error("download cancelled")]
    Cancelled,

    #[error("remote object not found: {0}")]
    NotFound(String),

    #[error("unexpected status {status} for {}", describe_range(.range))]
    Status {
        status: u16,
        range: Option<(u64, u64)>,
        body: String,
    },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("range {start}-{end} returned {received} bytes, expected {expected}")]
    LengthMismatch {
        start: u64,
        end: u64,
        expected: u64,
        received: u64,
    },

    #[error("invalid range: start={start} end={end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("could not determine remote size: {0}")]
    UnknownSize(String),

    #[error("range worker failed: {0}")]
    Worker(String),
}

impl RangeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RangeError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true when the failure came from the cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RangeError::Cancelled)
    }

    /// HTTP status carried by the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            RangeError::Status { status, .. } => Some(*status),
            RangeError::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

fn describe_range(range: &Option<(u64, u64)>) -> String {
    match range {
        Some((start, end)) => format!("bytes={}-{}", start, end),
        None => "full body".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::RangeError;

    #[test]
    fn status_error_names_the_range() {
        let err = RangeError::Status {
            status: 500,
            range: Some((10, 19)),
            body: String::new(),
        };
        assert_eq!(err.to_string(), "unexpected status 500 for bytes=10-19");
        assert_eq!(err.status(), Some(500));

        let err = RangeError::Status {
            status: 403,
            range: None,
            body: String::new(),
        };
        assert_eq!(err.to_string(), "unexpected status 403 for full body");
    }

    #[test]
    fn only_cancelled_reports_cancelled() {
        assert!(RangeError::Cancelled.is_cancelled());
        assert!(!RangeError::NotFound("/x".into()).is_cancelled());
    }
}
