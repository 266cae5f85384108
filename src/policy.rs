//! Transfer policy and retry classification
//!
//! One policy is created per client and shared read-only. It bounds:
//! - Retries per upload chunk and the exponential backoff between them
//! - Concurrent range workers per download
//! - Pages fetched per listing, and the page size requested
//! - Concurrent directory listings during usage aggregation

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{TransferError, TransferResult};

/// Default retries per upload chunk
pub const DEFAULT_UPLOAD_MAX_RETRY: u32 = 3;
/// Default first backoff step (200 ms)
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(200);
/// Default backoff ceiling (5 s)
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DOWNLOAD_CHUNKS: usize = range_dl::DEFAULT_MAX_CHUNKS;
pub const DEFAULT_MAX_LIST_PAGES: usize = 1000;
pub const DEFAULT_LIST_PAGE_SIZE: usize = 100;
pub const DEFAULT_USAGE_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferPolicy {
    pub upload_max_retry: u32,
    #[serde(rename = "backoff_base_ms", with = "millis")]
    pub backoff_base: Duration,
    #[serde(rename = "backoff_max_ms", with = "millis")]
    pub backoff_max: Duration,
    pub max_download_chunks: usize,
    pub max_list_pages: usize,
    pub list_page_size: usize,
    pub usage_concurrency: usize,
    /// Scale each backoff step by a random factor in `[0.5, 1.0]`.
    pub jitter: bool,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            upload_max_retry: DEFAULT_UPLOAD_MAX_RETRY,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
            max_download_chunks: DEFAULT_MAX_DOWNLOAD_CHUNKS,
            max_list_pages: DEFAULT_MAX_LIST_PAGES,
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
            usage_concurrency: DEFAULT_USAGE_CONCURRENCY,
            jitter: true,
        }
    }
}

impl TransferPolicy {
    pub fn with_upload_max_retry(mut self, retries: u32) -> Self {
        self.upload_max_retry = retries;
        self
    }

    /// Zero durations leave the current value in place; `max` is raised to `base` if needed.
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        if !base.is_zero() {
            self.backoff_base = base;
        }
        if !max.is_zero() {
            self.backoff_max = max;
        }
        if self.backoff_max < self.backoff_base {
            self.backoff_max = self.backoff_base;
        }
        self
    }

    pub fn with_max_download_chunks(mut self, chunks: usize) -> Self {
        if chunks > 0 {
            self.max_download_chunks = chunks;
        }
        self
    }

    pub fn with_max_list_pages(mut self, pages: usize) -> Self {
        if pages > 0 {
            self.max_list_pages = pages;
        }
        self
    }

    pub fn with_list_page_size(mut self, size: usize) -> Self {
        if size > 0 {
            self.list_page_size = size;
        }
        self
    }

    pub fn with_usage_concurrency(mut self, units: usize) -> Self {
        if units > 0 {
            self.usage_concurrency = units;
        }
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Reject values a hand-written or deserialised policy could carry.
    pub fn validate(&self) -> TransferResult<()> {
        if self.backoff_base.is_zero() {
            return Err(TransferError::InvalidPolicy(
                "backoff_base must be positive".into(),
            ));
        }
        if self.backoff_max < self.backoff_base {
            return Err(TransferError::InvalidPolicy(format!(
                "backoff_max ({:?}) is below backoff_base ({:?})",
                self.backoff_max, self.backoff_base
            )));
        }
        for (name, value) in [
            ("max_download_chunks", self.max_download_chunks),
            ("max_list_pages", self.max_list_pages),
            ("list_page_size", self.list_page_size),
            ("usage_concurrency", self.usage_concurrency),
        ] {
            if value == 0 {
                return Err(TransferError::InvalidPolicy(format!(
                    "{} must be at least 1",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Caller-requested retries, clamped to the policy ceiling.
    pub fn effective_retries(&self, requested: Option<u32>) -> u32 {
        requested
            .map(|r| r.min(self.upload_max_retry))
            .unwrap_or(self.upload_max_retry)
    }

    /// `min(base * 2^attempt, max)` without jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.backoff_base.checked_mul(factor))
            .map(|d| d.min(self.backoff_max))
            .unwrap_or(self.backoff_max)
    }

    /// Delay to sleep before retry number `attempt + 1`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        if !self.jitter {
            return delay;
        }
        let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        delay.mul_f64(factor)
    }
}

/// Whether an upload failure is worth another attempt.
///
/// Cancellation and local or terminal failures never retry. Client errors
/// retry only for 408 and 429. Transport failures and anything else from the
/// server do.
pub fn should_retry(err: &TransferError) -> bool {
    match err {
        TransferError::Cancelled => false,
        TransferError::Status { status, .. } => retryable_status(*status),
        TransferError::Network(e) => {
            if e.is_builder() {
                return false;
            }
            e.status()
                .map(|s| retryable_status(s.as_u16()))
                .unwrap_or(true)
        }
        TransferError::Range(e) => match e {
            range_dl::RangeError::Cancelled
            | range_dl::RangeError::NotFound(_)
            | range_dl::RangeError::Io { .. }
            | range_dl::RangeError::InvalidRange { .. } => false,
            other => other.status().map(retryable_status).unwrap_or(true),
        },
        TransferError::Io { .. }
        | TransferError::Source(_)
        | TransferError::NotFound(_)
        | TransferError::ShortSource { .. }
        | TransferError::PaginationStalled { .. }
        | TransferError::PageLimitExceeded { .. }
        | TransferError::ChunkRejected { .. }
        | TransferError::RetriesExhausted { .. }
        | TransferError::Worker(_)
        | TransferError::InvalidPolicy(_)
        | TransferError::Config(_) => false,
        TransferError::Decode(_) => true,
    }
}

fn retryable_status(status: u16) -> bool {
    if (400..500).contains(&status) {
        return status == 408 || status == 429;
    }
    true
}

/// Durations as integer milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
