//! Client-side transfer engine for SeaweedFS filers
//!
//! - Chunked uploads with per-chunk retry, backoff and resume
//! - Concurrent range downloads with per-part outcomes (`range-dl`)
//! - Paginated listings guarded against stalled cursors and runaway paging
//! - Recursive directory usage and batch deletes
//!
//! Every long-running call takes a `CancellationToken`; cancelling it stops
//! new requests and surfaces `TransferError::Cancelled`.

pub mod config;
pub mod error;
pub mod filer;
pub mod listing;
pub mod local;
pub mod options;
pub mod path;
pub mod policy;
pub mod upload;
pub mod usage;

pub use config::ClientConfig;
pub use error::{TransferError, TransferResult};
pub use filer::{Entry, FilerClient, FilerRangeSource, ListPage, Stat};
pub use listing::{ListPager, ListWalker};
pub use options::{DeleteOptions, ListOptions, WriteMethod, WriteOptions};
pub use policy::{should_retry, TransferPolicy};
pub use upload::{ChunkPosition, ChunkSink, ChunkedUploader, ResumeMode, UploadTask};
pub use usage::{dir_usage, DirUsage};

pub use range_dl::{
    merge_parts, ByteRange, DownloadReport, Progress, ProgressReporter, RangeError,
};
pub use tokio_util::sync::CancellationToken;
