//! Chunked upload engine
//!
//! Streams a payload of known size to one remote path as sequential chunks:
//! - Each chunk is tagged with its byte offset, or appended after the first
//! - Per-chunk retry with exponential backoff and jitter from the policy
//! - The task's offset only advances past chunks the filer accepted, so an
//!   interrupted task can be resumed with [`UploadTask::resume_at`]
//! - A source that ends before `total_size` is an error, never a truncated file

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::error::{TransferError, TransferResult};
use crate::options::WriteOptions;
use crate::policy::{should_retry, TransferPolicy};
use range_dl::ProgressReporter;

/// Default chunk size (10 MB)
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// How chunks after the first are positioned on the filer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeMode {
    /// Every chunk carries `offset=<n>`
    #[default]
    Offset,
    /// First chunk creates the file, later chunks carry `op=append`
    Append,
}

/// Where one write lands in the remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPosition {
    /// Plain write: creates or replaces the file
    Whole,
    Offset(u64),
    Append,
}

impl ChunkPosition {
    pub(crate) fn query_pair(self) -> Option<(&'static str, String)> {
        match self {
            ChunkPosition::Whole => None,
            ChunkPosition::Offset(offset) => Some(("offset", offset.to_string())),
            ChunkPosition::Append => Some(("op", "append".to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub destination: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub mode: ResumeMode,
    offset: u64,
}

impl UploadTask {
    pub fn new(destination: impl Into<String>, total_size: u64) -> Self {
        Self {
            destination: destination.into(),
            total_size,
            chunk_size: DEFAULT_CHUNK_SIZE,
            mode: ResumeMode::Offset,
            offset: 0,
        }
    }

    /// Zero selects the default chunk size.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        self
    }

    pub fn with_mode(mut self, mode: ResumeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Continue a task whose first `offset` bytes are already on the filer.
    /// The source handed to the uploader must start at that offset.
    pub fn resume_at(mut self, offset: u64) -> Self {
        self.offset = offset.min(self.total_size);
        self
    }

    /// Bytes accepted by the filer so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.offset)
    }

    pub fn is_complete(&self) -> bool {
        self.offset >= self.total_size
    }

    /// Chunks still to send.
    pub fn chunk_count(&self) -> u64 {
        self.remaining().div_ceil(self.chunk_size.max(1))
    }

    fn position(&self) -> ChunkPosition {
        match self.mode {
            ResumeMode::Offset => ChunkPosition::Offset(self.offset),
            ResumeMode::Append if self.offset == 0 => ChunkPosition::Whole,
            ResumeMode::Append => ChunkPosition::Append,
        }
    }
}

/// Destination for upload chunks.
pub trait ChunkSink: Send + Sync {
    fn write_chunk<'a>(
        &'a self,
        path: &'a str,
        chunk: Bytes,
        position: ChunkPosition,
        opts: &'a WriteOptions,
    ) -> BoxFuture<'a, TransferResult<()>>;
}

/// Sequential chunk uploader bound to one sink, policy and cancellation token.
pub struct ChunkedUploader<S: ChunkSink> {
    sink: S,
    policy: Arc<TransferPolicy>,
    cancel: CancellationToken,
    progress: Option<ProgressReporter>,
}

impl<S: ChunkSink> ChunkedUploader<S> {
    pub fn new(sink: S, policy: Arc<TransferPolicy>, cancel: CancellationToken) -> Self {
        Self {
            sink,
            policy,
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Upload the rest of `task` from `source`.
    ///
    /// `max_retry` defaults to the policy ceiling and is clamped to it. On
    /// failure `task.offset()` is the offset of the chunk that failed.
    pub async fn upload<R>(
        &self,
        task: &mut UploadTask,
        source: &mut R,
        max_retry: Option<u32>,
        opts: &WriteOptions,
    ) -> TransferResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let retries = self.policy.effective_retries(max_retry);
        let chunk_size = if task.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            task.chunk_size
        };
        let start_time = Instant::now();

        info!(
            "upload_start: {} total_bytes={} offset={} chunk_size={} mode={:?} retries={}",
            task.destination, task.total_size, task.offset, chunk_size, task.mode, retries
        );

        while task.offset < task.total_size {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let want = chunk_size.min(task.remaining()) as usize;
            let mut buffer = vec![0u8; want];
            let read = self
                .cancel
                .run_until_cancelled(read_full(source, &mut buffer))
                .await
                .ok_or(TransferError::Cancelled)?
                .map_err(TransferError::Source)?;
            if read == 0 {
                break;
            }
            buffer.truncate(read);

            self.send_chunk(task, Bytes::from(buffer), retries, opts)
                .await?;

            task.offset += read as u64;
            if let Some(progress) = &self.progress {
                progress.advance(read as u64);
            }
        }

        if task.offset < task.total_size {
            warn!(
                "upload_short_source: {} expected={} read={}",
                task.destination, task.total_size, task.offset
            );
            return Err(TransferError::ShortSource {
                expected: task.total_size,
                read: task.offset,
            });
        }

        info!(
            "upload_finish: {} total_bytes={} elapsed_ms={}",
            task.destination,
            task.total_size,
            start_time.elapsed().as_millis()
        );
        Ok(())
    }

    async fn send_chunk(
        &self,
        task: &UploadTask,
        chunk: Bytes,
        retries: u32,
        opts: &WriteOptions,
    ) -> TransferResult<()> {
        let position = task.position();
        let offset = task.offset;
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let result = self
                .cancel
                .run_until_cancelled(self.sink.write_chunk(
                    &task.destination,
                    chunk.clone(),
                    position,
                    opts,
                ))
                .await
                .ok_or(TransferError::Cancelled)?;

            let err = match result {
                Ok(()) => {
                    debug!(
                        "upload_chunk_done: {} offset={} bytes={} attempt={}",
                        task.destination,
                        offset,
                        chunk.len(),
                        attempt
                    );
                    return Ok(());
                }
                Err(e) if e.is_cancelled() => return Err(TransferError::Cancelled),
                Err(e) => e,
            };

            if !should_retry(&err) {
                warn!(
                    "upload_chunk_rejected: {} offset={} error={}",
                    task.destination, offset, err
                );
                return Err(TransferError::ChunkRejected {
                    offset,
                    source: Box::new(err),
                });
            }

            if attempt >= retries {
                warn!(
                    "upload_chunk_exhausted: {} offset={} retries={} error={}",
                    task.destination, offset, retries, err
                );
                return Err(TransferError::RetriesExhausted {
                    offset,
                    retries,
                    source: Box::new(err),
                });
            }

            let delay = self.policy.retry_delay(attempt);
            warn!(
                "upload_chunk_retry: {} offset={} attempt={} delay_ms={} error={}",
                task.destination,
                offset,
                attempt + 1,
                delay.as_millis(),
                err
            );
            self.cancel
                .run_until_cancelled(tokio::time::sleep(delay))
                .await
                .ok_or(TransferError::Cancelled)?;
            attempt += 1;
        }
    }
}

/// Fill `buf` from `source`, stopping early only at end of stream.
async fn read_full<R>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant as TokioInstant;

    #[test]
    fn shrunk_total_leaves_nothing_remaining() {
        let mut task = UploadTask::new("/f.bin", 100)
            .with_chunk_size(30)
            .resume_at(60);
        assert_eq!(task.remaining(), 40);
        assert_eq!(task.chunk_count(), 2);

        task.total_size = 50;
        assert_eq!(task.remaining(), 0);
        assert_eq!(task.chunk_count(), 0);
        assert!(task.is_complete());
    }

    /// Records every call; the first `fail_first` calls return `fail_status`.
    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(ChunkPosition, usize, TokioInstant)>>,
        fail_first: usize,
        fail_status: u16,
    }

    impl RecordingSink {
        fn failing(times: usize, status: u16) -> Self {
            Self {
                fail_first: times,
                fail_status: status,
                ..Self::default()
            }
        }

        fn positions(&self) -> Vec<ChunkPosition> {
            self.calls.lock().unwrap().iter().map(|c| c.0).collect()
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl ChunkSink for &RecordingSink {
        fn write_chunk<'a>(
            &'a self,
            _path: &'a str,
            chunk: Bytes,
            position: ChunkPosition,
            _opts: &'a WriteOptions,
        ) -> BoxFuture<'a, TransferResult<()>> {
            Box::pin(async move {
                let mut calls = self.calls.lock().unwrap();
                calls.push((position, chunk.len(), TokioInstant::now()));
                if calls.len() <= self.fail_first {
                    return Err(TransferError::Status {
                        op: "upload",
                        status: self.fail_status,
                        body: String::new(),
                    });
                }
                Ok(())
            })
        }
    }

    fn policy() -> Arc<TransferPolicy> {
        Arc::new(
            TransferPolicy::default()
                .with_backoff(Duration::from_millis(100), Duration::from_secs(5))
                .with_jitter(false),
        )
    }

    #[tokio::test]
    async fn offset_mode_tags_every_chunk() {
        let sink = RecordingSink::default();
        let uploader = ChunkedUploader::new(&sink, policy(), CancellationToken::new());
        let data = vec![7u8; 60];
        let mut task = UploadTask::new("/a/b.bin", 60).with_chunk_size(25);

        uploader
            .upload(&mut task, &mut data.as_slice(), None, &WriteOptions::default())
            .await
            .unwrap();

        assert_eq!(
            sink.positions(),
            vec![
                ChunkPosition::Offset(0),
                ChunkPosition::Offset(25),
                ChunkPosition::Offset(50)
            ]
        );
        let sizes: Vec<_> = sink.calls.lock().unwrap().iter().map(|c| c.1).collect();
        assert_eq!(sizes, vec![25, 25, 10]);
        assert_eq!(task.offset(), 60);
    }

    #[tokio::test]
    async fn append_mode_leaves_first_chunk_untagged() {
        let sink = RecordingSink::default();
        let uploader = ChunkedUploader::new(&sink, policy(), CancellationToken::new());
        let data = vec![1u8; 50];
        let mut task = UploadTask::new("/log", 50)
            .with_chunk_size(20)
            .with_mode(ResumeMode::Append);

        uploader
            .upload(&mut task, &mut data.as_slice(), None, &WriteOptions::default())
            .await
            .unwrap();

        assert_eq!(
            sink.positions(),
            vec![
                ChunkPosition::Whole,
                ChunkPosition::Append,
                ChunkPosition::Append
            ]
        );
    }

    #[tokio::test]
    async fn empty_payload_sends_nothing() {
        let sink = RecordingSink::default();
        let uploader = ChunkedUploader::new(&sink, policy(), CancellationToken::new());
        let mut task = UploadTask::new("/empty", 0);

        uploader
            .upload(&mut task, &mut &b""[..], None, &WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(sink.call_count(), 0);
    }

    #[tokio::test]
    async fn short_source_is_an_error_after_partial_chunks() {
        let sink = RecordingSink::default();
        let uploader = ChunkedUploader::new(&sink, policy(), CancellationToken::new());
        let data = vec![3u8; 60];
        let mut task = UploadTask::new("/short", 100).with_chunk_size(25);

        let err = uploader
            .upload(&mut task, &mut data.as_slice(), None, &WriteOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::ShortSource {
                expected: 100,
                read: 60
            }
        ));
        assert_eq!(sink.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_with_growing_delays() {
        let sink = RecordingSink::failing(3, 503);
        let uploader = ChunkedUploader::new(&sink, policy(), CancellationToken::new());
        let data = vec![9u8; 10];
        let mut task = UploadTask::new("/retry", 10).with_chunk_size(10);

        uploader
            .upload(&mut task, &mut data.as_slice(), Some(3), &WriteOptions::default())
            .await
            .unwrap();

        let times: Vec<_> = sink.calls.lock().unwrap().iter().map(|c| c.2).collect();
        assert_eq!(times.len(), 4);
        let gaps: Vec<_> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|g| g[1] > g[0]), "gaps: {:?}", gaps);
        assert!(gaps[0] >= Duration::from_millis(100));
        assert!(gaps[2] >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_offset() {
        let sink = RecordingSink::failing(usize::MAX, 500);
        let uploader = ChunkedUploader::new(&sink, policy(), CancellationToken::new());
        let data = vec![9u8; 30];
        let mut task = UploadTask::new("/down", 30).with_chunk_size(10);

        // Ceiling is 3; a request for 10 is clamped
        let err = uploader
            .upload(&mut task, &mut data.as_slice(), Some(10), &WriteOptions::default())
            .await
            .unwrap_err();

        match err {
            TransferError::RetriesExhausted {
                offset, retries, ..
            } => {
                assert_eq!(offset, 0);
                assert_eq!(retries, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(sink.call_count(), 4);
        assert_eq!(task.offset(), 0);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let sink = RecordingSink::failing(usize::MAX, 403);
        let uploader = ChunkedUploader::new(&sink, policy(), CancellationToken::new());
        let data = vec![0u8; 10];
        let mut task = UploadTask::new("/denied", 10);

        let err = uploader
            .upload(&mut task, &mut data.as_slice(), None, &WriteOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::ChunkRejected { offset: 0, .. }));
        assert_eq!(err.status(), Some(403));
        assert_eq!(sink.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_further_attempts() {
        let sink = RecordingSink::failing(usize::MAX, 503);
        let slow = Arc::new(
            TransferPolicy::default()
                .with_backoff(Duration::from_secs(1), Duration::from_secs(5))
                .with_jitter(false),
        );
        let cancel = CancellationToken::new();
        let uploader = ChunkedUploader::new(&sink, slow, cancel.clone());
        let data = vec![0u8; 10];
        let mut task = UploadTask::new("/cancel", 10);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = uploader
            .upload(&mut task, &mut data.as_slice(), None, &WriteOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Cancelled));
        assert_eq!(sink.call_count(), 1);
    }

    #[tokio::test]
    async fn resumed_task_starts_at_offset() {
        let sink = RecordingSink::default();
        let uploader = ChunkedUploader::new(&sink, policy(), CancellationToken::new());
        let rest = vec![5u8; 40];
        let mut task = UploadTask::new("/resume", 100)
            .with_chunk_size(20)
            .resume_at(60);
        assert_eq!(task.chunk_count(), 2);

        let (reporter, rx) = ProgressReporter::new(40);
        let uploader = uploader.with_progress(reporter);
        uploader
            .upload(&mut task, &mut rest.as_slice(), None, &WriteOptions::default())
            .await
            .unwrap();

        assert_eq!(
            sink.positions(),
            vec![ChunkPosition::Offset(60), ChunkPosition::Offset(80)]
        );
        assert_eq!(rx.borrow().done, 40);
    }
}
