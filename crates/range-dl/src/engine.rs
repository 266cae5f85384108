//! Download engine: plans ranges, runs one worker per range, collects outcomes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::RangeError;
use crate::plan::{part_path, plan_ranges, ByteRange, RangePlan};
use crate::progress::ProgressReporter;
use crate::source::{BodyStream, RangeSource};
use crate::{DEFAULT_MAX_CHUNKS, MIN_SPLIT_SIZE};

/// Write buffer size for downloads (2 MB) - reduces I/O operations
const WRITE_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Limits applied when planning a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    pub max_chunks: usize,
    pub min_split_size: u64,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            max_chunks: DEFAULT_MAX_CHUNKS,
            min_split_size: MIN_SPLIT_SIZE,
        }
    }
}

/// Per-output results of one download call.
///
/// Holds exactly one entry per output file: the destination itself for a single
/// request, otherwise one entry per `<dest>.part<i>`.
#[derive(Debug)]
pub struct DownloadReport {
    pub total_size: u64,
    outputs: BTreeMap<PathBuf, Result<(), RangeError>>,
    parts: Vec<(ByteRange, PathBuf)>,
}

impl DownloadReport {
    fn single(dest: &Path, total_size: u64, result: Result<(), RangeError>) -> Self {
        let mut outputs = BTreeMap::new();
        outputs.insert(dest.to_path_buf(), result);
        Self {
            total_size,
            outputs,
            parts: Vec::new(),
        }
    }

    pub fn outcomes(&self) -> &BTreeMap<PathBuf, Result<(), RangeError>> {
        &self.outputs
    }

    pub fn into_outcomes(self) -> BTreeMap<PathBuf, Result<(), RangeError>> {
        self.outputs
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// True when the payload was split into part files.
    pub fn is_split(&self) -> bool {
        !self.parts.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.outputs.values().all(|r| r.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&PathBuf, &RangeError)> {
        self.outputs
            .iter()
            .filter_map(|(path, r)| r.as_ref().err().map(|e| (path, e)))
    }

    /// Part files in range order, ready for [`merge_parts`](crate::merge_parts).
    pub fn part_paths(&self) -> Vec<PathBuf> {
        self.parts.iter().map(|(_, p)| p.clone()).collect()
    }

    /// Ranges whose output failed, for targeted re-download with
    /// [`RangeDownloader::fetch_range`].
    pub fn failed_ranges(&self) -> Vec<(ByteRange, PathBuf)> {
        self.parts
            .iter()
            .filter(|(_, path)| matches!(self.outputs.get(path), Some(Err(_))))
            .cloned()
            .collect()
    }
}

/// Downloads one remote payload, splitting it into concurrent range requests
/// when it is large enough.
pub struct RangeDownloader<S: RangeSource> {
    source: Arc<S>,
    options: DownloadOptions,
    cancel: CancellationToken,
    progress: Option<ProgressReporter>,
}

impl<S: RangeSource> RangeDownloader<S> {
    pub fn new(source: Arc<S>, cancel: CancellationToken) -> Self {
        Self {
            source,
            options: DownloadOptions::default(),
            cancel,
            progress: None,
        }
    }

    pub fn with_options(mut self, options: DownloadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Download into `dest`, or into `dest.part0..N` when split.
    ///
    /// Never fails as a whole: every output gets its own outcome, and a failed
    /// range does not stop its siblings.
    pub async fn download(&self, dest: &Path, requested_chunks: usize) -> DownloadReport {
        let label = self.source.describe();

        let total_size = match self
            .cancel
            .run_until_cancelled(self.source.total_size())
            .await
        {
            Some(Ok(size)) => size,
            Some(Err(e)) => {
                warn!("range_download_size_failed: {} error={}", label, e);
                return DownloadReport::single(dest, 0, Err(e));
            }
            None => return DownloadReport::single(dest, 0, Err(RangeError::Cancelled)),
        };

        if let Some(progress) = &self.progress {
            progress.set_total(total_size);
        }

        let plan = plan_ranges(
            total_size,
            requested_chunks,
            self.options.max_chunks,
            self.options.min_split_size,
        );

        let ranges = match plan {
            RangePlan::Single => {
                info!(
                    "range_download_single: {} total_bytes={} requested_chunks={}",
                    label, total_size, requested_chunks
                );
                let result = self.download_single(dest, total_size).await;
                return DownloadReport::single(dest, total_size, result);
            }
            RangePlan::Split(ranges) => ranges,
        };

        info!(
            "range_download_start: {} total_bytes={} chunks={}",
            label,
            total_size,
            ranges.len()
        );
        let start_time = Instant::now();

        let mut outputs = BTreeMap::new();
        let mut parts = Vec::with_capacity(ranges.len());
        let mut handles = Vec::with_capacity(ranges.len());

        let parent_error = create_parent(dest).await.err();
        if let Some(e) = &parent_error {
            warn!("range_download_parent_failed: {} error={}", label, e);
        }

        for range in ranges {
            let output = part_path(dest, range.index);
            parts.push((range, output.clone()));

            if let Some(RangeError::Io { path, source }) = &parent_error {
                let source = std::io::Error::new(source.kind(), source.to_string());
                outputs.insert(output, Err(RangeError::io(path, source)));
                continue;
            }

            // No new workers once cancelled
            if self.cancel.is_cancelled() {
                outputs.insert(output, Err(RangeError::Cancelled));
                continue;
            }

            let source = self.source.clone();
            let cancel = self.cancel.clone();
            let progress = self.progress.clone();
            let worker_output = output.clone();
            let handle = tokio::spawn(async move {
                run_range(source, range, &worker_output, &cancel, progress.as_ref()).await
            });
            handles.push((output, handle));
        }

        let results = join_all(
            handles
                .into_iter()
                .map(|(output, handle)| async move { (output, handle.await) }),
        )
        .await;

        for (output, joined) in results {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(RangeError::Worker(e.to_string())),
            };
            outputs.insert(output, result);
        }

        let failed = outputs.values().filter(|r| r.is_err()).count();
        info!(
            "range_download_finish: {} chunks={} failed={} elapsed_ms={}",
            label,
            outputs.len(),
            failed,
            start_time.elapsed().as_millis()
        );

        DownloadReport {
            total_size,
            outputs,
            parts,
        }
    }

    /// Re-run a single range into `output`.
    pub async fn fetch_range(&self, range: ByteRange, output: &Path) -> Result<(), RangeError> {
        run_range(
            self.source.clone(),
            range,
            output,
            &self.cancel,
            self.progress.as_ref(),
        )
        .await
    }

    async fn download_single(&self, dest: &Path, total_size: u64) -> Result<(), RangeError> {
        if self.cancel.is_cancelled() {
            return Err(RangeError::Cancelled);
        }

        let body = self
            .cancel
            .run_until_cancelled(self.source.open(None))
            .await
            .ok_or(RangeError::Cancelled)??;

        create_parent(dest).await?;

        let mut received = 0;
        let written =
            write_body(body, dest, &self.cancel, self.progress.as_ref(), &mut received).await;
        let result = match written {
            Ok(()) if received != total_size => Err(RangeError::LengthMismatch {
                start: 0,
                end: total_size.saturating_sub(1),
                expected: total_size,
                received,
            }),
            other => other,
        };
        if result.is_err() {
            withdraw(self.progress.as_ref(), received);
        }
        result
    }
}

async fn create_parent(dest: &Path) -> Result<(), RangeError> {
    match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| RangeError::io(parent, e)),
        _ => Ok(()),
    }
}

/// Take back bytes reported for output that was not kept.
fn withdraw(progress: Option<&ProgressReporter>, bytes: u64) {
    if let (Some(p), true) = (progress, bytes > 0) {
        p.retract(bytes);
    }
}

/// One worker: request the range, then stream it into its own output file.
async fn run_range<S: RangeSource>(
    source: Arc<S>,
    range: ByteRange,
    output: &Path,
    cancel: &CancellationToken,
    progress: Option<&ProgressReporter>,
) -> Result<(), RangeError> {
    if cancel.is_cancelled() {
        return Err(RangeError::Cancelled);
    }

    let end = range.end().ok_or(RangeError::InvalidRange {
        start: range.start,
        end: range.start,
    })?;
    let timer = Instant::now();
    debug!(
        "range_part_start: {} part={} range={}..={}",
        source.describe(),
        range.index,
        range.start,
        end
    );

    let body = cancel
        .run_until_cancelled(source.open(Some(range)))
        .await
        .ok_or(RangeError::Cancelled)??;

    if cancel.is_cancelled() {
        return Err(RangeError::Cancelled);
    }

    let mut received = 0;
    let written = write_body(body, output, cancel, progress, &mut received).await;
    let result = match written {
        Ok(()) if received != range.len => Err(RangeError::LengthMismatch {
            start: range.start,
            end,
            expected: range.len,
            received,
        }),
        other => other,
    };
    if let Err(e) = result {
        withdraw(progress, received);
        return Err(e);
    }

    debug!(
        "range_part_done: {} part={} bytes={} elapsed_ms={}",
        source.describe(),
        range.index,
        received,
        timer.elapsed().as_millis()
    );
    Ok(())
}

/// Stream `body` into a freshly created file at `path`.
///
/// `written` counts the bytes flushed and reported to `progress`, also when
/// an error cuts the stream short.
async fn write_body(
    mut body: BodyStream,
    path: &Path,
    cancel: &CancellationToken,
    progress: Option<&ProgressReporter>,
    written: &mut u64,
) -> Result<(), RangeError> {
    let mut file = File::create(path)
        .await
        .map_err(|e| RangeError::io(path, e))?;

    let mut write_buffer: Vec<u8> = Vec::with_capacity(WRITE_BUFFER_SIZE);

    loop {
        let next = match cancel.run_until_cancelled(body.next()).await {
            Some(next) => next,
            None => {
                drop(file);
                let _ = tokio::fs::remove_file(path).await;
                return Err(RangeError::Cancelled);
            }
        };

        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;
        write_buffer.extend_from_slice(&chunk);

        if write_buffer.len() >= WRITE_BUFFER_SIZE {
            file.write_all(&write_buffer)
                .await
                .map_err(|e| RangeError::io(path, e))?;
            *written += write_buffer.len() as u64;
            if let Some(p) = progress {
                p.advance(write_buffer.len() as u64);
            }
            write_buffer.clear();
        }
    }

    if !write_buffer.is_empty() {
        file.write_all(&write_buffer)
            .await
            .map_err(|e| RangeError::io(path, e))?;
        *written += write_buffer.len() as u64;
        if let Some(p) = progress {
            p.advance(write_buffer.len() as u64);
        }
    }

    file.flush().await.map_err(|e| RangeError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::future::BoxFuture;
    use futures_util::stream;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory source. The range starting at `fail_start` returns 500, the
    /// one at `short_once` drops its last byte on the first open, and the one
    /// at `stall_start` never finishes its body.
    struct MemorySource {
        data: Vec<u8>,
        fail_start: Option<u64>,
        short_once: Option<u64>,
        stall_start: Option<u64>,
        shortened: AtomicBool,
        opens: AtomicUsize,
    }

    impl MemorySource {
        fn new(data: Vec<u8>) -> Self {
            Self {
                data,
                fail_start: None,
                short_once: None,
                stall_start: None,
                shortened: AtomicBool::new(false),
                opens: AtomicUsize::new(0),
            }
        }
    }

    impl RangeSource for MemorySource {
        fn total_size(&self) -> BoxFuture<'_, Result<u64, RangeError>> {
            let size = self.data.len() as u64;
            Box::pin(async move { Ok(size) })
        }

        fn open(&self, range: Option<ByteRange>) -> BoxFuture<'_, Result<BodyStream, RangeError>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let (start, len) = match range {
                    Some(r) => (r.start, r.len),
                    None => (0, self.data.len() as u64),
                };
                if self.fail_start == Some(start) {
                    return Err(RangeError::Status {
                        status: 500,
                        range: range.and_then(|r| r.end().map(|e| (r.start, e))),
                        body: String::new(),
                    });
                }
                let mut end = start + len;
                if self.short_once == Some(start) && !self.shortened.swap(true, Ordering::SeqCst)
                {
                    end -= 1;
                }
                let slice = self.data[start as usize..end as usize].to_vec();
                // Split into small pieces to exercise the buffering loop
                let pieces: Vec<Result<Bytes, RangeError>> = slice
                    .chunks(7)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect();
                if self.stall_start == Some(start) {
                    return Ok(stream::iter(pieces).chain(stream::pending()).boxed());
                }
                Ok(stream::iter(pieces).boxed())
            })
        }

        fn describe(&self) -> String {
            "memory".to_string()
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn small_split() -> DownloadOptions {
        DownloadOptions {
            max_chunks: 16,
            min_split_size: 10,
        }
    }

    #[tokio::test]
    async fn split_download_writes_each_part() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let data = sample(1000);
        let source = Arc::new(MemorySource::new(data.clone()));

        let report = RangeDownloader::new(source.clone(), CancellationToken::new())
            .with_options(small_split())
            .download(&dest, 4)
            .await;

        assert!(report.is_success());
        assert_eq!(report.len(), 4);
        assert_eq!(source.opens.load(Ordering::SeqCst), 4);

        let mut joined = Vec::new();
        for part in report.part_paths() {
            joined.extend(std::fs::read(part).unwrap());
        }
        assert_eq!(joined, data);
    }

    #[tokio::test]
    async fn one_failed_range_leaves_siblings_intact() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let data = sample(1000);
        let mut source = MemorySource::new(data.clone());
        source.fail_start = Some(500); // third of four ranges
        let source = Arc::new(source);

        let report = RangeDownloader::new(source, CancellationToken::new())
            .with_options(small_split())
            .download(&dest, 4)
            .await;

        assert_eq!(report.len(), 4);
        assert_eq!(report.failures().count(), 1);

        let failed = report.failed_ranges();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0.index, 2);

        for (range, path) in report.parts.iter().filter(|(r, _)| r.index != 2) {
            let bytes = std::fs::read(path).unwrap();
            let start = range.start as usize;
            assert_eq!(bytes, &data[start..start + range.len as usize]);
        }
    }

    #[tokio::test]
    async fn small_payload_uses_single_request() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("small.bin");
        let data = sample(30);
        let source = Arc::new(MemorySource::new(data.clone()));

        let report = RangeDownloader::new(source.clone(), CancellationToken::new())
            .with_options(small_split())
            .download(&dest, 4)
            .await;

        assert!(!report.is_split());
        assert_eq!(report.len(), 1);
        assert!(report.outcomes()[&dest].is_ok());
        assert_eq!(source.opens.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[tokio::test]
    async fn cancelled_before_start_opens_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let source = Arc::new(MemorySource::new(sample(1000)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = RangeDownloader::new(source.clone(), cancel)
            .with_options(small_split())
            .download(&dest, 4)
            .await;

        assert_eq!(source.opens.load(Ordering::SeqCst), 0);
        assert!(report
            .outcomes()
            .values()
            .all(|r| matches!(r, Err(RangeError::Cancelled))));
    }

    #[tokio::test]
    async fn progress_reaches_total() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let source = Arc::new(MemorySource::new(sample(1000)));
        let (reporter, rx) = ProgressReporter::new(0);

        let report = RangeDownloader::new(source, CancellationToken::new())
            .with_options(small_split())
            .with_progress(reporter)
            .download(&dest, 5)
            .await;

        assert!(report.is_success());
        let p = *rx.borrow();
        assert_eq!(p.total, 1000);
        assert_eq!(p.done, 1000);
    }

    #[tokio::test]
    async fn cancel_mid_body_removes_partial_part() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let mut source = MemorySource::new(sample(1000));
        source.stall_start = Some(250);
        let source = Arc::new(source);
        let cancel = CancellationToken::new();

        let downloader = RangeDownloader::new(source, cancel.clone()).with_options(small_split());
        let worker_dest = dest.clone();
        let handle = tokio::spawn(async move { downloader.download(&worker_dest, 4).await });

        let stalled = part_path(&dest, 1);
        for _ in 0..100 {
            if stalled.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(stalled.exists());
        cancel.cancel();

        let report = handle.await.unwrap();
        assert!(matches!(
            report.outcomes()[&stalled],
            Err(RangeError::Cancelled)
        ));
        assert!(!stalled.exists());
    }

    #[tokio::test]
    async fn split_download_creates_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested/sub/out.bin");
        let source = Arc::new(MemorySource::new(sample(1000)));

        let report = RangeDownloader::new(source, CancellationToken::new())
            .with_options(small_split())
            .download(&dest, 4)
            .await;

        assert!(report.is_success());
        assert!(report.part_paths().iter().all(|p| p.exists()));
    }

    #[tokio::test]
    async fn rejected_range_does_not_count_twice() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let mut source = MemorySource::new(sample(1000));
        source.short_once = Some(500);
        let source = Arc::new(source);
        let (reporter, rx) = ProgressReporter::new(0);

        let downloader = RangeDownloader::new(source, CancellationToken::new())
            .with_options(small_split())
            .with_progress(reporter);
        let report = downloader.download(&dest, 4).await;

        assert_eq!(report.failures().count(), 1);
        assert_eq!(rx.borrow().done, 750);

        for (range, output) in report.failed_ranges() {
            downloader.fetch_range(range, &output).await.unwrap();
        }
        let p = *rx.borrow();
        assert_eq!(p.done, 1000);
        assert_eq!(p.done, p.total);
    }
}
