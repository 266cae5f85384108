use std::path::Path;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use super::FilerClient;
use crate::error::{TransferError, TransferResult};
use crate::path::normalize_path;
use range_dl::{
    merge_parts, BodyStream, ByteRange, DownloadOptions, DownloadReport, HttpRangeSource,
    ProgressReporter, RangeDownloader, RangeError, RangeSource, MIN_SPLIT_SIZE,
};

/// A filer file as a range source; its size comes from `stat`.
#[derive(Debug, Clone)]
pub struct FilerRangeSource {
    client: FilerClient,
    path: String,
    http: HttpRangeSource,
}

impl FilerRangeSource {
    pub fn path(&self) -> &str {
        &self.path
    }

    async fn stat_size(&self) -> Result<u64, RangeError> {
        let stat = self.client.stat(&self.path).await.map_err(into_range_error)?;
        if stat.is_dir {
            return Err(RangeError::UnknownSize(format!("{} is a directory", self.path)));
        }
        Ok(stat.size)
    }
}

impl RangeSource for FilerRangeSource {
    fn total_size(&self) -> BoxFuture<'_, Result<u64, RangeError>> {
        Box::pin(self.stat_size())
    }

    fn open(&self, range: Option<ByteRange>) -> BoxFuture<'_, Result<BodyStream, RangeError>> {
        self.http.open(range)
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}

fn into_range_error(err: TransferError) -> RangeError {
    match err {
        TransferError::Cancelled => RangeError::Cancelled,
        TransferError::NotFound(path) => RangeError::NotFound(path),
        TransferError::Status { status, body, .. } => RangeError::Status {
            status,
            range: None,
            body,
        },
        TransferError::Network(e) => RangeError::Request(e),
        TransferError::Range(e) => e,
        other => RangeError::UnknownSize(other.to_string()),
    }
}

impl FilerClient {
    pub fn range_source(&self, remote: &str) -> TransferResult<FilerRangeSource> {
        let path = normalize_path(remote);
        let url = self.url(&path, &[])?;
        Ok(FilerRangeSource {
            client: self.clone(),
            http: HttpRangeSource::new(self.http().clone(), url.to_string()),
            path,
        })
    }

    /// Download `remote` with up to `chunks` concurrent range requests.
    ///
    /// Small files go straight to `dest`; larger ones land in
    /// `dest.part0..N`, one outcome per part, ready for `merge_parts`.
    pub async fn download_concurrent(
        &self,
        cancel: &CancellationToken,
        remote: &str,
        dest: &Path,
        chunks: usize,
        progress: Option<ProgressReporter>,
    ) -> TransferResult<DownloadReport> {
        let source = Arc::new(self.range_source(remote)?);
        let options = DownloadOptions {
            max_chunks: self.policy().max_download_chunks,
            min_split_size: MIN_SPLIT_SIZE,
        };
        let mut downloader = RangeDownloader::new(source, cancel.clone()).with_options(options);
        if let Some(progress) = progress {
            downloader = downloader.with_progress(progress);
        }
        Ok(downloader.download(dest, chunks).await)
    }

    /// Download `remote` into `dest`, merging parts when the download was split.
    ///
    /// Returns the first failure; part files are left in place on failure so
    /// the caller can inspect them.
    pub async fn download_file(
        &self,
        cancel: &CancellationToken,
        remote: &str,
        dest: &Path,
        chunks: usize,
        progress: Option<ProgressReporter>,
    ) -> TransferResult<u64> {
        let report = self
            .download_concurrent(cancel, remote, dest, chunks, progress)
            .await?;

        if !report.is_success() {
            let failed = report.failures().count();
            warn!(
                "download_failed: {} parts_failed={} of {}",
                remote,
                failed,
                report.len()
            );
            return Err(report
                .into_outcomes()
                .into_values()
                .find_map(Result::err)
                .map(TransferError::from)
                .unwrap_or(TransferError::Cancelled));
        }

        if report.is_split() {
            merge_parts(dest, &report.part_paths(), true).await?;
        }
        info!(
            "download_file: {} -> {} total_bytes={}",
            remote,
            dest.display(),
            report.total_size
        );
        Ok(report.total_size)
    }
}
