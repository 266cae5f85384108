use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::{join_all, BoxFuture};
use log::{info, warn};
use reqwest::{header, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{status_error, FilerClient};
use crate::error::{TransferError, TransferResult};
use crate::local;
use crate::options::{DeleteOptions, WriteOptions};
use crate::path::normalize_path;
use crate::upload::{ChunkPosition, ChunkSink, ChunkedUploader, ResumeMode, UploadTask};
use range_dl::ProgressReporter;

impl FilerClient {
    /// One write request. `position` selects a plain write, an offset write or an append.
    pub async fn put(
        &self,
        path: &str,
        body: impl Into<reqwest::Body>,
        position: ChunkPosition,
        opts: &WriteOptions,
    ) -> TransferResult<()> {
        let path = normalize_path(path);
        let mut query = opts.query_pairs();
        if let Some((key, value)) = position.query_pair() {
            query.push((key.to_string(), value));
        }

        let mut request = self
            .http()
            .request(opts.method.as_method(), self.url(&path, &query)?)
            .body(body);
        for (name, value) in &opts.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(content_type) = &opts.content_type {
            request = request.header(header::CONTENT_TYPE, content_type.as_str());
        }

        let response = request.send().await?;
        if response.status().as_u16() >= 400 {
            return Err(status_error("upload", response).await);
        }
        Ok(())
    }

    /// Sequential chunked upload of the rest of `task` from `source`.
    pub async fn upload_large<R>(
        &self,
        cancel: &CancellationToken,
        task: &mut UploadTask,
        source: &mut R,
        max_retry: Option<u32>,
        opts: &WriteOptions,
        progress: Option<ProgressReporter>,
    ) -> TransferResult<()>
    where
        R: tokio::io::AsyncRead + Unpin + Send,
    {
        let mut uploader = ChunkedUploader::new(self.clone(), self.shared_policy(), cancel.clone());
        if let Some(progress) = progress {
            uploader = uploader.with_progress(progress);
        }
        uploader.upload(task, source, max_retry, opts).await
    }

    /// Upload a local file: one request up to `threshold` bytes, offset-tagged
    /// chunks above it.
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_local_file(
        &self,
        cancel: &CancellationToken,
        local_path: &Path,
        remote: &str,
        threshold: u64,
        chunk_size: u64,
        opts: &WriteOptions,
        progress: Option<ProgressReporter>,
    ) -> TransferResult<()> {
        let size = local::file_size(local_path).await?;
        let mut file = File::open(local_path)
            .await
            .map_err(|e| TransferError::io(local_path, e))?;

        if let Some(p) = &progress {
            p.set_total(size);
        }

        if size <= threshold {
            let mut buffer = Vec::with_capacity(size as usize);
            file.read_to_end(&mut buffer)
                .await
                .map_err(|e| TransferError::io(local_path, e))?;

            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            info!(
                "upload_single: {} -> {} total_bytes={}",
                local_path.display(),
                remote,
                size
            );
            cancel
                .run_until_cancelled(self.put(remote, buffer, ChunkPosition::Whole, opts))
                .await
                .ok_or(TransferError::Cancelled)??;

            if let Some(p) = &progress {
                p.advance(size);
            }
            return Ok(());
        }

        let mut task = UploadTask::new(remote, size)
            .with_chunk_size(chunk_size)
            .with_mode(ResumeMode::Offset);
        self.upload_large(cancel, &mut task, &mut file, None, opts, progress)
            .await
    }

    /// Remove a file or directory.
    pub async fn delete(&self, path: &str, opts: &DeleteOptions) -> TransferResult<()> {
        let path = normalize_path(path);
        let response = self
            .http()
            .delete(self.url(&path, &opts.query_pairs())?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(TransferError::NotFound(path));
        }
        if !response.status().is_success() {
            return Err(status_error("delete", response).await);
        }
        Ok(())
    }

    /// Delete many paths with at most `concurrency` requests in flight.
    ///
    /// Every path gets an outcome. With `ignore_errors` failures are logged and
    /// reported as success. Paths not yet started when `cancel` fires are
    /// reported as `Cancelled`.
    pub async fn delete_batch(
        &self,
        cancel: &CancellationToken,
        paths: &[String],
        opts: &DeleteOptions,
        ignore_errors: bool,
        concurrency: usize,
    ) -> BTreeMap<String, TransferResult<()>> {
        let results = if concurrency <= 1 {
            let mut results = BTreeMap::new();
            for path in paths {
                let result = if cancel.is_cancelled() {
                    Err(TransferError::Cancelled)
                } else {
                    self.delete(path, opts).await
                };
                results.insert(path.clone(), settle(path, result, ignore_errors));
            }
            results
        } else {
            self.delete_concurrent(cancel, paths, opts, ignore_errors, concurrency)
                .await
        };

        let failed = results.values().filter(|r| r.is_err()).count();
        info!(
            "delete_batch: paths={} failed={} concurrency={}",
            results.len(),
            failed,
            concurrency
        );
        results
    }

    async fn delete_concurrent(
        &self,
        cancel: &CancellationToken,
        paths: &[String],
        opts: &DeleteOptions,
        ignore_errors: bool,
        concurrency: usize,
    ) -> BTreeMap<String, TransferResult<()>> {
        let mut results = BTreeMap::new();
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut handles = Vec::with_capacity(paths.len());

        for path in paths {
            if cancel.is_cancelled() {
                results.insert(path.clone(), Err(TransferError::Cancelled));
                continue;
            }

            let permit = match cancel
                .run_until_cancelled(semaphore.clone().acquire_owned())
                .await
            {
                Some(Ok(permit)) => permit,
                Some(Err(e)) => {
                    results.insert(path.clone(), Err(TransferError::Worker(e.to_string())));
                    continue;
                }
                None => {
                    results.insert(path.clone(), Err(TransferError::Cancelled));
                    continue;
                }
            };

            let client = self.clone();
            let opts = opts.clone();
            let task_path = path.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                client.delete(&task_path, &opts).await
            });
            handles.push((path.clone(), handle));
        }

        let joined = join_all(
            handles
                .into_iter()
                .map(|(path, handle)| async move { (path, handle.await) }),
        )
        .await;

        for (path, outcome) in joined {
            let result = outcome.unwrap_or_else(|e| Err(TransferError::Worker(e.to_string())));
            let settled = settle(&path, result, ignore_errors);
            results.insert(path, settled);
        }
        results
    }
}

fn settle(path: &str, result: TransferResult<()>, ignore_errors: bool) -> TransferResult<()> {
    match result {
        Err(e) if ignore_errors && !e.is_cancelled() => {
            warn!("delete_ignored: {} error={}", path, e);
            Ok(())
        }
        other => other,
    }
}

impl ChunkSink for FilerClient {
    fn write_chunk<'a>(
        &'a self,
        path: &'a str,
        chunk: Bytes,
        position: ChunkPosition,
        opts: &'a WriteOptions,
    ) -> BoxFuture<'a, TransferResult<()>> {
        Box::pin(self.put(path, chunk, position, opts))
    }
}
