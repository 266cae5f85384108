use futures_util::future::BoxFuture;
use reqwest::{header, StatusCode};
use tokio_util::sync::CancellationToken;

use super::types::{Entry, ListPage, RawListing};
use super::{status_error, FilerClient};
use crate::error::{TransferError, TransferResult};
use crate::listing::{ListPager, ListWalker};
use crate::options::ListOptions;
use crate::path::dir_path;
use crate::usage::{self, DirUsage};

impl FilerClient {
    /// One page of `dir`, starting after `cursor`.
    ///
    /// The filer does not say whether more entries follow, so a page is
    /// assumed to continue when it is full and names a last entry. An
    /// exactly-full final page therefore costs one extra, empty request.
    pub async fn list_page(
        &self,
        dir: &str,
        cursor: &str,
        limit: usize,
        opts: &ListOptions,
    ) -> TransferResult<ListPage> {
        let dir = dir_path(dir);
        let mut query = vec![("format".to_string(), "json".to_string())];
        if !cursor.is_empty() {
            query.push(("lastFileName".to_string(), cursor.to_string()));
        }
        if limit > 0 {
            query.push(("limit".to_string(), limit.to_string()));
        }
        query.extend(opts.query_pairs());

        let response = self
            .http()
            .get(self.url(&dir, &query)?)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(TransferError::NotFound(dir));
        }
        if !response.status().is_success() {
            return Err(status_error("list", response).await);
        }

        let body = response.bytes().await?;
        let raw: RawListing = serde_json::from_slice(&body)?;
        let entries: Vec<Entry> = raw
            .entries
            .unwrap_or_default()
            .into_iter()
            .map(Entry::from)
            .collect();

        Ok(ListPage {
            has_more: !raw.last_file_name.is_empty() && entries.len() == limit,
            cursor: raw.last_file_name,
            entries,
        })
    }

    /// Every entry directly under `dir`.
    pub async fn list(
        &self,
        cancel: &CancellationToken,
        dir: &str,
        opts: &ListOptions,
    ) -> TransferResult<Vec<Entry>> {
        ListWalker::new(self.clone(), self.shared_policy(), cancel.clone())
            .list_all(&dir_path(dir), opts)
            .await
    }

    /// Total size and entry counts below `dir`.
    pub async fn dir_usage(&self, cancel: &CancellationToken, dir: &str) -> TransferResult<DirUsage> {
        usage::dir_usage(self.clone(), self.shared_policy(), cancel, dir).await
    }
}

impl ListPager for FilerClient {
    fn list_page<'a>(
        &'a self,
        dir: &'a str,
        cursor: &'a str,
        limit: usize,
        opts: &'a ListOptions,
    ) -> BoxFuture<'a, TransferResult<ListPage>> {
        Box::pin(FilerClient::list_page(self, dir, cursor, limit, opts))
    }
}
