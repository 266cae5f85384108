//! Paginated directory listing
//!
//! Follows the `lastFileName` cursor page by page until the filer reports no
//! more entries. Two guards bound a misbehaving server:
//! - a cursor that does not advance fails with `PaginationStalled`
//! - more than `max_list_pages` continuations fail with `PageLimitExceeded`

use std::sync::Arc;

use futures_util::future::BoxFuture;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::error::{TransferError, TransferResult};
use crate::filer::{Entry, ListPage};
use crate::options::ListOptions;
use crate::policy::TransferPolicy;

/// Source of listing pages.
pub trait ListPager: Send + Sync {
    fn list_page<'a>(
        &'a self,
        dir: &'a str,
        cursor: &'a str,
        limit: usize,
        opts: &'a ListOptions,
    ) -> BoxFuture<'a, TransferResult<ListPage>>;
}

pub struct ListWalker<P: ListPager> {
    pager: P,
    policy: Arc<TransferPolicy>,
    cancel: CancellationToken,
}

impl<P: ListPager> ListWalker<P> {
    pub fn new(pager: P, policy: Arc<TransferPolicy>, cancel: CancellationToken) -> Self {
        Self {
            pager,
            policy,
            cancel,
        }
    }

    /// Every entry of `dir`, in server order.
    pub async fn list_all(&self, dir: &str, opts: &ListOptions) -> TransferResult<Vec<Entry>> {
        let limit = self.policy.list_page_size.max(1);
        let mut entries = Vec::new();
        let mut cursor = String::new();
        let mut pages: usize = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let page = self
                .cancel
                .run_until_cancelled(self.pager.list_page(dir, &cursor, limit, opts))
                .await
                .ok_or(TransferError::Cancelled)??;

            entries.extend(page.entries);

            if !page.has_more {
                break;
            }

            if page.cursor == cursor {
                warn!(
                    "list_stalled: {} cursor={:?} pages={}",
                    dir,
                    cursor,
                    pages + 1
                );
                return Err(TransferError::PaginationStalled {
                    dir: dir.to_string(),
                    cursor,
                    pages: pages + 1,
                });
            }

            cursor = page.cursor;
            pages += 1;

            if pages >= self.policy.max_list_pages {
                warn!(
                    "list_page_limit: {} limit={}",
                    dir, self.policy.max_list_pages
                );
                return Err(TransferError::PageLimitExceeded {
                    dir: dir.to_string(),
                    limit: self.policy.max_list_pages,
                });
            }
        }

        debug!(
            "list_done: {} entries={} pages={}",
            dir,
            entries.len(),
            pages + 1
        );
        Ok(entries)
    }
}
