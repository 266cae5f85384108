//! Recursive directory usage
//!
//! Pending directories sit in a work queue; up to `usage_concurrency` of them
//! are listed at once on spawned tasks, and each listing feeds its
//! subdirectories back into the queue. The first failure cancels the rest.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{TransferError, TransferResult};
use crate::listing::{ListPager, ListWalker};
use crate::options::ListOptions;
use crate::path::{dir_path, join_path};
use crate::policy::TransferPolicy;

/// Totals for a directory tree. The root itself is not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirUsage {
    pub total_size: u64,
    pub file_count: u64,
    pub dir_count: u64,
}

/// Walk `root` and everything below it.
///
/// Returns `Cancelled` if `cancel` fires, and the first listing error
/// otherwise; a partial total is never returned.
pub async fn dir_usage<P>(
    pager: P,
    policy: Arc<TransferPolicy>,
    cancel: &CancellationToken,
    root: &str,
) -> TransferResult<DirUsage>
where
    P: ListPager + Clone + 'static,
{
    let root = dir_path(root);
    let concurrency = policy.usage_concurrency.max(1);
    let usage = Arc::new(Mutex::new(DirUsage::default()));
    // Cancelled on the first failure without touching the caller's token
    let scope = cancel.child_token();
    let start_time = Instant::now();

    let mut pending: VecDeque<String> = VecDeque::from([root.clone()]);
    let mut running = JoinSet::new();
    let mut failure: Option<TransferError> = None;

    loop {
        while failure.is_none() && running.len() < concurrency {
            let Some(dir) = pending.pop_front() else {
                break;
            };
            let walker = ListWalker::new(pager.clone(), policy.clone(), scope.clone());
            running.spawn(scan_dir(walker, dir, usage.clone()));
        }

        let Some(joined) = running.join_next().await else {
            break;
        };

        let result = joined.unwrap_or_else(|e| Err(TransferError::Worker(e.to_string())));
        match result {
            Ok(subdirs) => {
                if failure.is_none() {
                    pending.extend(subdirs);
                }
            }
            Err(e) => {
                if failure.is_none() {
                    warn!("dir_usage_failed: {} error={}", root, e);
                    scope.cancel();
                    failure = Some(e);
                }
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }
    if let Some(e) = failure {
        return Err(e);
    }

    let total = *usage.lock().unwrap_or_else(PoisonError::into_inner);
    info!(
        "dir_usage: {} total_bytes={} files={} dirs={} elapsed_ms={}",
        root,
        total.total_size,
        total.file_count,
        total.dir_count,
        start_time.elapsed().as_millis()
    );
    Ok(total)
}

/// List one directory, add its entries to `usage`, return its subdirectories.
async fn scan_dir<P: ListPager>(
    walker: ListWalker<P>,
    dir: String,
    usage: Arc<Mutex<DirUsage>>,
) -> TransferResult<Vec<String>> {
    let entries = walker.list_all(&dir, &ListOptions::default()).await?;

    let mut local = DirUsage::default();
    let mut subdirs = Vec::new();
    for entry in &entries {
        if entry.is_dir {
            local.dir_count += 1;
            subdirs.push(dir_path(&join_path(&[&dir, &entry.name])));
        } else {
            local.file_count += 1;
            local.total_size += entry.size;
        }
    }

    {
        let mut total = usage.lock().unwrap_or_else(PoisonError::into_inner);
        total.total_size += local.total_size;
        total.file_count += local.file_count;
        total.dir_count += local.dir_count;
    }

    debug!(
        "dir_usage_scan: {} files={} dirs={}",
        dir, local.file_count, local.dir_count
    );
    Ok(subdirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filer::{Entry, ListPage};
    use futures_util::future::BoxFuture;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(name: &str, is_dir: bool, size: u64) -> Entry {
        Entry {
            name: name.to_string(),
            full_path: name.to_string(),
            is_dir,
            size,
            mime: String::new(),
            mtime: None,
        }
    }

    /// Directory tree keyed by `/dir/` paths. Listing `fail_on` returns 500;
    /// with `stall_children` every listing below the root hangs.
    #[derive(Clone)]
    struct TreePager {
        dirs: Arc<HashMap<String, Vec<Entry>>>,
        fail_on: Option<String>,
        stall_children: bool,
        requests: Arc<AtomicUsize>,
    }

    impl TreePager {
        fn sample() -> Self {
            let mut dirs = HashMap::new();
            dirs.insert(
                "/data/".to_string(),
                vec![
                    entry("a.bin", false, 100),
                    entry("logs", true, 0),
                    entry("media", true, 0),
                ],
            );
            dirs.insert(
                "/data/logs/".to_string(),
                vec![
                    entry("1.log", false, 10),
                    entry("2.log", false, 20),
                    entry("old", true, 0),
                ],
            );
            dirs.insert("/data/logs/old/".to_string(), vec![entry("0.log", false, 5)]);
            dirs.insert("/data/media/".to_string(), Vec::new());
            Self {
                dirs: Arc::new(dirs),
                fail_on: None,
                stall_children: false,
                requests: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ListPager for TreePager {
        fn list_page<'a>(
            &'a self,
            dir: &'a str,
            _cursor: &'a str,
            _limit: usize,
            _opts: &'a ListOptions,
        ) -> BoxFuture<'a, TransferResult<ListPage>> {
            Box::pin(async move {
                self.requests.fetch_add(1, Ordering::SeqCst);
                if self.stall_children && dir != "/data/" {
                    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                }
                if self.fail_on.as_deref() == Some(dir) {
                    return Err(TransferError::Status {
                        op: "list",
                        status: 500,
                        body: String::new(),
                    });
                }
                let entries = self
                    .dirs
                    .get(dir)
                    .cloned()
                    .ok_or_else(|| TransferError::NotFound(dir.to_string()))?;
                Ok(ListPage {
                    entries,
                    cursor: String::new(),
                    has_more: false,
                })
            })
        }
    }

    #[tokio::test]
    async fn sums_whole_tree() {
        let pager = TreePager::sample();
        let usage = dir_usage(
            pager.clone(),
            Arc::new(TransferPolicy::default()),
            &CancellationToken::new(),
            "/data",
        )
        .await
        .unwrap();

        assert_eq!(
            usage,
            DirUsage {
                total_size: 135,
                file_count: 4,
                dir_count: 3,
            }
        );
        assert_eq!(pager.requests.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn single_unit_concurrency_gives_same_totals() {
        let policy = Arc::new(TransferPolicy::default().with_usage_concurrency(1));
        let usage = dir_usage(
            TreePager::sample(),
            policy,
            &CancellationToken::new(),
            "/data/",
        )
        .await
        .unwrap();
        assert_eq!(usage.total_size, 135);
        assert_eq!(usage.dir_count, 3);
    }

    #[tokio::test]
    async fn failing_subdirectory_fails_the_walk() {
        let mut pager = TreePager::sample();
        pager.fail_on = Some("/data/logs/".to_string());

        let err = dir_usage(
            pager,
            Arc::new(TransferPolicy::default()),
            &CancellationToken::new(),
            "/data",
        )
        .await
        .unwrap_err();

        assert_eq!(err.status(), Some(500));
    }

    #[tokio::test]
    async fn cancelled_walk_returns_cancelled() {
        let pager = TreePager::sample();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = dir_usage(
            pager.clone(),
            Arc::new(TransferPolicy::default()),
            &cancel,
            "/data",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TransferError::Cancelled));
        assert_eq!(pager.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_during_subdirectory_listings() {
        let mut pager = TreePager::sample();
        pager.stall_children = true;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = dir_usage(
            pager.clone(),
            Arc::new(TransferPolicy::default()),
            &cancel,
            "/data",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TransferError::Cancelled));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        // root plus both subdirectories were started before the cancel
        assert_eq!(pager.requests.load(Ordering::SeqCst), 3);
    }
}
