//! Progress reporting through a `watch` channel.
//!
//! Workers call [`ProgressReporter::advance`] concurrently; `send_modify` takes the
//! channel's internal lock, so updates are never lost. `done` only moves
//! backwards when a failed range retracts the bytes it had reported.

use serde::Serialize;
use tokio::sync::watch;

/// Cumulative bytes written against the expected total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub done: u64,
    pub total: u64,
}

impl Progress {
    /// Percentage in `0..=100`.
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        std::cmp::min(((self.done as f64 / self.total as f64) * 100.0) as u32, 100)
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.done >= self.total
    }
}

/// Publishing side of a progress handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: std::sync::Arc<watch::Sender<Progress>>,
}

impl ProgressReporter {
    /// Create a reporter and the receiver callers poll or await.
    pub fn new(total: u64) -> (Self, watch::Receiver<Progress>) {
        let (tx, rx) = watch::channel(Progress { done: 0, total });
        (
            Self {
                tx: std::sync::Arc::new(tx),
            },
            rx,
        )
    }

    /// Add `bytes` to the running total.
    pub fn advance(&self, bytes: u64) {
        self.tx.send_modify(|p| p.done = p.done.saturating_add(bytes));
    }

    /// Remove `bytes` previously reported for output that was discarded.
    pub fn retract(&self, bytes: u64) {
        self.tx.send_modify(|p| p.done = p.done.saturating_sub(bytes));
    }

    /// Replace the expected total (sizes learned after the transfer started).
    pub fn set_total(&self, total: u64) {
        self.tx.send_modify(|p| p.total = total);
    }

    pub fn snapshot(&self) -> Progress {
        *self.tx.borrow()
    }
}
