//! Queue module for managing the download queue.
//!
//! This module provides the in-memory queue store that tracks download items
//! through their lifecycle (pending → processing → success/error).
//!
//! # Overview
//!
//! The queue system consists of:
//! - [`Queue`] - Main interface for queue operations
//! - [`QueueItem`] - Individual queue entry
//! - [`QueueStatus`] - Item lifecycle states
//! - [`QueueError`] - Operation error types
//!
//! Every mutation is keyed by video ID and happens inside one short critical
//! section, so a claim and a status update for the same item never interleave.
//!
//! # Example
//!
//! ```
//! use sora_batch_core::queue::{Queue, QueueItem, QueueStatus};
//!
//! let queue = Queue::new();
//! queue.enqueue(QueueItem::new("abc", "https://x/p/abc", "https://cdn.test/MP4")).unwrap();
//!
//! let item = queue.claim_next_pending(3).unwrap();
//! assert_eq!(item.status, QueueStatus::Processing);
//! ```

mod error;
mod item;

pub use error::QueueError;
pub use item::{QueueItem, QueueStatus};

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tracing::{debug, info, instrument, warn};

use crate::download::FailureKind;
use crate::parser::ParseResult;

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Per-status item counts from one consistent read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    /// Items waiting to be claimed.
    pub pending: usize,
    /// Items currently owned by a worker.
    pub processing: usize,
    /// Items downloaded or skipped.
    pub success: usize,
    /// Items that failed.
    pub error: usize,
}

impl QueueCounts {
    /// Returns the total number of items.
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.success + self.error
    }

    /// Returns true while anything is pending or processing.
    #[must_use]
    pub fn has_work(&self) -> bool {
        self.pending > 0 || self.processing > 0
    }
}

/// Outcome of ingesting one parse result.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// IDs appended to the queue, in order.
    pub added: Vec<String>,
    /// IDs (or links) rejected because they were already queued.
    pub duplicates: Vec<String>,
}

/// Details recorded when a download finishes successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedDownload {
    /// Final path of the saved video.
    pub path: PathBuf,
    /// Size of the saved video in bytes.
    pub bytes: u64,
    /// True when the file already existed and no request was made.
    pub skipped: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    items: Vec<QueueItem>,
    next_seq: u64,
    peak_processing: usize,
}

impl QueueState {
    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    fn processing(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.status == QueueStatus::Processing)
            .count()
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<QueueState>,
    changed: Notify,
}

/// Queue store for download items.
///
/// Cheap to clone; all clones share the same items. The lock is never held
/// across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct Queue {
    shared: Arc<Shared>,
}

impl Queue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.shared.changed.notify_waiters();
    }

    /// Returns a future that completes on the next queue mutation.
    ///
    /// Call [`Notified::enable`] before inspecting the queue so a mutation
    /// landing between the inspection and the `.await` is not missed.
    #[must_use]
    pub fn changed(&self) -> Notified<'_> {
        self.shared.changed.notified()
    }

    /// Appends a pending item to the back of the queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DuplicateId`] or [`QueueError::DuplicateSourceUrl`]
    /// if the item is already queued; the queue is left unchanged.
    #[instrument(skip(self, item), fields(id = %item.id))]
    pub fn enqueue(&self, mut item: QueueItem) -> Result<()> {
        {
            let mut state = self.lock();
            if state.items.iter().any(|existing| existing.id == item.id) {
                return Err(QueueError::DuplicateId(item.id));
            }
            if state
                .items
                .iter()
                .any(|existing| existing.source_url == item.source_url)
            {
                return Err(QueueError::DuplicateSourceUrl(item.source_url));
            }
            item.seq = state.next_seq;
            item.status = QueueStatus::Pending;
            state.next_seq += 1;
            state.items.push(item);
        }
        self.notify();
        Ok(())
    }

    /// Enqueues every extracted link of `parsed`, skipping ones already queued.
    ///
    /// Duplicates are logged and reported, never treated as failures.
    #[instrument(skip(self, parsed), fields(links = parsed.len()))]
    pub fn ingest(&self, parsed: &ParseResult, resource_base: &str) -> IngestReport {
        let mut report = IngestReport::default();
        for link in &parsed.items {
            match self.enqueue(QueueItem::new(&link.id, &link.raw, resource_base)) {
                Ok(()) => {
                    debug!(id = %link.id, "enqueued video");
                    report.added.push(link.id.clone());
                }
                Err(e) => {
                    warn!(id = %link.id, error = %e, "skipping link already in queue");
                    report.duplicates.push(link.id.clone());
                }
            }
        }
        report
    }

    /// Atomically claims the earliest-inserted pending item.
    ///
    /// The item is marked `Processing` in the same critical section that
    /// selected it, and only when fewer than `limit` items are processing.
    /// Returns the claimed item, or `None` if the limit is reached or
    /// nothing is pending.
    #[instrument(skip(self))]
    pub fn claim_next_pending(&self, limit: usize) -> Option<QueueItem> {
        self.claim_next_pending_where(limit, |_| true)
    }

    /// Like [`claim_next_pending`](Self::claim_next_pending), but passes over
    /// pending items for which `eligible` returns false.
    pub fn claim_next_pending_where(
        &self,
        limit: usize,
        eligible: impl Fn(&QueueItem) -> bool,
    ) -> Option<QueueItem> {
        let claimed = {
            let mut state = self.lock();
            let processing = state.processing();
            if processing >= limit {
                return None;
            }
            let index = state
                .items
                .iter()
                .enumerate()
                .filter(|(_, item)| item.status == QueueStatus::Pending && eligible(item))
                .min_by_key(|(_, item)| item.seq)
                .map(|(index, _)| index)?;

            let item = &mut state.items[index];
            item.status = QueueStatus::Processing;
            item.claims += 1;
            let claimed = item.clone();
            state.peak_processing = state.peak_processing.max(processing + 1);
            claimed
        };
        debug!(id = %claimed.id, claims = claimed.claims, "claimed item");
        self.notify();
        Some(claimed)
    }

    /// Returns true while the claim on `id` made at insertion sequence `seq`
    /// is still live.
    ///
    /// An item removed and queued again under the same ID gets a new
    /// sequence, so it never matches a claim on its predecessor.
    #[must_use]
    pub fn holds_claim(&self, id: &str, seq: u64) -> bool {
        self.lock().items.iter().any(|item| {
            item.id == id && item.seq == seq && item.status == QueueStatus::Processing
        })
    }

    /// Updates an item's status, keyed by ID.
    ///
    /// `error_message` is stored only when moving to `Error`. Moving to
    /// `Pending` from `Error` clears it (same as [`reset_error`](Self::reset_error)).
    ///
    /// Returns `Ok(false)` if the item no longer exists (removed concurrently).
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidTransition`] if the change is not an edge of
    /// the state machine. `Pending -> Processing` is rejected here because it
    /// must go through [`claim_next_pending`](Self::claim_next_pending).
    #[instrument(skip(self, error_message))]
    pub fn update_status(
        &self,
        id: &str,
        status: QueueStatus,
        error_message: Option<String>,
    ) -> Result<bool> {
        self.mutate(id, status, |item| {
            item.error_message = if status == QueueStatus::Error {
                error_message
            } else {
                None
            };
            if status != QueueStatus::Error {
                item.failure = None;
            }
        })
    }

    /// Marks a processing item as successfully downloaded.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidTransition`] if the item is not processing.
    pub fn complete(&self, id: &str, download: CompletedDownload) -> Result<bool> {
        self.mutate(id, QueueStatus::Success, |item| {
            item.error_message = None;
            item.failure = None;
            item.bytes = Some(download.bytes);
            item.saved_path = Some(download.path);
            item.skipped = download.skipped;
        })
    }

    /// Marks a processing item as failed with a classified message.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidTransition`] if the item is not processing.
    pub fn fail(&self, id: &str, kind: FailureKind, message: impl Into<String>) -> Result<bool> {
        let message = message.into();
        self.mutate(id, QueueStatus::Error, |item| {
            item.error_message = Some(message);
            item.failure = Some(kind);
        })
    }

    fn mutate(
        &self,
        id: &str,
        status: QueueStatus,
        apply: impl FnOnce(&mut QueueItem),
    ) -> Result<bool> {
        {
            let mut state = self.lock();
            let Some(index) = state.position(id) else {
                debug!(id, "status update for item no longer in queue");
                return Ok(false);
            };
            let item = &mut state.items[index];
            let from = item.status;
            if !from.can_transition_to(status) || status == QueueStatus::Processing {
                return Err(QueueError::invalid_transition(id, from, status));
            }
            item.status = status;
            apply(item);
        }
        self.notify();
        Ok(true)
    }

    /// Resets a failed item to pending so the next batch pass picks it up.
    ///
    /// Returns false (no-op) if the item is missing or not in `Error`.
    #[instrument(skip(self))]
    pub fn reset_error(&self, id: &str) -> bool {
        let reset = {
            let mut state = self.lock();
            match state.position(id) {
                Some(index) if state.items[index].status == QueueStatus::Error => {
                    let item = &mut state.items[index];
                    item.status = QueueStatus::Pending;
                    item.error_message = None;
                    item.failure = None;
                    true
                }
                _ => false,
            }
        };
        if reset {
            info!(id, "reset failed item to pending");
            self.notify();
        }
        reset
    }

    /// Resets every failed item to pending. Returns how many were reset.
    pub fn reset_all_errors(&self) -> usize {
        let count = {
            let mut state = self.lock();
            let mut count = 0;
            for item in state
                .items
                .iter_mut()
                .filter(|item| item.status == QueueStatus::Error)
            {
                item.status = QueueStatus::Pending;
                item.error_message = None;
                item.failure = None;
                count += 1;
            }
            count
        };
        if count > 0 {
            info!(count, "reset failed items to pending");
            self.notify();
        }
        count
    }

    /// Removes an item. Returns false if it was not queued.
    #[instrument(skip(self))]
    pub fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.lock();
            let before = state.items.len();
            state.items.retain(|item| item.id != id);
            state.items.len() != before
        };
        if removed {
            info!(id, "removed item from queue");
            self.notify();
        }
        removed
    }

    /// Removes every item. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut state = self.lock();
            let removed = state.items.len();
            state.items.clear();
            removed
        };
        info!(removed, "queue cleared");
        self.notify();
        removed
    }

    /// Attaches a decorative tag to an item. Returns false if it is gone.
    pub fn set_tag(&self, id: &str, tag: impl Into<String>) -> bool {
        let mut state = self.lock();
        match state.position(id) {
            Some(index) => {
                state.items[index].tag = Some(tag.into());
                true
            }
            None => false,
        }
    }

    /// Returns a copy of one item.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<QueueItem> {
        let state = self.lock();
        state.position(id).map(|index| state.items[index].clone())
    }

    /// Returns a consistent copy of all items in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.lock().items.clone()
    }

    /// Returns the number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Counts items by status in one consistent read.
    #[must_use]
    pub fn counts(&self) -> QueueCounts {
        let state = self.lock();
        let mut counts = QueueCounts::default();
        for item in &state.items {
            match item.status {
                QueueStatus::Pending => counts.pending += 1,
                QueueStatus::Processing => counts.processing += 1,
                QueueStatus::Success => counts.success += 1,
                QueueStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    /// Returns the source links of all failed items, in insertion order.
    #[must_use]
    pub fn failed_source_urls(&self) -> Vec<String> {
        self.lock()
            .items
            .iter()
            .filter(|item| item.status == QueueStatus::Error)
            .map(|item| item.source_url.clone())
            .collect()
    }

    /// Returns the failed source links joined by newlines, ready to re-paste.
    #[must_use]
    pub fn export_failed(&self) -> String {
        self.failed_source_urls().join("\n")
    }

    /// Returns the highest number of simultaneously processing items observed
    /// since the last [`reset_peak_processing`](Self::reset_peak_processing).
    #[must_use]
    pub fn peak_processing(&self) -> usize {
        self.lock().peak_processing
    }

    /// Restarts peak tracking from the current processing count.
    pub fn reset_peak_processing(&self) {
        let mut state = self.lock();
        state.peak_processing = state.processing();
    }
}
