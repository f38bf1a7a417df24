//! Batch scheduler that keeps a bounded number of downloads in flight.
//!
//! This module provides the `DownloadEngine` which claims pending items from
//! a shared [`Queue`] and hands each one to the [`FetchWorker`] on its own
//! task, never exceeding the current concurrency limit.
//!
//! # Overview
//!
//! A batch moves through [`BatchState::Idle`] → [`BatchState::Running`] →
//! [`BatchState::Idle`], passing through [`BatchState::Stopping`] when the
//! operator stops or aborts it. While running, the dispatch loop:
//!
//! 1. cancels downloads whose items were removed from the queue,
//! 2. claims pending items (FIFO) until the limit is reached, counting
//!    cancelled downloads that have not exited yet,
//! 3. returns to idle once nothing is pending or processing,
//! 4. otherwise sleeps until a queue change, a worker completion, a limit
//!    change, a stop request, or the fallback poll interval.
//!
//! Items added while a batch runs are picked up by that batch.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sora_batch_core::download::{DownloadEngine, EngineOptions, FetchWorker, HttpClient};
//! use sora_batch_core::log::EventLog;
//! use sora_batch_core::queue::Queue;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = Queue::new();
//! let worker = Arc::new(FetchWorker::new(HttpClient::new(), "./downloads"));
//! let engine = DownloadEngine::new(
//!     queue.clone(),
//!     worker,
//!     Arc::new(EventLog::default()),
//!     EngineOptions::default(),
//! )?;
//! let stats = engine.run().await?;
//! println!("Succeeded: {}, Failed: {}", stats.succeeded(), stats.failed());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::constants::DEFAULT_POLL_INTERVAL;
use super::error::FailureKind;
use super::worker::{FetchOutcome, FetchReport, FetchWorker};
use crate::log::EventSink;
use crate::queue::Queue;

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 16;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Concurrency values offered to the operator.
pub const ALLOWED_CONCURRENCY_LIMITS: [usize; 7] = [1, 2, 3, 4, 5, 8, 16];

/// Error type for download engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// A batch is already running on this engine.
    #[error("a batch is already running")]
    AlreadyRunning,
}

/// Lifecycle of a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchState {
    /// No batch is running.
    #[default]
    Idle,
    /// The dispatch loop is claiming work.
    Running,
    /// No new work is claimed; in-flight downloads are finishing.
    Stopping,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Tuning for a [`DownloadEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Maximum number of items processing at once.
    pub concurrency: usize,
    /// Fallback re-evaluation interval of the dispatch loop.
    pub poll_interval: Duration,
    /// Stop the batch after the first [`FailureKind::WriteFailure`].
    pub halt_on_write_failure: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            halt_on_write_failure: false,
        }
    }
}

/// Statistics from a batch run.
///
/// Uses atomic counters for thread-safe updates from concurrent tasks.
#[derive(Debug, Default)]
pub struct DownloadStats {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    retried: AtomicUsize,
    peak_concurrency: AtomicUsize,
    halt_reason: OnceLock<String>,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of items saved by a request.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Returns the number of items that ended in `Error`.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the number of items skipped because they were already on disk.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Returns the number of automatic retry attempts made.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Returns the highest number of downloads in flight at the same time.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak_concurrency.load(Ordering::SeqCst)
    }

    /// Returns the number of items that reached a terminal state.
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded() + self.failed() + self.skipped()
    }

    /// Returns why the batch halted early, if it did.
    ///
    /// Only set when [`EngineOptions::halt_on_write_failure`] is enabled.
    #[must_use]
    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_reason.get().map(String::as_str)
    }

    fn record(&self, report: &FetchReport) {
        if !report.recorded {
            return;
        }
        let counter = match report.outcome {
            FetchOutcome::Downloaded { .. } => &self.succeeded,
            FetchOutcome::Skipped => &self.skipped,
            FetchOutcome::Failed { .. } => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.retried
            .fetch_add(report.retries as usize, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn observe_in_flight(&self, in_flight: usize) {
        self.peak_concurrency.fetch_max(in_flight, Ordering::SeqCst);
    }
}

/// A spawned download and the claim it was started for.
#[derive(Debug)]
struct Claim {
    id: String,
    seq: u64,
    cancel: CancellationToken,
}

/// Cancellation handles of the batch currently running.
#[derive(Debug, Clone, Default)]
struct BatchControl {
    /// Stops new claims.
    stop: CancellationToken,
    /// Cancels in-flight downloads.
    abort: CancellationToken,
}

/// Batch scheduler over a shared queue.
///
/// The engine is meant to live behind an `Arc`: one task awaits
/// [`run`](Self::run) while others call [`stop`](Self::stop),
/// [`abort`](Self::abort) or [`set_concurrency`](Self::set_concurrency).
///
/// # Concurrency Model
///
/// - Each download runs in its own Tokio task inside a `JoinSet`
/// - The limit is enforced by the queue's atomic claim, not by permits,
///   so a lowered limit simply blocks new claims until enough tasks finish
/// - A panicking task marks its item failed instead of leaving it processing
pub struct DownloadEngine {
    queue: Queue,
    worker: Arc<FetchWorker>,
    log: Arc<dyn EventSink>,
    concurrency: AtomicUsize,
    poll_interval: Duration,
    halt_on_write_failure: bool,
    state: watch::Sender<BatchState>,
    wake: Notify,
    control: Mutex<BatchControl>,
}

impl fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("concurrency", &self.concurrency())
            .field("poll_interval", &self.poll_interval)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Creates a new engine over `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `options.concurrency`
    /// is outside 1..=16.
    #[instrument(level = "debug", skip(queue, worker, log))]
    pub fn new(
        queue: Queue,
        worker: Arc<FetchWorker>,
        log: Arc<dyn EventSink>,
        options: EngineOptions,
    ) -> Result<Self, EngineError> {
        validate_concurrency(options.concurrency)?;

        debug!(
            concurrency = options.concurrency,
            max_attempts = worker.retry_policy().max_attempts(),
            output_dir = %worker.output_dir().display(),
            "creating download engine"
        );

        let (state, _) = watch::channel(BatchState::Idle);
        Ok(Self {
            queue,
            worker,
            log,
            concurrency: AtomicUsize::new(options.concurrency),
            poll_interval: options.poll_interval,
            halt_on_write_failure: options.halt_on_write_failure,
            state,
            wake: Notify::new(),
            control: Mutex::new(BatchControl::default()),
        })
    }

    /// Returns the current concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency.load(Ordering::SeqCst)
    }

    /// Changes the concurrency limit.
    ///
    /// A running batch applies the new limit on its next claim; downloads
    /// already in flight are never interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `value` is outside 1..=16.
    pub fn set_concurrency(&self, value: usize) -> Result<(), EngineError> {
        validate_concurrency(value)?;
        let previous = self.concurrency.swap(value, Ordering::SeqCst);
        if previous != value {
            info!(from = previous, to = value, "concurrency limit changed");
            self.wake.notify_waiters();
        }
        Ok(())
    }

    /// Returns the current batch state.
    #[must_use]
    pub fn state(&self) -> BatchState {
        *self.state.borrow()
    }

    /// Subscribes to batch state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BatchState> {
        self.state.subscribe()
    }

    /// Returns the queue this engine schedules from.
    #[must_use]
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Requests a graceful stop: no new claims, in-flight downloads finish.
    ///
    /// Returns false if no batch is running.
    pub fn stop(&self) -> bool {
        let requested = self.state.send_if_modified(|state| {
            if *state == BatchState::Running {
                *state = BatchState::Stopping;
                true
            } else {
                false
            }
        });
        if requested {
            self.log.append("Sequence termination requested.");
            self.lock_control().stop.cancel();
        }
        requested
    }

    /// Stops the batch and cancels every in-flight download.
    ///
    /// Cancelled items end in `Error` classified as cancelled. Returns false
    /// if no batch is running or stopping.
    pub fn abort(&self) -> bool {
        if self.state() == BatchState::Idle {
            return false;
        }
        self.stop();
        self.log.append("Aborting in-flight downloads.");
        let control = self.lock_control();
        control.stop.cancel();
        control.abort.cancel();
        true
    }

    /// Runs one batch until nothing is pending or processing, or until stopped.
    ///
    /// Per-item failures never fail the batch; they are recorded on the items
    /// and counted in the returned stats.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyRunning`] if another batch is active.
    #[instrument(skip(self), fields(concurrency = self.concurrency()))]
    pub async fn run(&self) -> Result<DownloadStats, EngineError> {
        // The control lock is held across the state flip so a stop() racing
        // with startup always cancels this batch's tokens.
        let control = {
            let mut guard = self.lock_control();
            let started = self.state.send_if_modified(|state| {
                if *state == BatchState::Idle {
                    *state = BatchState::Running;
                    true
                } else {
                    false
                }
            });
            if !started {
                return Err(EngineError::AlreadyRunning);
            }
            *guard = BatchControl::default();
            guard.clone()
        };

        self.queue.reset_peak_processing();
        self.log.append("Batch download sequence initiated.");
        info!("starting batch");

        let stats = DownloadStats::new();
        let mut tasks: JoinSet<FetchReport> = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, Claim> = HashMap::new();

        loop {
            // Register for wake-ups before inspecting the queue so a change
            // landing in between is not lost.
            let changed = self.queue.changed();
            tokio::pin!(changed);
            changed.as_mut().enable();
            let woken = self.wake.notified();
            tokio::pin!(woken);
            woken.as_mut().enable();

            let orphans = self.cancel_orphans(&in_flight);
            let stopping = control.stop.is_cancelled();
            if !stopping {
                self.dispatch(&mut tasks, &mut in_flight, &control.abort, orphans);
                stats.observe_in_flight(tasks.len());
            }

            let finished = if stopping {
                tasks.is_empty()
            } else {
                !self.queue.counts().has_work()
            };
            if finished {
                break;
            }

            tokio::select! {
                () = control.stop.cancelled(), if !stopping => {
                    debug!("stop requested; no further claims");
                }
                Some(joined) = tasks.join_next_with_id() => {
                    self.settle(joined, &mut in_flight, &stats);
                }
                () = &mut changed => {}
                () = &mut woken => {}
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        // Tasks left here belong to items that already reached a terminal
        // state or were removed from the queue. Cancelling lets them delete
        // their partial files before they exit.
        if !tasks.is_empty() {
            debug!(remaining = tasks.len(), "cancelling tasks of removed items");
            for claim in in_flight.values() {
                claim.cancel.cancel();
            }
        }
        while let Some(joined) = tasks.join_next_with_id().await {
            self.settle(joined, &mut in_flight, &stats);
        }

        stats.observe_in_flight(self.queue.peak_processing());

        self.state.send_replace(BatchState::Idle);
        self.log.append("Batch sequence completed.");
        info!(
            succeeded = stats.succeeded(),
            failed = stats.failed(),
            skipped = stats.skipped(),
            retried = stats.retried(),
            peak_concurrency = stats.peak_concurrency(),
            "batch complete"
        );

        Ok(stats)
    }

    /// Cancels downloads whose claim no longer holds and returns how many
    /// of them are still running.
    ///
    /// A claim stops holding when its item is removed, cleared or reaches a
    /// terminal state; the task itself exits shortly after.
    fn cancel_orphans(&self, in_flight: &HashMap<tokio::task::Id, Claim>) -> usize {
        let mut orphans = 0;
        for claim in in_flight.values() {
            if self.queue.holds_claim(&claim.id, claim.seq) {
                continue;
            }
            if !claim.cancel.is_cancelled() {
                debug!(item_id = %claim.id, "claim released; cancelling its task");
                claim.cancel.cancel();
            }
            orphans += 1;
        }
        orphans
    }

    /// Claims and spawns work until the limit is reached or nothing is pending.
    ///
    /// Orphaned downloads still occupy a slot, and an item whose ID has a
    /// live task is left pending so two tasks never write the same file.
    fn dispatch(
        &self,
        tasks: &mut JoinSet<FetchReport>,
        in_flight: &mut HashMap<tokio::task::Id, Claim>,
        abort: &CancellationToken,
        orphans: usize,
    ) {
        let limit = self.concurrency().saturating_sub(orphans);
        loop {
            let claimed = self.queue.claim_next_pending_where(limit, |item| {
                in_flight.values().all(|claim| claim.id != item.id)
            });
            let Some(item) = claimed else { break };
            debug!(item_id = %item.id, "dispatching item");

            let queue = self.queue.clone();
            let worker = Arc::clone(&self.worker);
            let log = Arc::clone(&self.log);
            let cancel = abort.child_token();
            let claim = Claim {
                id: item.id.clone(),
                seq: item.seq,
                cancel: cancel.clone(),
            };

            let handle = tasks.spawn(async move {
                worker.process(&queue, log.as_ref(), &item, &cancel).await
            });
            in_flight.insert(handle.id(), claim);
        }
    }

    fn settle(
        &self,
        joined: Result<(tokio::task::Id, FetchReport), JoinError>,
        in_flight: &mut HashMap<tokio::task::Id, Claim>,
        stats: &DownloadStats,
    ) {
        match joined {
            Ok((task_id, report)) => {
                in_flight.remove(&task_id);
                stats.record(&report);
                if self.halt_on_write_failure && report.recorded {
                    self.halt_on(&report, stats);
                }
            }
            Err(e) => {
                let id = in_flight.remove(&e.id()).map(|claim| claim.id);
                if e.is_cancelled() {
                    debug!(item_id = ?id, "download task cancelled");
                    return;
                }
                warn!(item_id = ?id, error = %e, "download task panicked");
                if let Some(id) = id {
                    let message = "Download task ended unexpectedly";
                    self.log.append(&format!("Error [{id}]: {message}"));
                    match self.queue.fail(&id, FailureKind::Internal, message) {
                        Ok(_) => stats.increment_failed(),
                        Err(qe) => warn!(item_id = %id, error = %qe, "failed to mark item failed"),
                    }
                }
            }
        }
    }

    /// Stops claiming after the first local write failure.
    fn halt_on(&self, report: &FetchReport, stats: &DownloadStats) {
        let FetchOutcome::Failed {
            kind: FailureKind::WriteFailure,
            message,
        } = &report.outcome
        else {
            return;
        };
        if stats
            .halt_reason
            .set(format!("{}: {message}", report.id))
            .is_ok()
        {
            warn!(item_id = %report.id, error = %message, "write failure; halting batch");
            self.log
                .append(&format!("Halting batch after write failure on {}.", report.id));
            self.stop();
        }
    }

    fn lock_control(&self) -> std::sync::MutexGuard<'_, BatchControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate_concurrency(value: usize) -> Result<(), EngineError> {
    if (MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::InvalidConcurrency { value })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::HttpClient;
    use crate::log::EventLog;
    use crate::queue::{QueueItem, QueueStatus};

    fn engine_with(queue: &Queue, concurrency: usize) -> Result<DownloadEngine, EngineError> {
        let worker = Arc::new(FetchWorker::new(HttpClient::new(), "./unused"));
        DownloadEngine::new(
            queue.clone(),
            worker,
            Arc::new(EventLog::default()),
            EngineOptions {
                concurrency,
                ..EngineOptions::default()
            },
        )
    }

    #[test]
    fn test_engine_new_valid_concurrency() {
        let queue = Queue::new();
        for value in ALLOWED_CONCURRENCY_LIMITS {
            let engine = engine_with(&queue, value).unwrap();
            assert_eq!(engine.concurrency(), value);
        }
    }

    #[test]
    fn test_engine_new_invalid_concurrency() {
        let queue = Queue::new();
        assert_eq!(
            engine_with(&queue, 0).unwrap_err(),
            EngineError::InvalidConcurrency { value: 0 }
        );
        assert_eq!(
            engine_with(&queue, 17).unwrap_err(),
            EngineError::InvalidConcurrency { value: 17 }
        );
    }

    #[test]
    fn test_set_concurrency_validates() {
        let engine = engine_with(&Queue::new(), 3).unwrap();
        engine.set_concurrency(8).unwrap();
        assert_eq!(engine.concurrency(), 8);
        assert!(engine.set_concurrency(0).is_err());
        assert_eq!(engine.concurrency(), 8);
    }

    #[test]
    fn test_stop_and_abort_when_idle_are_noops() {
        let engine = engine_with(&Queue::new(), 3).unwrap();
        assert!(!engine.stop());
        assert!(!engine.abort());
        assert_eq!(engine.state(), BatchState::Idle);
    }

    #[tokio::test]
    async fn test_run_on_empty_queue_returns_zero_stats() {
        let engine = engine_with(&Queue::new(), 3).unwrap();
        let mut states = engine.subscribe();

        let stats = engine.run().await.unwrap();

        assert_eq!(stats.total(), 0);
        assert_eq!(engine.state(), BatchState::Idle);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), BatchState::Idle);
    }

    #[tokio::test]
    async fn test_run_ignores_terminal_items() {
        let queue = Queue::new();
        queue
            .enqueue(QueueItem::new("done", "https://x/p/done", "http://127.0.0.1:9/MP4"))
            .unwrap();
        let claimed = queue.claim_next_pending(1).unwrap();
        queue
            .fail(&claimed.id, FailureKind::NotFound, "File not found on CDN (404)")
            .unwrap();

        let engine = engine_with(&queue, 3).unwrap();
        let stats = engine.run().await.unwrap();

        assert_eq!(stats.total(), 0);
        assert_eq!(queue.get("done").unwrap().status, QueueStatus::Error);
    }

    #[test]
    fn test_download_stats_record() {
        let stats = DownloadStats::new();
        let report = |outcome, retries| FetchReport {
            id: "a".to_string(),
            outcome,
            retries,
            recorded: true,
        };

        stats.record(&report(FetchOutcome::Downloaded { bytes: 1 }, 2));
        stats.record(&report(FetchOutcome::Skipped, 0));
        stats.record(&report(
            FetchOutcome::Failed {
                kind: FailureKind::EmptyBody,
                message: "empty".to_string(),
            },
            1,
        ));

        stats.record(&FetchReport {
            recorded: false,
            ..report(FetchOutcome::Downloaded { bytes: 1 }, 0)
        });

        assert_eq!(stats.succeeded(), 1);
        assert_eq!(stats.skipped(), 1);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.retried(), 3);
        assert_eq!(stats.total(), 3);
        assert_eq!(stats.halt_reason(), None);
    }

    #[test]
    fn test_engine_error_display() {
        let msg = EngineError::InvalidConcurrency { value: 0 }.to_string();
        assert!(msg.contains("invalid concurrency"));
        assert!(msg.contains("16"));
    }

    #[test]
    fn test_default_concurrency_constant() {
        assert_eq!(DEFAULT_CONCURRENCY, 3);
        assert!(ALLOWED_CONCURRENCY_LIMITS.contains(&DEFAULT_CONCURRENCY));
    }

    #[test]
    fn test_batch_state_display() {
        assert_eq!(BatchState::Stopping.to_string(), "stopping");
    }
}
