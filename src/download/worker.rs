//! Fetch worker: downloads one claimed item and reports the outcome.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::constants::BYTES_PER_MB;
use super::error::{FailureKind, FetchError};
use super::filename::output_path;
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use super::HttpClient;
use crate::log::EventSink;
use crate::queue::{CompletedDownload, Queue, QueueItem};

/// What to do when `Sora_<id>.mp4` is already on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingFilePolicy {
    /// Download again and replace the file.
    #[default]
    Overwrite,
    /// Report success without a request.
    Skip,
}

/// Final outcome of one worker run.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The body was saved.
    Downloaded {
        /// Size of the saved file.
        bytes: u64,
    },
    /// The destination already existed and the skip policy applied.
    Skipped,
    /// The item ended in `Error`.
    Failed {
        /// Classification stored on the item.
        kind: FailureKind,
        /// Operator-facing message stored on the item.
        message: String,
    },
}

/// Report returned to the scheduler for statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    /// ID of the processed item.
    pub id: String,
    /// What happened.
    pub outcome: FetchOutcome,
    /// Automatic retries performed after the first attempt.
    pub retries: u32,
    /// False when the item left the queue before its outcome was stored.
    pub recorded: bool,
}

/// Downloads claimed queue items into an output directory.
///
/// One worker is shared (behind an `Arc`) by every task of a batch; it holds
/// no per-item state.
#[derive(Debug, Clone)]
pub struct FetchWorker {
    client: HttpClient,
    output_dir: PathBuf,
    existing: ExistingFilePolicy,
    retry_policy: RetryPolicy,
}

impl FetchWorker {
    /// Creates a worker that overwrites existing files and never auto-retries.
    #[must_use]
    pub fn new(client: HttpClient, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            output_dir: output_dir.into(),
            existing: ExistingFilePolicy::default(),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Sets the existing-file policy.
    #[must_use]
    pub fn with_existing_policy(mut self, existing: ExistingFilePolicy) -> Self {
        self.existing = existing;
        self
    }

    /// Sets the automatic retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Returns the directory videos are saved into.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Returns the existing-file policy.
    #[must_use]
    pub fn existing_policy(&self) -> ExistingFilePolicy {
        self.existing
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Processes one claimed item to completion.
    ///
    /// The outcome is written back to `queue`, then one line is appended to
    /// `log`. Both are skipped if the item was removed meanwhile. Per-item
    /// failures never propagate: they end up on the item.
    #[instrument(skip_all, fields(item_id = %item.id))]
    pub async fn process(
        &self,
        queue: &Queue,
        log: &dyn EventSink,
        item: &QueueItem,
        cancel: &CancellationToken,
    ) -> FetchReport {
        let dest = output_path(&self.output_dir, &item.id);

        if self.existing == ExistingFilePolicy::Skip
            && tokio::fs::try_exists(&dest).await.unwrap_or(false)
        {
            let bytes = tokio::fs::metadata(&dest)
                .await
                .map(|meta| meta.len())
                .unwrap_or(0);
            let recorded = record_update(queue, item, |queue| {
                queue.complete(
                    &item.id,
                    CompletedDownload {
                        path: dest,
                        bytes,
                        skipped: true,
                    },
                )
            });
            if recorded {
                log.append(&format!("Skipping existing file: {}", item.id));
            }
            return FetchReport {
                id: item.id.clone(),
                outcome: FetchOutcome::Skipped,
                retries: 0,
                recorded,
            };
        }

        let (result, retries) = self.download_with_retry(item, &dest, cancel).await;

        // The queue sees the outcome before the log line does.
        let (outcome, recorded) = match result {
            Ok(bytes) => {
                let recorded = record_update(queue, item, |queue| {
                    queue.complete(
                        &item.id,
                        CompletedDownload {
                            path: dest,
                            bytes,
                            skipped: false,
                        },
                    )
                });
                if recorded {
                    log.append(&format!(
                        "Downloaded: {} ({:.2} MB)",
                        item.id,
                        megabytes(bytes)
                    ));
                }
                (FetchOutcome::Downloaded { bytes }, recorded)
            }
            Err(e) => {
                let kind = e.kind();
                let message = e.to_string();
                let recorded = record_update(queue, item, |queue| {
                    queue.fail(&item.id, kind, message.clone())
                });
                if recorded {
                    log.append(&format!("Error [{}]: {message}", item.id));
                }
                (FetchOutcome::Failed { kind, message }, recorded)
            }
        };

        FetchReport {
            id: item.id.clone(),
            outcome,
            retries,
            recorded,
        }
    }

    /// Downloads a video with retry logic for transient errors.
    ///
    /// Returns the byte count or the last error, plus the number of retries.
    async fn download_with_retry(
        &self,
        item: &QueueItem,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> (Result<u64, FetchError>, u32) {
        if let Err(e) = tokio::fs::create_dir_all(&self.output_dir).await {
            return (Err(FetchError::io(self.output_dir.clone(), e)), 0);
        }

        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(attempt, url = %item.resource_url, "attempting download");

            let error = match self
                .client
                .download_to_file(&item.resource_url, dest, cancel)
                .await
            {
                Ok(bytes) => return (Ok(bytes), attempt - 1),
                Err(e) => e,
            };

            match self.retry_policy.should_retry(classify_error(&error), attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    info!(
                        url = %item.resource_url,
                        attempt = next_attempt,
                        max_attempts = self.retry_policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying download"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => {
                            return (Err(FetchError::cancelled(&item.resource_url)), attempt - 1);
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url = %item.resource_url, %reason, "not retrying download");
                    return (Err(error), attempt - 1);
                }
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Applies `update` only while this worker's claim on `item` still holds.
/// Returns true if the outcome landed on the item.
///
/// An item removed (and possibly queued again under the same ID) while the
/// download ran keeps whatever state the queue gave it since.
fn record_update(
    queue: &Queue,
    item: &QueueItem,
    update: impl FnOnce(&Queue) -> crate::queue::Result<bool>,
) -> bool {
    if !queue.holds_claim(&item.id, item.seq) {
        debug!(item_id = %item.id, "claim released before the outcome was recorded");
        return false;
    }
    match update(queue) {
        Ok(recorded) => recorded,
        Err(e) => {
            warn!(item_id = %item.id, error = %e, "failed to record download outcome");
            false
        }
    }
}
