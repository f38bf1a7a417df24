//! Queue item types and status definitions.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::download::{FailureKind, resource_url};

/// Status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be claimed by the scheduler.
    Pending,
    /// Claimed; a fetch worker owns it.
    Processing,
    /// Downloaded (or already present on disk).
    Success,
    /// Failed; stays here until the operator resets or removes it.
    Error,
}

impl QueueStatus {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// Returns true for states a batch run never leaves on its own.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// Returns true if `self -> next` is an edge of the item state machine.
    ///
    /// `Pending -> Processing` is listed here but is only ever taken through
    /// [`Queue::claim_next_pending`](super::Queue::claim_next_pending).
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Success | Self::Error)
                | (Self::Error, Self::Pending)
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            _ => Err(format!("invalid queue status: {s}")),
        }
    }
}

/// A single item in the download queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItem {
    /// Opaque video ID; unique within the queue.
    pub id: String,
    /// Link the operator supplied.
    pub source_url: String,
    /// Location the video is fetched from.
    pub resource_url: String,
    /// Current lifecycle state.
    pub status: QueueStatus,
    /// Classified failure message, only while `status` is `Error`.
    pub error_message: Option<String>,
    /// Failure classification, only while `status` is `Error`.
    pub failure: Option<FailureKind>,
    /// When the item was ingested.
    pub created_at: DateTime<Utc>,
    /// Insertion sequence; lower values are dispatched first.
    pub seq: u64,
    /// How many times the item moved from `Pending` to `Processing`.
    pub claims: u32,
    /// Where the video was saved on success.
    pub saved_path: Option<PathBuf>,
    /// Bytes written on success.
    pub bytes: Option<u64>,
    /// True when success came from an existing file, without a request.
    pub skipped: bool,
    /// Decorative tag from the enrichment service.
    pub tag: Option<String>,
}

impl QueueItem {
    /// Creates a pending item for `id`, fetched from `resource_base`.
    ///
    /// The insertion sequence is assigned when the item is enqueued.
    #[must_use]
    pub fn new(id: impl Into<String>, source_url: impl Into<String>, resource_base: &str) -> Self {
        let id = id.into();
        Self {
            resource_url: resource_url(resource_base, &id),
            id,
            source_url: source_url.into(),
            status: QueueStatus::Pending,
            error_message: None,
            failure: None,
            created_at: Utc::now(),
            seq: 0,
            claims: 0,
            saved_path: None,
            bytes: None,
            skipped: false,
            tag: None,
        }
    }

    /// Returns the size of the saved file in megabytes, if known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn size_mb(&self) -> Option<f64> {
        self.bytes.map(|bytes| bytes as f64 / 1024.0 / 1024.0)
    }
}

impl fmt::Display for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<10} {}", self.status, self.id)?;
        if let Some(tag) = &self.tag {
            write!(f, " ({tag})")?;
        }
        if let Some(message) = &self.error_message {
            write!(f, " - {message}")?;
        } else if self.skipped {
            write!(f, " - already on disk")?;
        } else if let Some(mb) = self.size_mb() {
            write!(f, " - {mb:.2} MB")?;
        }
        Ok(())
    }
}
