//! Error types for queue operations.

use thiserror::Error;

use super::QueueStatus;

/// Errors that can occur during queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// An item with the same video ID is already queued.
    #[error("video '{0}' is already in the queue")]
    DuplicateId(String),

    /// An item with the same source link is already queued.
    #[error("link '{0}' is already in the queue")]
    DuplicateSourceUrl(String),

    /// The requested status change is not an edge of the item state machine.
    #[error(
        "invalid status transition for '{id}': {from} -> {to}\n  Suggestion: {suggestion}"
    )]
    InvalidTransition {
        /// The item that was targeted.
        id: String,
        /// Status the item currently holds.
        from: QueueStatus,
        /// Status that was requested.
        to: QueueStatus,
        /// How to reach the requested status instead.
        suggestion: &'static str,
    },
}

impl QueueError {
    /// Creates an `InvalidTransition` error with a suggestion fitting the edge.
    #[must_use]
    pub fn invalid_transition(id: impl Into<String>, from: QueueStatus, to: QueueStatus) -> Self {
        let suggestion = match (from, to) {
            (QueueStatus::Pending, QueueStatus::Processing) => {
                "Pending items are claimed by the scheduler, not updated directly"
            }
            (QueueStatus::Success | QueueStatus::Processing, QueueStatus::Pending) => {
                "Remove the item and add the link again to download it once more"
            }
            _ => "Only failed items can be reset, and only claimed items can finish",
        };
        Self::InvalidTransition {
            id: id.into(),
            from,
            to,
            suggestion,
        }
    }
}
