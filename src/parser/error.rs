//! Error types for input parsing operations.

use thiserror::Error;

/// Maximum candidate length to accept (standard browser limit).
/// Longer candidates are rejected before any pattern matching runs.
pub const MAX_URL_LENGTH: usize = 2000;

/// Errors that can occur while turning raw input into queueable links.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Neither the share-link nor the CDN grammar matched the candidate.
    #[error(
        "no video ID found in '{input}'\n  Suggestion: Use a share link (.../p/<id>) or a CDN link (.../MP4/<id>.mp4)"
    )]
    NoIdentifier {
        /// The candidate that failed extraction.
        input: String,
    },

    /// Candidate exceeds maximum allowed length.
    #[error("input too long ({length} chars, max {max}): {preview}...")]
    TooLong {
        /// Truncated candidate for display.
        preview: String,
        /// Actual length.
        length: usize,
        /// Maximum allowed.
        max: usize,
    },
}

impl ParseError {
    /// Creates a `NoIdentifier` error for a candidate that matched no grammar.
    #[must_use]
    pub fn no_identifier(input: &str) -> Self {
        Self::NoIdentifier {
            input: input.to_string(),
        }
    }

    /// Creates a `TooLong` error for candidates exceeding the maximum length.
    #[must_use]
    pub fn too_long(input: &str) -> Self {
        Self::TooLong {
            preview: input.chars().take(50).collect(),
            length: input.len(),
            max: MAX_URL_LENGTH,
        }
    }
}
