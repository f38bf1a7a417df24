//! Error types for the enrichment module.

use thiserror::Error;

/// Errors from a tagging request. Never surfaced to the download path.
#[derive(Debug, Error)]
pub enum EnrichError {
    /// No API key was configured.
    #[error("no API key configured (set GEMINI_API_KEY or API_KEY)")]
    MissingApiKey,

    /// The request could not be sent or its body not read.
    #[error("tagging request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("tagging service returned HTTP {status}")]
    Status {
        /// The HTTP status code.
        status: u16,
    },

    /// The answer did not contain a JSON object of tags.
    #[error("unexpected tagging response: {reason}")]
    InvalidResponse {
        /// What was wrong with the response.
        reason: String,
    },
}

impl EnrichError {
    /// Creates an invalid-response error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }
}
