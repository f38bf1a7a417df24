//! Error types for the download module.
//!
//! [`FetchError`] carries the context of one failed attempt; [`FailureKind`]
//! is the classification stored on the queue item.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed download, recorded on the queue item.
///
/// Links that never yield an ID are rejected earlier by the parser
/// ([`ParseError`](crate::parser::ParseError)) and never get a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The CDN answered 404.
    NotFound,
    /// The CDN answered another non-success status.
    NetworkError(u16),
    /// The CDN answered success with a zero-byte body.
    EmptyBody,
    /// Connection, timeout or body transfer failure.
    Transport,
    /// The video could not be written locally.
    WriteFailure,
    /// The batch was aborted while the download was in flight.
    Cancelled,
    /// The download task ended without reporting (panic).
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::NetworkError(status) => write!(f, "network_error({status})"),
            Self::EmptyBody => write!(f, "empty_body"),
            Self::Transport => write!(f, "transport_error"),
            Self::WriteFailure => write!(f, "write_failure"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Errors that can occur during one download attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The resource does not exist on the CDN.
    #[error("File not found on CDN (404)")]
    NotFound {
        /// The URL that was requested.
        url: String,
    },

    /// Non-success HTTP status other than 404.
    #[error("Network error ({status})")]
    HttpStatus {
        /// The URL that was requested.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Success status but nothing in the body.
    #[error("Downloaded file is empty (0 bytes)")]
    EmptyBody {
        /// The URL that was requested.
        url: String,
    },

    /// Network-level error (DNS, connection refused, TLS, broken body stream).
    #[error("Connection failed: {source}")]
    Network {
        /// The URL that was requested.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("Request timed out")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Local file system error while saving.
    #[error("Could not write {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The batch was aborted mid-download.
    #[error("Download cancelled")]
    Cancelled {
        /// The URL that was being downloaded.
        url: String,
    },
}

impl FetchError {
    /// Creates an error for a non-success status, mapping 404 to `NotFound`.
    pub fn from_status(url: impl Into<String>, status: u16) -> Self {
        let url = url.into();
        if status == 404 {
            Self::NotFound { url }
        } else {
            Self::HttpStatus { url, status }
        }
    }

    /// Creates a network error from a reqwest error, mapping timeouts to `Timeout`.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates an empty-body error.
    pub fn empty_body(url: impl Into<String>) -> Self {
        Self::EmptyBody { url: url.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Returns the classification stored on the queue item.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::HttpStatus { status, .. } => FailureKind::NetworkError(*status),
            Self::EmptyBody { .. } => FailureKind::EmptyBody,
            Self::Network { .. } | Self::Timeout { .. } => FailureKind::Transport,
            Self::Io { .. } => FailureKind::WriteFailure,
            Self::Cancelled { .. } => FailureKind::Cancelled,
        }
    }
}

// No From<reqwest::Error> / From<std::io::Error>: every variant needs the url
// or path, which the source errors do not carry.
