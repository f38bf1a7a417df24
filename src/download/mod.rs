//! Video download: HTTP fetching, retry policy and the batch scheduler.
//!
//! This module turns claimed queue items into `Sora_<id>.mp4` files with
//! streaming writes, so large videos never sit in memory.
//!
//! # Features
//!
//! - Streaming downloads through a `.part` file renamed on completion
//! - Skip or overwrite policy for videos already on disk
//! - Configurable timeouts (30s connect, 10min total by default)
//! - Optional automatic retry of transient failures (off by default)
//! - Bounded concurrency with stop and abort controls
//!
//! # Example
//!
//! ```no_run
//! use sora_batch_core::download::{HttpClient, output_path};
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new();
//! let dest = output_path(Path::new("./downloads"), "abc123");
//! let bytes = client
//!     .download_to_file("https://oscdn2.dyysy.com/MP4/abc123.mp4", &dest, &CancellationToken::new())
//!     .await?;
//! println!("Downloaded {bytes} bytes to {}", dest.display());
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod engine;
mod error;
mod filename;
mod retry;
mod worker;

pub use client::HttpClient;
pub use constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL, DEFAULT_RESOURCE_BASE, REQUEST_TIMEOUT_SECS,
};
pub use engine::{
    ALLOWED_CONCURRENCY_LIMITS, BatchState, DEFAULT_CONCURRENCY, DownloadEngine, DownloadStats,
    EngineError, EngineOptions, MAX_CONCURRENCY, MIN_CONCURRENCY,
};
pub use error::{FailureKind, FetchError};
pub use filename::{output_filename, output_path, partial_path, resource_url};
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, MAX_RETRIES_LIMIT, RetryDecision, RetryPolicy,
    classify_error,
};
pub use worker::{ExistingFilePolicy, FetchOutcome, FetchReport, FetchWorker};
