//! Sora Batch Core Library
//!
//! This library provides the core functionality for the `sora-batch` tool,
//! which turns a list of Sora share links into local `Sora_<id>.mp4` files
//! while keeping a bounded number of downloads in flight.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`parser`] - Share link splitting and video ID extraction
//! - [`queue`] - In-memory queue store with atomic claim/update operations
//! - [`download`] - Fetch worker, retry policy and the batch scheduler
//! - [`log`] - Bounded operational event log
//! - [`enrich`] - Optional decorative tagging of queued IDs

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod enrich;
pub mod log;
pub mod parser;
pub mod queue;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use download::{
    ALLOWED_CONCURRENCY_LIMITS, BatchState, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES,
    DEFAULT_RESOURCE_BASE, DownloadEngine, DownloadStats, EngineError, EngineOptions,
    ExistingFilePolicy, FailureKind, FetchError, FetchOutcome, FetchReport, FetchWorker,
    HttpClient, RetryDecision, RetryPolicy, output_filename, resource_url,
};
pub use enrich::{EnrichError, Enricher, GeminiEnricher, NoopEnricher, spawn_enrichment};
pub use log::{EventLog, EventSink, LogEntry};
pub use parser::{ExtractedLink, ParseError, ParseResult, extract_id, parse_input};
pub use queue::{
    CompletedDownload, IngestReport, Queue, QueueCounts, QueueError, QueueItem, QueueStatus,
};
