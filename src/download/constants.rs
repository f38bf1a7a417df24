//! Constants for the download module (CDN location, timeouts, scheduling).

use std::time::Duration;

/// Default CDN base that video IDs are resolved against.
pub const DEFAULT_RESOURCE_BASE: &str = "https://oscdn2.dyysy.com/MP4";

/// Prefix of every saved video file.
pub const OUTPUT_PREFIX: &str = "Sora_";

/// Extension of every saved video file.
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Suffix of the temporary file a body is streamed into before the rename.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default total request timeout, body included (10 minutes for large videos).
pub const REQUEST_TIMEOUT_SECS: u64 = 600;

/// Fallback re-evaluation interval of the scheduler when no queue change arrives.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Bytes per megabyte, for size reporting.
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
