//! Video ID extraction from share and CDN links.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

/// Share link grammar: `.../p/<id>`.
#[allow(clippy::expect_used)]
static SHARE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/p/([A-Za-z0-9_-]+)").expect("share link regex is valid") // Static pattern, safe to panic
});

/// Direct CDN grammar: `.../MP4/<id>.mp4`.
#[allow(clippy::expect_used)]
static CDN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/MP4/([A-Za-z0-9_-]+)\.mp4").expect("CDN link regex is valid") // Static pattern, safe to panic
});

/// Extracts the opaque video ID from a link.
///
/// The share grammar (`/p/<id>`) is tried first, then the CDN grammar
/// (`/MP4/<id>.mp4`). The ID is restricted to `[A-Za-z0-9_-]+`; anything
/// after the first character outside that class terminates it.
///
/// # Examples
///
/// ```
/// use sora_batch_core::parser::extract_id;
///
/// assert_eq!(extract_id("https://sora.chatgpt.com/p/s_68e1"), Some("s_68e1".to_string()));
/// assert_eq!(extract_id("https://cdn.example/MP4/def-456.mp4"), Some("def-456".to_string()));
/// assert_eq!(extract_id("https://example.com/video"), None);
/// ```
#[must_use]
pub fn extract_id(url: &str) -> Option<String> {
    let id = SHARE_PATTERN
        .captures(url)
        .or_else(|| CDN_PATTERN.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());
    trace!(url, id = ?id, "extracted video id");
    id
}
