//! Input parsing module for turning pasted text into video links.
//!
//! Raw input is split on newlines, commas and whitespace; every remaining
//! candidate is run through [`extract_id`]. Candidates without a recognised
//! ID are reported as skipped and never reach the queue.
//!
//! # Example
//!
//! ```
//! use sora_batch_core::parser::parse_input;
//!
//! let result = parse_input("https://x/p/abc123\nhttps://x/MP4/def-456.mp4");
//! assert_eq!(result.ids(), vec!["abc123", "def-456"]);
//! ```

mod error;
mod input;
mod url;

pub use error::{MAX_URL_LENGTH, ParseError};
pub use input::{ExtractedLink, ParseResult};
pub use url::extract_id;

use std::collections::HashSet;
use tracing::{debug, info};

/// Splits raw input into trimmed, non-empty candidates.
///
/// Separators are newlines, commas and any whitespace.
#[must_use]
pub fn split_candidates(input: &str) -> Vec<&str> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .collect()
}

/// Parses raw text input and extracts video links.
///
/// Repeated candidates, and candidates whose ID was already seen earlier in
/// the same input, are counted in [`ParseResult::repeated`] and dropped.
#[tracing::instrument(skip(input), fields(input_len = input.len()))]
#[must_use]
pub fn parse_input(input: &str) -> ParseResult {
    let mut result = ParseResult::new();
    let mut seen_raw: HashSet<&str> = HashSet::new();
    let mut seen_ids: HashSet<String> = HashSet::new();

    for candidate in split_candidates(input) {
        if !seen_raw.insert(candidate) {
            result.repeated += 1;
            continue;
        }

        if candidate.len() > MAX_URL_LENGTH {
            debug!(length = candidate.len(), "candidate too long");
            result.add_skipped(ParseError::too_long(candidate));
            continue;
        }

        match extract_id(candidate) {
            Some(id) if seen_ids.contains(&id) => {
                debug!(%id, candidate, "id already extracted from earlier candidate");
                result.repeated += 1;
            }
            Some(id) => {
                seen_ids.insert(id.clone());
                result.add_item(ExtractedLink::new(candidate, id));
            }
            None => {
                debug!(candidate, "no video id in candidate");
                result.add_skipped(ParseError::no_identifier(candidate));
            }
        }
    }

    info!(
        extracted = result.len(),
        skipped = result.skipped_count(),
        repeated = result.repeated,
        "parsed input"
    );
    result
}
