//! Types representing parsed input links and results.

use std::fmt;

use super::error::ParseError;

/// A single link whose video ID was extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    /// Original candidate text (trimmed), kept as the item's source URL.
    pub raw: String,
    /// Extracted opaque video ID.
    pub id: String,
}

impl ExtractedLink {
    /// Creates a new extracted link.
    #[must_use]
    pub fn new(raw: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ExtractedLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.id, self.raw)
    }
}

/// Collection of links extracted from one block of input.
#[derive(Debug, Default)]
pub struct ParseResult {
    /// Links with a recognised video ID, in input order.
    pub items: Vec<ExtractedLink>,
    /// Candidates that could not be used (for logging).
    pub skipped: Vec<ParseError>,
    /// Candidates dropped because they repeated an earlier candidate or ID.
    pub repeated: usize,
}

impl ParseResult {
    /// Creates a new empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a successfully extracted link.
    pub fn add_item(&mut self, item: ExtractedLink) {
        self.items.push(item);
    }

    /// Adds a skipped candidate.
    pub fn add_skipped(&mut self, error: ParseError) {
        self.skipped.push(error);
    }

    /// Returns true if no links were extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns count of extracted links.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns count of skipped candidates.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Returns the extracted IDs in input order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }
}

impl fmt::Display for ParseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} link(s) extracted, {} skipped, {} repeated",
            self.len(),
            self.skipped_count(),
            self.repeated
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_result_counts_and_ids() {
        let mut result = ParseResult::new();
        assert!(result.is_empty());

        result.add_item(ExtractedLink::new("https://x/p/a", "a"));
        result.add_item(ExtractedLink::new("https://x/p/b", "b"));
        result.add_skipped(ParseError::no_identifier("junk"));

        assert_eq!(result.len(), 2);
        assert_eq!(result.skipped_count(), 1);
        assert_eq!(result.ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            result.to_string(),
            "2 link(s) extracted, 1 skipped, 0 repeated"
        );
    }

    #[test]
    fn test_extracted_link_display() {
        let link = ExtractedLink::new("https://x/p/abc", "abc");
        assert_eq!(link.to_string(), "[abc] https://x/p/abc");
    }
}
