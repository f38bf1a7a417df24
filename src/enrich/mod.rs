//! Optional decorative tagging of queued videos.
//!
//! An [`Enricher`] maps video IDs to short descriptive tags. Tagging runs on
//! its own task after ingestion and only ever touches the `tag` field of an
//! item: a slow, failing or missing enricher never delays or changes a
//! download.

mod error;
mod gemini;

pub use error::EnrichError;
pub use gemini::{DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL, GeminiEnricher};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::queue::Queue;

/// Source of decorative tags for video IDs.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Returns a tag per ID, or `None` when tagging is unavailable.
    ///
    /// The map may omit IDs; extra keys are ignored by the caller.
    async fn tag_batch(&self, ids: &[String]) -> Option<HashMap<String, String>>;
}

/// Enricher that never tags anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEnricher;

#[async_trait]
impl Enricher for NoopEnricher {
    async fn tag_batch(&self, _ids: &[String]) -> Option<HashMap<String, String>> {
        None
    }
}

/// Tags `ids` in the background and writes the tags onto the queue.
///
/// The returned handle resolves to the number of items tagged. Tags for IDs
/// outside `ids`, or for items removed in the meantime, are dropped.
pub fn spawn_enrichment(
    queue: Queue,
    enricher: Arc<dyn Enricher>,
    ids: Vec<String>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        if ids.is_empty() {
            return 0;
        }
        let Some(tags) = enricher.tag_batch(&ids).await else {
            debug!(count = ids.len(), "no tags returned");
            return 0;
        };
        let mut tagged = 0;
        for id in &ids {
            if let Some(tag) = tags.get(id) {
                if queue.set_tag(id, tag.as_str()) {
                    tagged += 1;
                }
            }
        }
        info!(tagged, requested = ids.len(), "applied enrichment tags");
        tagged
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::queue::QueueItem;

    struct FixedEnricher(HashMap<String, String>);

    #[async_trait]
    impl Enricher for FixedEnricher {
        async fn tag_batch(&self, _ids: &[String]) -> Option<HashMap<String, String>> {
            Some(self.0.clone())
        }
    }

    fn queue_with(ids: &[&str]) -> Queue {
        let queue = Queue::new();
        for id in ids {
            queue
                .enqueue(QueueItem::new(*id, format!("https://x/p/{id}"), "https://cdn/MP4"))
                .unwrap();
        }
        queue
    }

    #[tokio::test]
    async fn test_noop_enricher_tags_nothing() {
        let queue = queue_with(&["a"]);
        let tagged = spawn_enrichment(queue.clone(), Arc::new(NoopEnricher), vec!["a".into()])
            .await
            .unwrap();
        assert_eq!(tagged, 0);
        assert_eq!(queue.get("a").unwrap().tag, None);
    }

    #[tokio::test]
    async fn test_spawn_enrichment_applies_only_requested_ids() {
        let queue = queue_with(&["a", "b", "c"]);
        let tags = HashMap::from([
            ("a".to_string(), "Neon City".to_string()),
            ("c".to_string(), "Ocean Drift".to_string()),
            ("zzz".to_string(), "Unknown".to_string()),
        ]);

        let tagged = spawn_enrichment(
            queue.clone(),
            Arc::new(FixedEnricher(tags)),
            vec!["a".into(), "b".into()],
        )
        .await
        .unwrap();

        assert_eq!(tagged, 1);
        assert_eq!(queue.get("a").unwrap().tag.as_deref(), Some("Neon City"));
        assert_eq!(queue.get("b").unwrap().tag, None);
        assert_eq!(queue.get("c").unwrap().tag, None);
    }

    #[tokio::test]
    async fn test_spawn_enrichment_skips_removed_items() {
        let queue = queue_with(&["a"]);
        queue.remove("a");
        let tags = HashMap::from([("a".to_string(), "Gone".to_string())]);

        let tagged = spawn_enrichment(queue, Arc::new(FixedEnricher(tags)), vec!["a".into()])
            .await
            .unwrap();

        assert_eq!(tagged, 0);
    }
}
