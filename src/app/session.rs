//! Builds the queue, log, worker and engine for one invocation.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use sora_batch_core::{
    DownloadEngine, EngineOptions, Enricher, EventLog, EventSink, ExistingFilePolicy, FetchWorker,
    GeminiEnricher, HttpClient, IngestReport, ParseError, Queue, RetryPolicy, parse_input,
    spawn_enrichment,
};

use super::config::Settings;

/// Everything a run mode needs, wired from resolved [`Settings`].
pub(crate) struct Session {
    pub(crate) queue: Queue,
    pub(crate) log: Arc<EventLog>,
    pub(crate) engine: Arc<DownloadEngine>,
    enricher: Option<Arc<dyn Enricher>>,
    resource_base: String,
}

impl Session {
    /// `halt_on_write_failure` ends a batch at the first item that cannot be
    /// saved locally.
    pub(crate) fn build(
        settings: &Settings,
        existing: ExistingFilePolicy,
        halt_on_write_failure: bool,
    ) -> Result<Self> {
        let client = HttpClient::try_new(settings.connect_timeout, settings.request_timeout)
            .context("Failed to build HTTP client")?;
        let worker = FetchWorker::new(client, &settings.output_dir)
            .with_existing_policy(existing)
            .with_retry_policy(RetryPolicy::with_max_retries(settings.max_retries));

        let queue = Queue::new();
        let log = Arc::new(EventLog::new(settings.log_capacity));
        let engine = DownloadEngine::new(
            queue.clone(),
            Arc::new(worker),
            Arc::clone(&log) as Arc<dyn EventSink>,
            EngineOptions {
                concurrency: settings.concurrency,
                poll_interval: settings.poll_interval,
                halt_on_write_failure,
            },
        )?;

        let enricher = if settings.enrich {
            build_enricher()?
        } else {
            None
        };

        Ok(Self {
            queue,
            log,
            engine: Arc::new(engine),
            enricher,
            resource_base: settings.resource_base.clone(),
        })
    }

    /// Parses `text`, queues every new link and starts tagging in the background.
    pub(crate) fn ingest(&self, text: &str) -> IngestReport {
        let parsed = parse_input(text);
        for skipped in &parsed.skipped {
            self.log.append(&skipped_message(skipped));
        }
        if parsed.is_empty() {
            self.log.append("No valid Sora URLs detected in the input.");
            return IngestReport::default();
        }

        let report = self.queue.ingest(&parsed, &self.resource_base);
        if !report.added.is_empty() {
            self.log
                .append(&format!("Added {} video URLs to queue.", report.added.len()));
        }
        if !report.duplicates.is_empty() {
            self.log.append(&format!(
                "Ignored {} links already in queue.",
                report.duplicates.len()
            ));
        }

        if let Some(enricher) = &self.enricher
            && !report.added.is_empty()
        {
            drop(spawn_enrichment(
                self.queue.clone(),
                Arc::clone(enricher),
                report.added.clone(),
            ));
        }
        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) fn test_session() -> Session {
    let settings =
        Settings::resolve(&crate::cli::CommonArgs::default(), None, None).unwrap();
    Session::build(&settings, ExistingFilePolicy::Overwrite, false).unwrap()
}

fn skipped_message(error: &ParseError) -> String {
    match error {
        ParseError::NoIdentifier { input } => format!("Could not extract ID from URL: {input}"),
        ParseError::TooLong { preview, length, .. } => {
            format!("Ignored input of {length} characters: {preview}...")
        }
    }
}

fn build_enricher() -> Result<Option<Arc<dyn Enricher>>> {
    let gemini = GeminiEnricher::from_env().context("Failed to build enrichment client")?;
    if gemini.is_configured() {
        Ok(Some(Arc::new(gemini)))
    } else {
        warn!("enrichment requested but neither GEMINI_API_KEY nor API_KEY is set");
        Ok(None)
    }
}
