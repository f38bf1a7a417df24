//! Unattended mode: download every link of an input file, then exit.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use sora_batch_core::{DownloadStats, EventSink, ExistingFilePolicy, Queue, QueueStatus};

use super::config::{FileConfig, Settings};
use super::exit_handler;
use super::session::Session;
use crate::ProcessExit;
use crate::cli::RunArgs;

/// A missing input file, an unusable output directory or any item that
/// cannot be saved locally ends the run with an error.
pub(crate) async fn run(args: &RunArgs, file: Option<&FileConfig>) -> Result<ProcessExit> {
    let settings = Settings::resolve(&args.common, args.input.as_deref(), file)?;

    if !tokio::fs::try_exists(&settings.input_file)
        .await
        .unwrap_or(false)
    {
        bail!("Input file not found: {}", settings.input_file.display());
    }
    let content = tokio::fs::read_to_string(&settings.input_file)
        .await
        .with_context(|| format!("Failed to read input file {}", settings.input_file.display()))?;
    tokio::fs::create_dir_all(&settings.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create output directory {}",
                settings.output_dir.display()
            )
        })?;

    let existing = if args.overwrite {
        ExistingFilePolicy::Overwrite
    } else {
        ExistingFilePolicy::Skip
    };
    let session = Session::build(&settings, existing, true)?;

    session.ingest(&content);
    let total = session.queue.len();
    session.log.append(&format!("Found {total} URLs to process"));
    if total == 0 {
        info!("Nothing to download");
        return Ok(ProcessExit::Success);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let signal_task = {
        let engine = Arc::clone(&session.engine);
        let interrupted = Arc::clone(&interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::SeqCst);
                warn!("Interrupt received; finishing in-flight downloads (press Ctrl-C again to abort)");
                engine.stop();
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                engine.abort();
            }
        })
    };

    let stats = session.engine.run().await?;
    signal_task.abort();

    print_summary(&mut std::io::stdout().lock(), &session.queue, &stats)
        .context("Failed to write summary")?;

    if let Some(reason) = stats.halt_reason() {
        bail!("Run halted by a write failure: {reason}");
    }

    if interrupted.load(Ordering::SeqCst) {
        warn!(
            done = stats.succeeded() + stats.skipped(),
            total, "Interrupted. Run again to fetch the rest."
        );
        return Ok(ProcessExit::Failure);
    }

    Ok(exit_handler::determine_exit_outcome(
        stats.succeeded() + stats.skipped(),
        stats.failed(),
    ))
}

/// Writes one line per failed item, then the totals.
pub(crate) fn print_summary(
    out: &mut impl Write,
    queue: &Queue,
    stats: &DownloadStats,
) -> std::io::Result<()> {
    for item in queue.snapshot() {
        if item.status == QueueStatus::Error {
            writeln!(
                out,
                "FAILED {}: {}",
                item.id,
                item.error_message.as_deref().unwrap_or("unknown error")
            )?;
        }
    }
    writeln!(
        out,
        "Done: {} downloaded, {} skipped, {} failed",
        stats.succeeded(),
        stats.skipped(),
        stats.failed()
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sora_batch_core::{FailureKind, QueueItem};

    #[test]
    fn test_print_summary_lists_failures() {
        let queue = Queue::new();
        for id in ["a", "b"] {
            queue
                .enqueue(QueueItem::new(id, format!("https://x/p/{id}"), "https://cdn/MP4"))
                .unwrap();
        }
        queue.claim_next_pending(2).unwrap();
        queue.claim_next_pending(2).unwrap();
        queue
            .fail("b", FailureKind::NotFound, "HTTP 404 Not Found")
            .unwrap();

        let mut out = Vec::new();
        print_summary(&mut out, &queue, &DownloadStats::new()).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("FAILED b: HTTP 404 Not Found"));
        assert!(!text.contains("FAILED a"));
        assert!(text.ends_with("Done: 0 downloaded, 0 skipped, 0 failed\n"));
    }
}
