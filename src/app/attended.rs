//! Attended mode: a line-oriented operator console on stdin.
//!
//! Each line is one [`ConsoleCommand`]. The batch runs on its own task, so
//! the console keeps accepting commands (add, stop, limit, ...) while
//! downloads are in flight. End of input behaves like `quit`.

use std::fmt::Write as _;
use std::io::{BufRead, Write};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use sora_batch_core::{
    ALLOWED_CONCURRENCY_LIMITS, BatchState, DownloadStats, EngineError, EventSink,
    ExistingFilePolicy,
};

use super::config::{FileConfig, Settings};
use super::exit_handler;
use super::session::Session;
use crate::ProcessExit;
use crate::cli::AttendedArgs;

const HELP: &str = "\
Commands:
  add <links>     queue share or CDN links (newline, comma or space separated)
  start           start downloading pending items
  stop            finish in-flight downloads, claim nothing new
  abort           cancel in-flight downloads
  retry <id>      move a failed item back to pending
  retry-all       move every failed item back to pending
  remove <id>     drop an item from the queue
  clear           drop every item
  limit <n>       set the concurrency limit (1, 2, 3, 4, 5, 8 or 16)
  export [file]   write the links of failed items to a file or stdout
  status          show the queue
  log             show the event log
  wait            block until the running batch finishes
  quit            stop gracefully and exit";

/// One console instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConsoleCommand {
    Add(String),
    Start,
    Stop,
    Abort,
    Retry(String),
    RetryAll,
    Remove(String),
    Clear,
    Limit(usize),
    Export(Option<PathBuf>),
    Status,
    Log,
    Wait,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(verb, rest)| (verb, rest.trim()));

        let required = |what: &str| {
            if rest.is_empty() {
                Err(format!("`{verb}` needs {what}"))
            } else {
                Ok(rest.to_string())
            }
        };

        match verb.to_ascii_lowercase().as_str() {
            "add" => required("links").map(Self::Add),
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "abort" => Ok(Self::Abort),
            "retry" => required("an id").map(Self::Retry),
            "retry-all" => Ok(Self::RetryAll),
            "remove" | "rm" => required("an id").map(Self::Remove),
            "clear" => Ok(Self::Clear),
            "limit" => {
                let value = required("a number")?;
                let limit = value
                    .parse::<usize>()
                    .ok()
                    .filter(|n| ALLOWED_CONCURRENCY_LIMITS.contains(n))
                    .ok_or_else(|| {
                        format!("limit must be one of {}", allowed_limits_list())
                    })?;
                Ok(Self::Limit(limit))
            }
            "export" => Ok(Self::Export(
                (!rest.is_empty()).then(|| PathBuf::from(rest)),
            )),
            "status" | "ls" => Ok(Self::Status),
            "log" => Ok(Self::Log),
            "wait" => Ok(Self::Wait),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("unknown command `{other}` (try `help`)")),
        }
    }
}

fn allowed_limits_list() -> String {
    ALLOWED_CONCURRENCY_LIMITS
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

type BatchHandle = JoinHandle<Result<DownloadStats, EngineError>>;

/// Executes console commands against one session, writing replies to `out`.
pub(crate) struct Console<W: Write> {
    session: Session,
    out: W,
    batch: Option<BatchHandle>,
}

impl<W: Write> Console<W> {
    pub(crate) fn new(session: Session, out: W) -> Self {
        Self {
            session,
            out,
            batch: None,
        }
    }

    /// Parses and executes one input line. Blank lines are ignored.
    pub(crate) async fn handle_line(&mut self, line: &str) -> Result<ControlFlow<()>> {
        if line.trim().is_empty() {
            return Ok(ControlFlow::Continue(()));
        }
        match line.parse::<ConsoleCommand>() {
            Ok(command) => self.execute(command).await,
            Err(message) => {
                writeln!(self.out, "error: {message}")?;
                Ok(ControlFlow::Continue(()))
            }
        }
    }

    pub(crate) async fn execute(&mut self, command: ConsoleCommand) -> Result<ControlFlow<()>> {
        debug!(?command, "console command");
        self.reap().await?;

        match command {
            ConsoleCommand::Add(text) => {
                let report = self.session.ingest(&text);
                writeln!(
                    self.out,
                    "Queued {} new, {} already queued.",
                    report.added.len(),
                    report.duplicates.len()
                )?;
            }
            ConsoleCommand::Start => self.start()?,
            ConsoleCommand::Stop => {
                if self.session.engine.stop() {
                    writeln!(self.out, "Stopping after in-flight downloads finish.")?;
                } else {
                    writeln!(self.out, "No batch is running.")?;
                }
            }
            ConsoleCommand::Abort => {
                if self.session.engine.abort() {
                    writeln!(self.out, "Aborting in-flight downloads.")?;
                } else {
                    writeln!(self.out, "No batch is running.")?;
                }
            }
            ConsoleCommand::Retry(id) => {
                if self.session.queue.reset_error(&id) {
                    self.session.log.append(&format!("Retrying {id}."));
                    let hint = self.start_hint();
                    writeln!(self.out, "{id} is pending again.{hint}")?;
                } else {
                    writeln!(self.out, "{id} is not a failed item.")?;
                }
            }
            ConsoleCommand::RetryAll => {
                let count = self.session.queue.reset_all_errors();
                if count == 0 {
                    writeln!(self.out, "No failed items.")?;
                } else {
                    self.session
                        .log
                        .append(&format!("Retrying {count} failed items."));
                    let hint = self.start_hint();
                    writeln!(self.out, "{count} items pending again.{hint}")?;
                }
            }
            ConsoleCommand::Remove(id) => {
                if self.session.queue.remove(&id) {
                    self.session.log.append(&format!("Removed {id} from queue."));
                    writeln!(self.out, "Removed {id}.")?;
                } else {
                    writeln!(self.out, "{id} is not in the queue.")?;
                }
            }
            ConsoleCommand::Clear => {
                let removed = self.session.queue.clear();
                self.session.log.append("Queue purged.");
                writeln!(self.out, "Removed {removed} items.")?;
            }
            ConsoleCommand::Limit(limit) => match self.session.engine.set_concurrency(limit) {
                Ok(()) => {
                    self.session
                        .log
                        .append(&format!("Concurrency limit set to {limit}."));
                    writeln!(self.out, "Concurrency limit is now {limit}.")?;
                }
                Err(e) => writeln!(self.out, "error: {e}")?,
            },
            ConsoleCommand::Export(path) => self.export(path)?,
            ConsoleCommand::Status => {
                let status = self.status_report();
                self.out.write_all(status.as_bytes())?;
            }
            ConsoleCommand::Log => {
                for entry in self.session.log.entries() {
                    writeln!(self.out, "{entry}")?;
                }
            }
            ConsoleCommand::Wait => {
                if !self.wait().await? {
                    writeln!(self.out, "No batch is running.")?;
                }
            }
            ConsoleCommand::Help => writeln!(self.out, "{HELP}")?,
            ConsoleCommand::Quit => {
                self.shutdown().await?;
                return Ok(ControlFlow::Break(()));
            }
        }
        self.out.flush()?;
        Ok(ControlFlow::Continue(()))
    }

    fn start(&mut self) -> Result<()> {
        if self.batch.is_some() {
            writeln!(self.out, "A batch is already running.")?;
            return Ok(());
        }
        let pending = self.session.queue.counts().pending;
        if pending == 0 {
            writeln!(self.out, "Nothing pending.")?;
            return Ok(());
        }
        let engine = Arc::clone(&self.session.engine);
        self.batch = Some(tokio::spawn(async move { engine.run().await }));
        let limit = self.session.engine.concurrency();
        writeln!(self.out, "Started: {pending} pending, limit {limit}.")?;
        Ok(())
    }

    fn export(&mut self, path: Option<PathBuf>) -> Result<()> {
        let urls = self.session.queue.failed_source_urls();
        if urls.is_empty() {
            self.session.log.append("No failed URLs found.");
            writeln!(self.out, "No failed URLs found.")?;
            return Ok(());
        }
        let text = self.session.queue.export_failed();
        match path {
            Some(path) => {
                std::fs::write(&path, format!("{text}\n"))
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                writeln!(
                    self.out,
                    "Wrote {} failed URLs to {}.",
                    urls.len(),
                    path.display()
                )?;
            }
            None => writeln!(self.out, "{text}")?,
        }
        self.session.log.append("Failed URLs copied.");
        Ok(())
    }

    fn status_report(&self) -> String {
        let counts = self.session.queue.counts();
        let mut report = String::new();
        let _ = writeln!(
            report,
            "State: {}, limit {}. Total {}: {} pending, {} processing, {} done, {} failed.",
            self.session.engine.state(),
            self.session.engine.concurrency(),
            counts.total(),
            counts.pending,
            counts.processing,
            counts.success,
            counts.error
        );
        for item in self.session.queue.snapshot() {
            let _ = writeln!(report, "  {item}");
        }
        report
    }

    fn start_hint(&self) -> &'static str {
        if self.batch.is_some() {
            ""
        } else {
            " Use `start` to download."
        }
    }

    /// Collects the batch task if it already finished.
    async fn reap(&mut self) -> Result<()> {
        if self.batch.as_ref().is_some_and(JoinHandle::is_finished) {
            self.wait().await?;
        }
        Ok(())
    }

    /// Awaits the running batch and reports its totals. Returns false if
    /// there was none.
    async fn wait(&mut self) -> Result<bool> {
        let Some(mut handle) = self.batch.take() else {
            return Ok(false);
        };
        let joined = tokio::select! {
            joined = &mut handle => joined,
            Ok(()) = tokio::signal::ctrl_c() => {
                warn!("Interrupt received; aborting");
                self.session.engine.abort();
                handle.await
            }
        };
        match joined {
            Ok(Ok(stats)) => writeln!(
                self.out,
                "Batch finished: {} downloaded, {} skipped, {} failed.",
                stats.succeeded(),
                stats.skipped(),
                stats.failed()
            )?,
            Ok(Err(e)) => writeln!(self.out, "error: {e}")?,
            Err(e) => {
                warn!(error = %e, "batch task ended unexpectedly");
                writeln!(self.out, "error: batch task ended unexpectedly")?;
            }
        }
        Ok(true)
    }

    /// Gracefully stops any running batch and waits for it.
    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        if self.session.engine.state() != BatchState::Idle {
            self.session.engine.stop();
        }
        self.wait().await?;
        self.out.flush()?;
        Ok(())
    }

    /// Cancels in-flight downloads and waits for the batch to wind down.
    pub(crate) async fn interrupt(&mut self) -> Result<()> {
        self.session.engine.abort();
        self.shutdown().await
    }

    pub(crate) fn exit_outcome(&self) -> ProcessExit {
        let counts = self.session.queue.counts();
        exit_handler::determine_exit_outcome(counts.success, counts.error)
    }
}

/// Reads stdin lines on a plain thread so a pending read never holds up
/// runtime shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

pub(crate) async fn run(args: &AttendedArgs, file: Option<&FileConfig>) -> Result<ProcessExit> {
    let settings = Settings::resolve(&args.common, None, file)?;
    let existing = if args.skip_existing {
        ExistingFilePolicy::Skip
    } else {
        ExistingFilePolicy::Overwrite
    };
    let session = Session::build(&settings, existing, false)?;
    let mut console = Console::new(session, std::io::stdout());
    writeln!(
        console.out,
        "sora-batch attended mode. Saving to {}. Type `help` for commands.",
        settings.output_dir.display()
    )?;
    console.out.flush()?;

    let mut lines = spawn_stdin_reader();
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    debug!("end of input");
                    console.shutdown().await?;
                    break;
                };
                let line = line.context("Failed to read from stdin")?;
                if console.handle_line(&line).await?.is_break() {
                    break;
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                warn!("Interrupt received; aborting");
                console.interrupt().await?;
                break;
            }
        }
    }

    Ok(console.exit_outcome())
}
