//! CLI entry point for sora-batch.

use std::process::ExitCode;

use clap::Parser;

mod app;
mod cli;

use cli::Cli;

/// Process outcome mapped to the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Nothing failed.
    Success,
    /// Some items failed, others succeeded.
    Partial,
    /// Every attempted item failed, the run was interrupted, or startup failed.
    Failure,
}

impl ProcessExit {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Partial => 2,
            Self::Failure => 1,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse before tracing so --help and --version stay clean.
    let cli = Cli::parse();

    match app::run(cli).await {
        Ok(outcome) => ExitCode::from(outcome.code()),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(ProcessExit::Failure.code())
        }
    }
}
