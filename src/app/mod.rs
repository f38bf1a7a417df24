//! Binary-side wiring: configuration, run modes and exit codes.

mod attended;
mod config;
mod exit_handler;
mod session;
mod terminal;
mod unattended;

use anyhow::Result;
use tracing::debug;

use crate::ProcessExit;
use crate::cli::{Cli, Command};

/// Runs the parsed command line to completion.
pub(crate) async fn run(cli: Cli) -> Result<ProcessExit> {
    terminal::init_tracing(terminal::default_level(cli.quiet, cli.verbose));
    debug!(?cli, "CLI arguments parsed");

    let file = config::load_file_config(cli.config.as_deref())?;
    if file.is_some() {
        debug!("loaded config file");
    }

    match &cli.command {
        Command::Run(args) => unattended::run(args, file.as_ref()).await,
        Command::Attended(args) => attended::run(args, file.as_ref()).await,
    }
}
