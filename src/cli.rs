//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Batch download Sora videos from share links.
///
/// Sora-batch turns a list of Sora share links (or direct CDN links) into
/// local `Sora_<id>.mp4` files, keeping a bounded number of downloads in
/// flight.
#[derive(Parser, Debug)]
#[command(name = "sora-batch")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Read defaults from this config file instead of the standard location
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Run modes.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download every link of an input file, skipping videos already on disk
    Run(RunArgs),

    /// Operator console on stdin (add, start, stop, retry, export, ...)
    Attended(AttendedArgs),
}

/// Options shared by both modes. Unset values fall back to the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Directory videos are saved into [default: downloads]
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Maximum concurrent downloads (1-16) [default: 3]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub concurrency: Option<u8>,

    /// Automatic retries for transient failures (0-10) [default: 0]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// CDN base that video IDs are resolved against
    #[arg(long, value_name = "URL")]
    pub resource_base: Option<String>,

    /// Tag queued videos with short AI-generated themes (needs GEMINI_API_KEY)
    #[arg(long)]
    pub enrich: bool,
}

/// Unattended mode options.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// File of links separated by newlines, commas or spaces [default: sora_movies.txt]
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Download again even if the video is already on disk
    #[arg(long)]
    pub overwrite: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Attended mode options.
#[derive(Args, Debug, Clone, Default)]
pub struct AttendedArgs {
    /// Report videos already on disk as done instead of downloading them again
    #[arg(long)]
    pub skip_existing: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}
