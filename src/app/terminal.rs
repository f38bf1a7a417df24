//! Tracing subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

/// Picks the default filter level from the verbosity flags.
///
/// `-q` wins over `-v`; `RUST_LOG` overrides both in [`init_tracing`].
pub(crate) fn default_level(quiet: bool, verbose: u8) -> &'static str {
    if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

pub(crate) fn no_color_env_requested() -> bool {
    std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty())
}

/// Installs the global subscriber writing to stderr, keeping stdout for
/// results and console output.
pub(crate) fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(!no_color_env_requested())
        .with_target(false)
        .with_env_filter(filter)
        .try_init();
}
