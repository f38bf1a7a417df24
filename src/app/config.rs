//! Configuration loading and CLI merge.
//!
//! Precedence: built-in defaults < TOML config file < CLI flags.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use url::Url;

use sora_batch_core::download::{CONNECT_TIMEOUT_SECS, MAX_RETRIES_LIMIT, REQUEST_TIMEOUT_SECS};
use sora_batch_core::log::DEFAULT_LOG_CAPACITY;
use sora_batch_core::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DEFAULT_RESOURCE_BASE};

use crate::cli::CommonArgs;

const DEFAULT_OUTPUT_DIR: &str = "downloads";
const DEFAULT_INPUT_FILE: &str = "sora_movies.txt";
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const CONFIG_DIR_NAME: &str = "sora-batch";

/// TOML-backed file configuration. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileConfig {
    /// Default output directory for downloads.
    pub(crate) output_dir: Option<PathBuf>,
    /// Default input file for unattended runs.
    pub(crate) input_file: Option<PathBuf>,
    /// Default concurrency limit.
    pub(crate) concurrency: Option<usize>,
    /// Default automatic retries for transient failures.
    pub(crate) max_retries: Option<u32>,
    /// CDN base URL.
    pub(crate) resource_base: Option<String>,
    /// HTTP connect timeout in seconds.
    pub(crate) connect_timeout_secs: Option<u64>,
    /// Total request timeout in seconds.
    pub(crate) request_timeout_secs: Option<u64>,
    /// Scheduler fallback poll interval in milliseconds.
    pub(crate) poll_interval_ms: Option<u64>,
    /// Number of operational log entries kept.
    pub(crate) log_capacity: Option<usize>,
    /// Tag queued videos with AI-generated themes.
    pub(crate) enrich: Option<bool>,
}

impl FileConfig {
    /// Validates config values against runtime constraints.
    pub(crate) fn validate(&self) -> Result<()> {
        validate_range("concurrency", self.concurrency, 1, 16)?;
        validate_range("max_retries", self.max_retries, 0, MAX_RETRIES_LIMIT)?;
        validate_range("connect_timeout_secs", self.connect_timeout_secs, 1, 3600)?;
        validate_range("request_timeout_secs", self.request_timeout_secs, 1, 3600)?;
        validate_range("poll_interval_ms", self.poll_interval_ms, 10, 60_000)?;
        validate_range("log_capacity", self.log_capacity, 1, 10_000)?;
        if let Some(base) = &self.resource_base {
            validate_resource_base(base)
                .with_context(|| format!("Invalid config value for `resource_base`: {base}"))?;
        }
        Ok(())
    }
}

fn validate_range<T>(field: &str, value: Option<T>, min: T, max: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    let Some(value) = value else {
        return Ok(());
    };
    if value < min || value > max {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

fn validate_resource_base(base: &str) -> Result<()> {
    let url = Url::parse(base).context("not a valid URL")?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("unsupported scheme `{}`", url.scheme());
    }
    Ok(())
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/sora-batch/config.toml`
/// 2. `$HOME/.config/sora-batch/config.toml`
#[must_use]
pub(crate) fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join(CONFIG_DIR_NAME)
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR_NAME)
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist; the default path is optional.
pub(crate) fn load_file_config(explicit: Option<&Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = explicit {
        return parse_config_file(path).map(Some);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => parse_config_file(&path).map(Some),
        _ => Ok(None),
    }
}

fn parse_config_file(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_config_str(&raw).with_context(|| format!("Invalid config file {}", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Settings {
    pub(crate) output_dir: PathBuf,
    pub(crate) input_file: PathBuf,
    pub(crate) concurrency: usize,
    pub(crate) max_retries: u32,
    pub(crate) resource_base: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) request_timeout: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) log_capacity: usize,
    pub(crate) enrich: bool,
}

impl Settings {
    /// Merges CLI values over file values over defaults.
    pub(crate) fn resolve(
        common: &CommonArgs,
        input: Option<&Path>,
        file: Option<&FileConfig>,
    ) -> Result<Self> {
        let file = file.cloned().unwrap_or_default();

        let resource_base = common
            .resource_base
            .clone()
            .or(file.resource_base)
            .unwrap_or_else(|| DEFAULT_RESOURCE_BASE.to_string());
        validate_resource_base(&resource_base)
            .with_context(|| format!("Invalid resource base: {resource_base}"))?;

        Ok(Self {
            output_dir: common
                .output
                .clone()
                .or(file.output_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            input_file: input
                .map(Path::to_path_buf)
                .or(file.input_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_INPUT_FILE)),
            concurrency: common
                .concurrency
                .map(usize::from)
                .or(file.concurrency)
                .unwrap_or(DEFAULT_CONCURRENCY),
            max_retries: common
                .max_retries
                .map(u32::from)
                .or(file.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            resource_base,
            connect_timeout: Duration::from_secs(
                file.connect_timeout_secs.unwrap_or(CONNECT_TIMEOUT_SECS),
            ),
            request_timeout: Duration::from_secs(
                file.request_timeout_secs.unwrap_or(REQUEST_TIMEOUT_SECS),
            ),
            poll_interval: Duration::from_millis(
                file.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            log_capacity: file.log_capacity.unwrap_or(DEFAULT_LOG_CAPACITY),
            enrich: common.enrich || file.enrich.unwrap_or(false),
        })
    }
}
