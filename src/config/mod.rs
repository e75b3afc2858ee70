//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::DEFAULT_GLOBAL_TTL_SECONDS;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "nodecache";
const ENV_PREFIX: &str = "NODECACHE";
const DEFAULT_MAX_ENTRIES: usize = 10_000;
const DEFAULT_PRIVATE_META_PREFIX: &str = "_";
const DEFAULT_POST_TYPES: &[&str] = &["post", "page"];
const DEFAULT_TAXONOMIES: &[&str] = &["category", "post_tag"];

/// Command-line arguments for the nodecache binary.
#[derive(Debug, Parser)]
#[command(
    name = "nodecache",
    version,
    about = "GraphQL result cache with node-level invalidation"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "NODECACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the cache key of a request.
    Key(KeyArgs),
    /// Populate an engine from a scenario file and replay its mutation events.
    Replay(ReplayArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct KeyArgs {
    /// GraphQL document.
    #[arg(long, value_name = "DOCUMENT")]
    pub query: Option<String>,

    /// Persisted query id.
    #[arg(long = "query-id", value_name = "ID")]
    pub query_id: Option<String>,

    /// Variables as a JSON object.
    #[arg(long, value_name = "JSON")]
    pub variables: Option<String>,

    /// Operation name.
    #[arg(long = "operation", value_name = "NAME")]
    pub operation_name: Option<String>,

    /// JSON object mapping persisted query ids to documents.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub documents: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct ReplayArgs {
    /// Scenario file (JSON).
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub scenario: PathBuf,
}

/// Overrides applied after file and environment sources.
#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Enable or disable the result cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,

    /// Lifetime of cached responses.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS", global = true)]
    pub cache_ttl_seconds: Option<u64>,

    /// Capacity of the in-memory store.
    #[arg(long = "cache-max-entries", value_name = "COUNT", global = true)]
    pub cache_max_entries: Option<u64>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub global_ttl: Duration,
    pub max_entries: NonZeroUsize,
    pub tracked_post_types: Vec<String>,
    pub non_public_post_types: Vec<String>,
    pub tracked_taxonomies: Vec<String>,
    /// Empty disables prefix gating.
    pub private_meta_prefix: String,
    pub tracked_meta_keys: Vec<String>,
    pub ignored_meta_keys: Vec<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    global_ttl_seconds: Option<u64>,
    max_entries: Option<u64>,
    tracked_post_types: Option<Vec<String>>,
    non_public_post_types: Option<Vec<String>>,
    tracked_taxonomies: Option<Vec<String>>,
    private_meta_prefix: Option<String>,
    tracked_meta_keys: Option<Vec<String>>,
    ignored_meta_keys: Option<Vec<String>>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.cache_ttl_seconds {
            self.cache.global_ttl_seconds = Some(seconds);
        }
        if let Some(max) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self { logging, cache })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_seconds = cache
        .global_ttl_seconds
        .unwrap_or(DEFAULT_GLOBAL_TTL_SECONDS);
    if ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "cache.global_ttl_seconds",
            "must be greater than zero",
        ));
    }

    let max_entries = non_zero_usize(
        cache.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES as u64),
        "cache.max_entries",
    )?;

    let tracked_post_types = names(cache.tracked_post_types, DEFAULT_POST_TYPES);
    if tracked_post_types.is_empty() {
        return Err(LoadError::invalid(
            "cache.tracked_post_types",
            "at least one content type must be tracked",
        ));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        global_ttl: Duration::from_secs(ttl_seconds),
        max_entries,
        tracked_post_types,
        non_public_post_types: names(cache.non_public_post_types, &[]),
        tracked_taxonomies: names(cache.tracked_taxonomies, DEFAULT_TAXONOMIES),
        private_meta_prefix: cache
            .private_meta_prefix
            .unwrap_or_else(|| DEFAULT_PRIVATE_META_PREFIX.to_string()),
        tracked_meta_keys: names(cache.tracked_meta_keys, &[]),
        ignored_meta_keys: names(cache.ignored_meta_keys, &[]),
    })
}

/// Trimmed, non-empty entries of `values`, or `defaults` when unset.
fn names(values: Option<Vec<String>>, defaults: &[&str]) -> Vec<String> {
    match values {
        Some(values) => values
            .into_iter()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .collect(),
        None => defaults.iter().map(|value| value.to_string()).collect(),
    }
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests;
