//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::NonZeroU32,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "popcache";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_REDIS_CONNECT_RETRY_SECS: u64 = 60;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_RANKING_LIMIT: usize = 10;

/// Command-line arguments for the popcache binary.
#[derive(Debug, Parser)]
#[command(name = "popcache", version, about = "Popularity ranking cache")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "POPCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Apply database migrations for the comment and action tables.
    #[command(name = "migrate")]
    Migrate(MigrateArgs),
    /// Register the store scripts used by the cache.
    #[command(name = "init-scripts")]
    InitScripts(InitScriptsArgs),
    /// Print the ranking of an asset's comments for an action type.
    #[command(name = "ranking")]
    Ranking(RankingArgs),
    /// Apply a created or deleted action to a cached ranking.
    #[command(name = "record")]
    Record(RecordArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StoreOverrides {
    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,

    /// Override the sorted-set store backend (redis|memory).
    #[arg(long = "store", value_name = "BACKEND")]
    pub store: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Clone)]
pub struct InitScriptsArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub store: StoreOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct RankingArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub store: StoreOverrides,

    /// Asset whose comments are ranked.
    #[arg(value_name = "ASSET_ID")]
    pub asset_id: String,

    /// Action type the ranking counts (e.g. LIKE, FLAG).
    #[arg(long = "action", value_name = "TYPE")]
    pub action_type: String,

    /// Maximum number of entries to print.
    #[arg(long, default_value_t = DEFAULT_RANKING_LIMIT)]
    pub limit: usize,

    /// Number of leading entries to skip.
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Print entries as JSON.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct RecordArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub store: StoreOverrides,

    /// Asset the comment belongs to.
    #[arg(value_name = "ASSET_ID")]
    pub asset_id: String,

    /// Comment the action was applied to.
    #[arg(value_name = "COMMENT_ID")]
    pub comment_id: String,

    /// Action type (e.g. LIKE, FLAG).
    #[arg(long = "action", value_name = "TYPE")]
    pub action_type: String,

    /// Record a deletion instead of a creation.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub delete: bool,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub redis: RedisSettings,
    pub database: DatabaseSettings,
    pub popular: PopularSettings,
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
pub struct RedisSettings {
    pub url: String,
    pub connect_retry: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct PopularSettings {
    pub top_level_only: bool,
    pub store: StoreKind,
}

/// Sorted-set store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Redis,
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreKind::Redis),
            "memory" => Ok(StoreKind::Memory),
            other => Err(format!("unknown store backend `{other}`")),
        }
    }
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

    builder = builder.add_source(Environment::with_prefix("POPCACHE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_command_overrides(&cli.command);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    redis: RawRedisSettings,
    database: RawDatabaseSettings,
    popular: RawPopularSettings,
}

impl RawSettings {
    fn apply_command_overrides(&mut self, command: &Command) {
        match command {
            Command::Migrate(args) => {
                self.apply_logging_overrides(&args.logging);
                self.apply_database_override(&args.database);
            }
            Command::InitScripts(args) => {
                self.apply_logging_overrides(&args.logging);
                self.apply_store_overrides(&args.store);
            }
            Command::Ranking(args) => {
                self.apply_logging_overrides(&args.logging);
                self.apply_database_override(&args.database);
                self.apply_store_overrides(&args.store);
            }
            Command::Record(args) => {
                self.apply_logging_overrides(&args.logging);
                self.apply_database_override(&args.database);
                self.apply_store_overrides(&args.store);
            }
        }
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_store_overrides(&mut self, overrides: &StoreOverrides) {
        if let Some(url) = overrides.redis_url.as_ref() {
            self.redis.url = Some(url.clone());
        }
        if let Some(store) = overrides.store.as_ref() {
            self.popular.store = Some(store.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            redis,
            database,
            popular,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let redis = build_redis_settings(redis)?;
        let database = build_database_settings(database)?;
        let popular = build_popular_settings(popular)?;

        Ok(Self {
            logging,
            redis,
            database,
            popular,
        })
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

fn build_redis_settings(redis: RawRedisSettings) -> Result<RedisSettings, LoadError> {
    let url = redis
        .url
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
    if url.is_empty() {
        return Err(LoadError::invalid("redis.url", "url must not be empty"));
    }

    let retry_secs = redis
        .connect_retry_seconds
        .unwrap_or(DEFAULT_REDIS_CONNECT_RETRY_SECS);
    if retry_secs == 0 {
        return Err(LoadError::invalid(
            "redis.connect_retry_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RedisSettings {
        url,
        connect_retry: Duration::from_secs(retry_secs),
    })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_value = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = non_zero_u32(max_value.into(), "database.max_connections")?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_popular_settings(popular: RawPopularSettings) -> Result<PopularSettings, LoadError> {
    let store = match popular.store {
        Some(value) => StoreKind::from_str(&value)
            .map_err(|reason| LoadError::invalid("popular.store", reason))?,
        None => StoreKind::Redis,
    };

    Ok(PopularSettings {
        top_level_only: popular.top_level_only.unwrap_or(true),
        store,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    url: Option<String>,
    connect_retry_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPopularSettings {
    top_level_only: Option<bool>,
    store: Option<String>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
