//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroU32,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

#[cfg(test)]
mod tests;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "spola";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3100;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_HTTP_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_JOBS_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_BATCH_SIZE: u32 = 100;
const DEFAULT_DELIVERY_BATCH_LIMIT: u32 = 50;
const DEFAULT_DELIVERY_WARN_MINUTES: u64 = 60;
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 15;
const DEFAULT_JOB_BATCH_CONCURRENCY: u32 = 1;
const DEFAULT_JOB_DELIVERY_CONCURRENCY: u32 = 1;
const DEFAULT_CACHE_RESPONSE_LIMIT: usize = 500;
const DEFAULT_CACHE_TTL_SECONDS: u64 = 900;
const DEFAULT_CACHE_FLUSH_INTERVAL_MINUTES: u64 = 60;
const DEFAULT_CACHE_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Command-line arguments for the Spola binary.
#[derive(Debug, Parser)]
#[command(name = "spola", version, about = "Spola catalog sync server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SPOLA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the Spola HTTP service and background workers.
    Serve(Box<ServeArgs>),
    /// Drive fingerprint batches to completion, then exit.
    #[command(name = "fingerprintall")]
    FingerprintAll(FingerprintAllArgs),
    /// Clear all sync state: progress, ledger, flush boundary, feed buffer.
    #[command(name = "reset")]
    Reset(ResetArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct FingerprintAllArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Override the batch size for this run.
    #[arg(long = "batch-size", value_name = "COUNT")]
    pub batch_size: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct ResetArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

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

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the HTTP database pool size.
    #[arg(long = "database-http-max-connections", value_name = "COUNT")]
    pub database_http_max_connections: Option<u32>,

    /// Override the jobs database pool size.
    #[arg(long = "database-jobs-max-connections", value_name = "COUNT")]
    pub database_jobs_max_connections: Option<u32>,

    /// Override the fingerprint batch size.
    #[arg(long = "sync-batch-size", value_name = "COUNT")]
    pub sync_batch_size: Option<u32>,

    /// Override the remote backend base URL.
    #[arg(long = "remote-base-url", value_name = "URL")]
    pub remote_base_url: Option<String>,

    /// Override the remote backend API key.
    #[arg(long = "remote-api-key", value_name = "KEY", env = "SPOLA_REMOTE_API_KEY")]
    pub remote_api_key: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and
/// validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub sync: SyncSettings,
    pub remote: RemoteSettings,
    pub cache: CacheSettings,
    pub jobs: JobsSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
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
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub http_max_connections: NonZeroU32,
    pub jobs_max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub batch_size: NonZeroU32,
    pub delivery_batch_limit: NonZeroU32,
    pub delivery_warn_window: Duration,
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub response_limit: usize,
    pub ttl_seconds: u64,
    pub flush_interval_minutes: u64,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub batch_concurrency: NonZeroU32,
    pub delivery_concurrency: NonZeroU32,
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

    builder = builder.add_source(Environment::with_prefix("SPOLA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::FingerprintAll(args)) => {
            raw.apply_database_override(&args.database);
            if let Some(batch_size) = args.batch_size {
                raw.sync.batch_size = Some(batch_size);
            }
        }
        Some(Command::Reset(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Parse CLI arguments and load settings.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    sync: RawSyncSettings,
    remote: RawRemoteSettings,
    cache: RawCacheSettings,
    jobs: RawJobsSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    http_max_connections: Option<u32>,
    jobs_max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSyncSettings {
    batch_size: Option<u32>,
    delivery_batch_limit: Option<u32>,
    delivery_warn_minutes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRemoteSettings {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    response_limit: Option<usize>,
    ttl_seconds: Option<u64>,
    flush_interval_minutes: Option<u64>,
    max_body_bytes: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    batch_concurrency: Option<u32>,
    delivery_concurrency: Option<u32>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(count) = overrides.database_http_max_connections {
            self.database.http_max_connections = Some(count);
        }
        if let Some(count) = overrides.database_jobs_max_connections {
            self.database.jobs_max_connections = Some(count);
        }
        if let Some(batch_size) = overrides.sync_batch_size {
            self.sync.batch_size = Some(batch_size);
        }
        if let Some(url) = overrides.remote_base_url.as_ref() {
            self.remote.base_url = Some(url.clone());
        }
        if let Some(key) = overrides.remote_api_key.as_ref() {
            self.remote.api_key = Some(key.clone());
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let host = raw.server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = raw.server.port.unwrap_or(DEFAULT_PORT);
        let addr = SocketAddr::from_str(&format!("{host}:{port}"))
            .map_err(|err| LoadError::invalid("server.host", err.to_string()))?;

        let graceful_shutdown = Duration::from_secs(
            raw.server
                .graceful_shutdown_seconds
                .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS),
        );

        let level = match raw.logging.level.as_deref() {
            None => LevelFilter::INFO,
            Some(text) => LevelFilter::from_str(text)
                .map_err(|err| LoadError::invalid("logging.level", err.to_string()))?,
        };
        let format = if raw.logging.json.unwrap_or(false) {
            LogFormat::Json
        } else {
            LogFormat::Compact
        };

        let database = DatabaseSettings {
            url: raw.database.url,
            http_max_connections: non_zero(
                "database.http_max_connections",
                raw.database
                    .http_max_connections
                    .unwrap_or(DEFAULT_DB_HTTP_MAX_CONNECTIONS),
            )?,
            jobs_max_connections: non_zero(
                "database.jobs_max_connections",
                raw.database
                    .jobs_max_connections
                    .unwrap_or(DEFAULT_DB_JOBS_MAX_CONNECTIONS),
            )?,
        };

        let sync = SyncSettings {
            batch_size: non_zero(
                "sync.batch_size",
                raw.sync.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            )?,
            delivery_batch_limit: non_zero(
                "sync.delivery_batch_limit",
                raw.sync
                    .delivery_batch_limit
                    .unwrap_or(DEFAULT_DELIVERY_BATCH_LIMIT),
            )?,
            delivery_warn_window: Duration::from_secs(
                raw.sync
                    .delivery_warn_minutes
                    .unwrap_or(DEFAULT_DELIVERY_WARN_MINUTES)
                    * 60,
            ),
        };

        let remote = RemoteSettings {
            base_url: raw
                .remote
                .base_url
                .unwrap_or_else(|| "http://127.0.0.1:9200/".to_string()),
            api_key: raw.remote.api_key,
            timeout_seconds: raw
                .remote
                .timeout_seconds
                .unwrap_or(DEFAULT_REMOTE_TIMEOUT_SECS),
        };

        let cache = CacheSettings {
            enabled: raw.cache.enabled.unwrap_or(true),
            response_limit: raw
                .cache
                .response_limit
                .unwrap_or(DEFAULT_CACHE_RESPONSE_LIMIT),
            ttl_seconds: raw.cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECONDS),
            flush_interval_minutes: raw
                .cache
                .flush_interval_minutes
                .unwrap_or(DEFAULT_CACHE_FLUSH_INTERVAL_MINUTES),
            max_body_bytes: raw
                .cache
                .max_body_bytes
                .unwrap_or(DEFAULT_CACHE_MAX_BODY_BYTES),
        };

        let jobs = JobsSettings {
            batch_concurrency: non_zero(
                "jobs.batch_concurrency",
                raw.jobs
                    .batch_concurrency
                    .unwrap_or(DEFAULT_JOB_BATCH_CONCURRENCY),
            )?,
            delivery_concurrency: non_zero(
                "jobs.delivery_concurrency",
                raw.jobs
                    .delivery_concurrency
                    .unwrap_or(DEFAULT_JOB_DELIVERY_CONCURRENCY),
            )?,
        };

        Ok(Settings {
            server: ServerSettings {
                addr,
                graceful_shutdown,
            },
            logging: LoggingSettings { level, format },
            database,
            sync,
            remote,
            cache,
            jobs,
        })
    }
}

fn non_zero(key: &'static str, value: u32) -> Result<NonZeroU32, LoadError> {
    NonZeroU32::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
