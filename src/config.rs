//! Process configuration for the agent and the collector
//!
//! Every setting can come from a command-line flag, an environment
//! variable or a JSON config file. Flags win over the environment (clap
//! handles both), either wins over the file, and the file wins over the
//! built-in default. Durations in the file are human-readable (`"10s"`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use ip_network::IpNetwork;
use serde::Deserialize;
use tracing::trace;

use crate::api::middleware::subnet::parse_subnet;
use crate::envelope::ContentFormat;

const DEFAULT_ADDRESS: &str = "localhost:8080";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_RATE_LIMIT: usize = 2;
const DEFAULT_EXTRACTION_WORKERS: usize = 2;
const DEFAULT_STORE_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_STORE_FILE: &str = "tmp/metrics-db.json";

/// Reporting agent
#[derive(Debug, Clone, Parser)]
#[command(name = "relay-agent", version, about = "Samples runtime and host metrics and ships them to a collector")]
pub struct AgentArgs {
    /// Collector address (host:port or URL)
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Seconds between samples
    #[arg(short = 'p', long, env = "POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Seconds between reports
    #[arg(short = 'r', long, env = "REPORT_INTERVAL")]
    pub report_interval: Option<u64>,

    /// HMAC secret for the HashSHA256 header
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// Concurrent deliveries (dispatch workers)
    #[arg(short = 'l', long, env = "RATE_LIMIT")]
    pub rate_limit: Option<usize>,

    /// Concurrent sampler loops
    #[arg(long, env = "EXTRACTION_WORKERS")]
    pub extraction_workers: Option<usize>,

    /// PEM public key of the collector; enables body encryption
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// Send all metrics in one request per cycle
    #[arg(long, env = "SEND_BATCH", action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub batch: Option<bool>,

    /// Encoding of single-metric requests
    #[arg(long, env = "CONTENT_FORMAT", value_enum)]
    pub format: Option<ContentFormat>,

    /// gzip request bodies
    #[arg(long, env = "COMPRESS", action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub compress: Option<bool>,

    /// JSON config file
    #[arg(short = 'c', long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Agent settings as read from the JSON config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentFileConfig {
    pub address: Option<String>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub report_interval: Option<Duration>,
    pub key: Option<String>,
    pub rate_limit: Option<usize>,
    pub extraction_workers: Option<usize>,
    pub crypto_key: Option<PathBuf>,
    pub batch: Option<bool>,
    pub format: Option<ContentFormat>,
    pub compress: Option<bool>,
}

/// Resolved agent configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub address: String,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub key: Option<String>,
    pub rate_limit: usize,
    pub extraction_workers: usize,
    pub crypto_key: Option<PathBuf>,
    pub batch: bool,
    pub format: ContentFormat,
    pub compress: bool,
    pub log_level: String,
}

impl AgentConfig {
    /// Parse the process arguments and environment, then merge the config
    /// file
    pub fn load() -> Result<Self> {
        Self::resolve(AgentArgs::parse())
    }

    pub fn resolve(args: AgentArgs) -> Result<Self> {
        let file: AgentFileConfig = match &args.config {
            Some(path) => read_json(path)?,
            None => AgentFileConfig::default(),
        };

        let config = Self {
            address: non_empty(args.address)
                .or(non_empty(file.address))
                .unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
            poll_interval: args
                .poll_interval
                .map(Duration::from_secs)
                .or(file.poll_interval)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            report_interval: args
                .report_interval
                .map(Duration::from_secs)
                .or(file.report_interval)
                .unwrap_or(DEFAULT_REPORT_INTERVAL),
            key: non_empty(args.key).or(non_empty(file.key)),
            rate_limit: args.rate_limit.or(file.rate_limit).unwrap_or(DEFAULT_RATE_LIMIT),
            extraction_workers: args
                .extraction_workers
                .or(file.extraction_workers)
                .unwrap_or(DEFAULT_EXTRACTION_WORKERS),
            crypto_key: non_empty_path(args.crypto_key).or(non_empty_path(file.crypto_key)),
            batch: args.batch.or(file.batch).unwrap_or(true),
            format: args.format.or(file.format).unwrap_or_default(),
            compress: args.compress.or(file.compress).unwrap_or(true),
            log_level: args.log_level,
        };

        if config.poll_interval.is_zero() {
            bail!("poll interval must be positive");
        }
        if config.report_interval.is_zero() {
            bail!("report interval must be positive");
        }
        if config.rate_limit == 0 {
            bail!("rate limit must be at least 1");
        }

        trace!("resolved agent config: {:?}", config);
        Ok(config)
    }
}

/// Metrics collector
#[derive(Debug, Clone, Parser)]
#[command(name = "relay-server", version, about = "Receives and stores metrics from reporting agents")]
pub struct ServerArgs {
    /// Listen address
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Seconds between snapshots; 0 writes after every update
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    pub store_interval: Option<u64>,

    /// Snapshot file
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    pub file_storage_path: Option<PathBuf>,

    /// Load the snapshot file on start
    #[arg(short = 'r', long, env = "RESTORE", action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub restore: Option<bool>,

    /// SQLite database (path or sqlite: URL); replaces the snapshot file
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// HMAC secret for the HashSHA256 header
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// PEM PKCS#8 private key; enables body decryption
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// Only accept agents whose X-Real-IP is in this CIDR
    #[arg(short = 't', long, env = "TRUSTED_SUBNET")]
    pub trusted_subnet: Option<String>,

    /// JSON config file
    #[arg(short = 'c', long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Collector settings as read from the JSON config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerFileConfig {
    pub address: Option<String>,
    #[serde(with = "humantime_serde")]
    pub store_interval: Option<Duration>,
    pub store_file: Option<PathBuf>,
    pub restore: Option<bool>,
    pub database_dsn: Option<String>,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<String>,
}

/// Resolved collector configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub address: String,
    /// Zero means write the snapshot after every mutation
    pub store_interval: Duration,
    pub store_file: PathBuf,
    pub restore: bool,
    pub database_dsn: Option<String>,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<IpNetwork>,
    pub log_level: String,
}

impl ServerConfig {
    pub fn load() -> Result<Self> {
        Self::resolve(ServerArgs::parse())
    }

    pub fn resolve(args: ServerArgs) -> Result<Self> {
        let file: ServerFileConfig = match &args.config {
            Some(path) => read_json(path)?,
            None => ServerFileConfig::default(),
        };

        let trusted_subnet = non_empty(args.trusted_subnet)
            .or(non_empty(file.trusted_subnet))
            .map(|raw| parse_subnet(&raw))
            .transpose()
            .map_err(anyhow::Error::msg)?;

        let config = Self {
            address: non_empty(args.address)
                .or(non_empty(file.address))
                .unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
            store_interval: args
                .store_interval
                .map(Duration::from_secs)
                .or(file.store_interval)
                .unwrap_or(DEFAULT_STORE_INTERVAL),
            store_file: non_empty_path(args.file_storage_path)
                .or(non_empty_path(file.store_file))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE)),
            restore: args.restore.or(file.restore).unwrap_or(true),
            database_dsn: non_empty(args.database_dsn).or(non_empty(file.database_dsn)),
            key: non_empty(args.key).or(non_empty(file.key)),
            crypto_key: non_empty_path(args.crypto_key).or(non_empty_path(file.crypto_key)),
            trusted_subnet,
            log_level: args.log_level,
        };

        trace!("resolved server config: {:?}", config);
        Ok(config)
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = std::fs::read(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn non_empty_path(value: Option<PathBuf>) -> Option<PathBuf> {
    value.filter(|v| !v.as_os_str().is_empty())
}
