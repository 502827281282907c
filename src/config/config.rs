use chrono::NaiveDate;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::engine::GranularityThresholds;

/// PostgreSQL connection configuration.
///
/// The service only reads from `swaps` and `dex_aggregator_revenue`; the
/// schema is applied at startup when `run_migrations` is set.
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    #[serde(default = "default_postgres_host")]
    pub host: String,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default)]
    pub run_migrations: bool,
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_pool_size() -> usize {
    16
}

/// HTTP server configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Worker threads; `None` uses one per physical core.
    #[serde(default)]
    pub workers: Option<usize>,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            workers: None,
        }
    }
}

/// Aggregation engine configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineSettings {
    /// First day of recorded history, used as the start of the `all` range.
    #[serde(default = "default_history_start")]
    pub history_start: NaiveDate,
    /// Per-source query timeout.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default)]
    pub granularity: GranularityThresholds,
}

fn default_history_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default()
}

fn default_query_timeout_secs() -> u64 {
    30
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            history_start: default_history_start(),
            query_timeout_secs: default_query_timeout_secs(),
            granularity: GranularityThresholds::default(),
        }
    }
}

/// Root application configuration.
///
/// Loaded from an optional `config.{yaml,toml,json}` file, then overridden by
/// `SWAPSTATS__SECTION__KEY` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("SWAPSTATS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    /// Settings from an inline YAML document, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()
    }
}
