//! Pipeline configuration
//!
//! A pipeline is described by one YAML document:
//! ```yaml
//! pipeline:
//!   name: login-analytics
//!   retries: 3
//!   retry_delay: 5s
//! source:
//!   type: postgres
//!   servers: ["10.0.0.1:5432", "10.0.0.2:5432"]
//!   database: logins
//!   tables: [user_connection_history, user_connection_log]
//! sink:
//!   type: postgres
//!   host: ${SINK_HOST}
//!   database: analytics
//!   table: user_connections
//!   conflict_keys: [dealer_id, logon_time]
//! ```
//!
//! `${VAR}` placeholders are resolved from the environment before parsing.

mod duration;
mod env;

pub use duration::parse_duration;
pub use env::{load_dotenv, substitute_env, substitute_with};

use eyre::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default capacity of the bounded record queues
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Largest accepted queue capacity
pub const MAX_BUFFER_SIZE: usize = 1 << 20;

/// Default Postgres port for source shards and sink
pub const DEFAULT_PORT: u16 = 5432;

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_connect_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_ping_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_source_connections() -> u32 {
    10
}

fn default_sink_connections() -> u32 {
    5
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Complete configuration of one pipeline
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub pipeline: PipelineSettings,
    pub source: SourceConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub transformations: Vec<TransformationConfig>,
}

/// Run-level settings: identity, retry policy and stream tuning
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PipelineSettings {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Retries after the first attempt
    #[serde(default)]
    pub retries: u32,
    #[serde(
        default = "default_retry_delay",
        deserialize_with = "duration::deserialize"
    )]
    pub retry_delay: Duration,
    #[serde(default, deserialize_with = "duration::option::deserialize")]
    pub max_retry_delay: Option<Duration>,
    #[serde(default)]
    pub exponential_backoff: bool,
    /// Upper bound for the whole run, retries included
    #[serde(default, deserialize_with = "duration::option::deserialize")]
    pub timeout: Option<Duration>,
    /// Capacity of the bounded record queues
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Fail the attempt on the first row-level error instead of counting it
    #[serde(default)]
    pub abort_on_row_error: bool,
}

/// Sharded source description
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub kind: String,
    /// One `host:port` endpoint per shard
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub database: String,
    #[serde(default, alias = "username")]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub tables: Vec<String>,
    /// Custom query; `{table}` is replaced by each table name
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub order_by: Option<String>,
    /// Column stamped with `<table>_shard<N>` on every extracted row
    #[serde(default)]
    pub source_column: Option<String>,
    /// Column stamped with the extraction time (RFC 3339, UTC) on every row
    #[serde(default)]
    pub processed_at_column: Option<String>,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(
        default = "default_connect_retry_delay",
        deserialize_with = "duration::deserialize"
    )]
    pub connect_retry_delay: Duration,
    #[serde(
        default = "default_ping_timeout",
        deserialize_with = "duration::deserialize"
    )]
    pub ping_timeout: Duration,
    #[serde(default = "default_source_connections")]
    pub max_connections: u32,
}

impl SourceConfig {
    /// Every table to extract from, `table` first, without duplicates
    pub fn tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = Vec::new();
        for table in self.table.iter().chain(self.tables.iter()) {
            let table = table.trim();
            if !table.is_empty() && !tables.contains(&table) {
                tables.push(table);
            }
        }
        tables
    }

    /// Parsed shard endpoints, in configuration order
    pub fn endpoints(&self) -> Result<Vec<Endpoint>> {
        self.servers.iter().map(|s| s.parse()).collect()
    }
}

/// Sink database description
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SinkConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub database: String,
    #[serde(default, alias = "username")]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub table: String,
    /// Natural key used to upsert rows
    #[serde(default)]
    pub conflict_keys: Vec<String>,
    /// Target table per source table; rows from other tables go to `table`
    #[serde(default)]
    pub table_map: BTreeMap<String, String>,
    #[serde(default = "default_sink_connections")]
    pub max_connections: u32,
}

/// A per-row column transformation
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformationConfig {
    /// Set `column` to `default_value` when it is missing or null
    FillDefault {
        #[serde(alias = "column_name")]
        column: String,
        default_value: serde_json::Value,
    },
    /// Remove `column`
    DropColumn {
        #[serde(alias = "column_name")]
        column: String,
    },
    /// Reject rows where `column` is missing or null
    RequireColumn {
        #[serde(alias = "column_name")]
        column: String,
    },
}

/// A `host:port` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl FromStr for Endpoint {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| eyre::eyre!("Invalid server '{}', expected host:port", s))?;
        if host.is_empty() {
            eyre::bail!("Invalid server '{}', host is empty", s);
        }
        let port = port
            .parse()
            .with_context(|| format!("Invalid port in server '{}'", s))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl PipelineConfig {
    /// Read, substitute environment variables, parse and validate a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            eyre::bail!("Configuration file not found: {}", path.display());
        }

        log::debug!("Reading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
        let content = substitute_env(&content)?;

        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse configuration file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Parse a YAML document without substitution or validation
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Malformed pipeline configuration")
    }

    /// Check required fields and value ranges
    pub fn validate(&self) -> Result<()> {
        let pipeline = &self.pipeline;
        if pipeline.name.trim().is_empty() {
            eyre::bail!("pipeline name is required");
        }
        if pipeline.buffer_size == 0 {
            eyre::bail!("pipeline buffer_size must be greater than zero");
        }
        if pipeline.buffer_size > MAX_BUFFER_SIZE {
            eyre::bail!(
                "pipeline buffer_size {} exceeds the maximum of {}",
                pipeline.buffer_size,
                MAX_BUFFER_SIZE
            );
        }
        if let Some(max) = pipeline.max_retry_delay
            && max < pipeline.retry_delay
        {
            log::warn!(
                "max_retry_delay ({:?}) is shorter than retry_delay ({:?}); retries will wait {:?}",
                max,
                pipeline.retry_delay,
                max
            );
        }

        let source = &self.source;
        if source.kind.trim().is_empty() {
            eyre::bail!("source type is required");
        }
        if source.servers.is_empty() {
            eyre::bail!("source needs at least one server");
        }
        source.endpoints()?;
        if source.tables().is_empty() && source.query.is_none() {
            eyre::bail!("source needs a table, tables, or a query");
        }
        if source.connect_attempts == 0 {
            eyre::bail!("source connect_attempts must be greater than zero");
        }

        let sink = &self.sink;
        if sink.kind.trim().is_empty() {
            eyre::bail!("sink type is required");
        }
        if sink.table.trim().is_empty() {
            eyre::bail!("sink table is required");
        }
        if sink.conflict_keys.is_empty() {
            eyre::bail!("sink needs at least one conflict key for upserts");
        }
        if !sink.table_map.is_empty() && source.source_column.is_none() {
            eyre::bail!("sink table_map needs source.source_column to tell tables apart");
        }
        if let Some((from, _)) = sink.table_map.iter().find(|(_, to)| to.trim().is_empty()) {
            eyre::bail!("sink table_map entry for '{}' has an empty target table", from);
        }
        if source.processed_at_column.is_some()
            && source.processed_at_column == source.source_column
        {
            eyre::bail!("source processed_at_column and source_column must differ");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
pipeline:
  name: minimal
source:
  type: postgres
  servers: ["127.0.0.1:5432"]
  table: events
sink:
  type: postgres
  table: events
  conflict_keys: [id]
"#;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_yaml(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.pipeline.retries, 0);
        assert_eq!(config.pipeline.retry_delay, Duration::from_secs(5));
        assert_eq!(config.pipeline.max_retry_delay, None);
        assert_eq!(config.pipeline.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(!config.pipeline.abort_on_row_error);
        assert_eq!(config.source.connect_attempts, 3);
        assert_eq!(config.source.connect_retry_delay, Duration::from_secs(2));
        assert_eq!(config.sink.host, "127.0.0.1");
        assert_eq!(config.sink.port, 5432);
        assert!(config.transformations.is_empty());
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
pipeline:
  name: login-analytics
  description: Login events from all shards
  retries: 3
  retry_delay: 1m30s
  max_retry_delay: 10m
  exponential_backoff: true
  timeout: 2h
  buffer_size: 256
  abort_on_row_error: true
source:
  type: postgres
  servers: ["10.0.0.1:5432", "10.0.0.2:5433"]
  database: logins
  table: user_connection_history
  tables: [user_connection_log, user_connection_history]
  order_by: logon_time DESC
  source_column: source_table
sink:
  type: postgres
  host: sink.internal
  port: 6432
  database: analytics
  table: user_connections
  conflict_keys: [dealer_id, logon_time]
transformations:
  - type: fill_default
    column_name: details
    default_value: ""
  - type: drop_column
    column: session_secret
  - type: require_column
    column: dealer_id
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.pipeline.retry_delay, Duration::from_secs(90));
        assert_eq!(config.pipeline.timeout, Some(Duration::from_secs(7_200)));
        assert_eq!(
            config.source.tables(),
            vec!["user_connection_history", "user_connection_log"]
        );
        let endpoints = config.source.endpoints().unwrap();
        assert_eq!(endpoints[1].to_string(), "10.0.0.2:5433");
        assert_eq!(config.transformations.len(), 3);
        assert_eq!(
            config.transformations[0],
            TransformationConfig::FillDefault {
                column: "details".to_string(),
                default_value: serde_json::json!(""),
            }
        );
    }

    #[test]
    fn test_negative_retries_rejected() {
        let yaml = MINIMAL.replace("name: minimal", "name: minimal\n  retries: -1");
        assert!(PipelineConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_unknown_transformation_rejected() {
        let yaml = format!("{}transformations:\n  - type: explode\n    column: x\n", MINIMAL);
        assert!(PipelineConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_validation_errors() {
        let base = PipelineConfig::from_yaml(MINIMAL).unwrap();

        let mut config = base.clone();
        config.pipeline.name = " ".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("name"));

        let mut config = base.clone();
        config.source.servers.clear();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.source.servers = vec!["no-port".to_string()];
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.source.table = None;
        assert!(config.validate().is_err());
        config.source.query = Some("SELECT * FROM events".to_string());
        assert!(config.validate().is_ok());

        let mut config = base.clone();
        config.sink.conflict_keys.clear();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.pipeline.buffer_size = 0;
        assert!(config.validate().is_err());

        // Beyond what a bounded channel can hold
        let mut config = base.clone();
        config.pipeline.buffer_size = usize::MAX;
        assert!(config.validate().is_err());
        config.pipeline.buffer_size = MAX_BUFFER_SIZE;
        assert!(config.validate().is_ok());

        let mut config = base;
        config.source.processed_at_column = Some("src".to_string());
        config.source.source_column = Some("src".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_table_map_requires_source_column() {
        let yaml = MINIMAL.to_string()
            + "  table_map:\n    dbo.history: user_connection_history\n";
        let mut config = PipelineConfig::from_yaml(&yaml).unwrap();
        assert_eq!(
            config.sink.table_map.get("dbo.history").map(String::as_str),
            Some("user_connection_history")
        );
        assert!(config.validate().is_err());

        config.source.source_column = Some("source_table".to_string());
        assert!(config.validate().is_ok());

        config
            .sink
            .table_map
            .insert("dbo.log".to_string(), " ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_parsing() {
        let endpoint: Endpoint = "shard-1.db:1433".parse().unwrap();
        assert_eq!(endpoint.host, "shard-1.db");
        assert_eq!(endpoint.port, 1433);
        assert!(":1433".parse::<Endpoint>().is_err());
        assert!("host:abc".parse::<Endpoint>().is_err());
    }
}
