//! Store configuration
//!
//! Connection and behavior settings passed explicitly to
//! [`crate::Repository::new`]. There is no process-wide configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::edge::DEFAULT_EDGE_TABLE;
use crate::error::{StoreError, StoreResult};
use crate::transport::SerialConsistency;

/// How edge writes are issued when they cannot go in one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeFallback {
    /// Stop at the first failed write
    #[default]
    FailFast,
    /// Attempt every write, then report the first failure
    BestEffort,
    /// On failure, undo the writes already applied, then report the failure
    Compensate,
}

impl FromStr for EdgeFallback {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(EdgeFallback::FailFast),
            "best_effort" => Ok(EdgeFallback::BestEffort),
            "compensate" => Ok(EdgeFallback::Compensate),
            other => Err(StoreError::Config(format!("unknown edge fallback {other:?}"))),
        }
    }
}

/// Configuration for a [`crate::Repository`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Contact points (default: `["localhost"]`)
    pub hosts: Vec<String>,
    /// Native protocol port (default: 9042)
    pub port: u16,
    /// Keyspace holding every bound table (required)
    pub keyspace: String,
    /// Native protocol version (default: 2)
    pub protocol_version: u8,
    /// Pooled connections per host (default: 10)
    pub core_connections_per_host: u32,
    /// Serial consistency for conditional writes; `serial` when unset
    pub serial_consistency: Option<SerialConsistency>,
    /// Table holding the edge index (default: "edge")
    pub edge_table: String,
    /// Non-batched edge write policy (default: fail_fast)
    pub edge_fallback: EdgeFallback,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["localhost".to_string()],
            port: 9042,
            keyspace: String::new(),
            protocol_version: 2,
            core_connections_per_host: 10,
            serial_consistency: None,
            edge_table: DEFAULT_EDGE_TABLE.to_string(),
            edge_fallback: EdgeFallback::default(),
        }
    }
}

impl StoreConfig {
    /// Defaults for everything but the keyspace
    pub fn new(keyspace: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            ..Self::default()
        }
    }

    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_protocol_version(mut self, version: u8) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_core_connections_per_host(mut self, connections: u32) -> Self {
        self.core_connections_per_host = connections;
        self
    }

    pub fn with_serial_consistency(mut self, serial: SerialConsistency) -> Self {
        self.serial_consistency = Some(serial);
        self
    }

    pub fn with_edge_table(mut self, table: impl Into<String>) -> Self {
        self.edge_table = table.into();
        self
    }

    pub fn with_edge_fallback(mut self, fallback: EdgeFallback) -> Self {
        self.edge_fallback = fallback;
        self
    }

    /// Serial consistency applied to guarded writes
    pub fn conditional_consistency(&self) -> SerialConsistency {
        self.serial_consistency.unwrap_or(SerialConsistency::Serial)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.keyspace.trim().is_empty() {
            return Err(StoreError::Config("keyspace is required".to_string()));
        }
        if self.hosts.is_empty() || self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(StoreError::Config(
                "at least one non-empty host is required".to_string(),
            ));
        }
        if self.protocol_version == 0 {
            return Err(StoreError::Config(
                "protocol version must be positive".to_string(),
            ));
        }
        if self.core_connections_per_host == 0 {
            return Err(StoreError::Config(
                "core connections per host must be positive".to_string(),
            ));
        }
        if self.edge_table.trim().is_empty() {
            return Err(StoreError::Config("edge table name is required".to_string()));
        }
        Ok(())
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - CQLMAP_KEYSPACE (required)
    /// - CQLMAP_HOSTS (optional, comma-separated, default: "localhost")
    /// - CQLMAP_PORT (optional, default: 9042)
    /// - CQLMAP_PROTOCOL_VERSION (optional, default: 2)
    /// - CQLMAP_CORE_CONNECTIONS (optional, default: 10)
    /// - CQLMAP_SERIAL_CONSISTENCY (optional, "serial" or "local_serial")
    /// - CQLMAP_EDGE_TABLE (optional, default: "edge")
    /// - CQLMAP_EDGE_FALLBACK (optional, default: "fail_fast")
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// [`StoreConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let keyspace = lookup("CQLMAP_KEYSPACE")
            .ok_or_else(|| StoreError::Config("CQLMAP_KEYSPACE not set".to_string()))?;
        let mut config = Self::new(keyspace);

        if let Some(hosts) = lookup("CQLMAP_HOSTS") {
            config.hosts = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(port) = lookup("CQLMAP_PORT") {
            config.port = parse_var("CQLMAP_PORT", &port)?;
        }
        if let Some(version) = lookup("CQLMAP_PROTOCOL_VERSION") {
            config.protocol_version = parse_var("CQLMAP_PROTOCOL_VERSION", &version)?;
        }
        if let Some(connections) = lookup("CQLMAP_CORE_CONNECTIONS") {
            config.core_connections_per_host = parse_var("CQLMAP_CORE_CONNECTIONS", &connections)?;
        }
        if let Some(serial) = lookup("CQLMAP_SERIAL_CONSISTENCY") {
            config.serial_consistency = Some(serial.parse().map_err(StoreError::Config)?);
        }
        if let Some(table) = lookup("CQLMAP_EDGE_TABLE") {
            config.edge_table = table;
        }
        if let Some(fallback) = lookup("CQLMAP_EDGE_FALLBACK") {
            config.edge_fallback = fallback.parse()?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> StoreResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| StoreError::Config(format!("{name} has invalid value {raw:?}")))
}
