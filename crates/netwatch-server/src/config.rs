//! Ingestion endpoint configuration.

use std::path::PathBuf;

use netwatch_core::ConfigError;

use crate::sink::TableNames;

pub const ENV_METRICS_KEY: &str = "METRICS_KEY";
pub const ENV_TABLE_SSIDS: &str = "NETWATCH_TABLE_SSIDS";
pub const ENV_TABLE_CONNECTIVITY: &str = "NETWATCH_TABLE_CONNECTIVITY";
pub const ENV_TABLE_PINGS: &str = "NETWATCH_TABLE_PINGS";
pub const ENV_MAX_BODY_BYTES: &str = "NETWATCH_MAX_BODY_BYTES";

/// Largest accepted request body. A week-long backlog of one-second samples
/// serializes to well over axum's 2 MB default.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Shared secret expected in the `key` query parameter.
    pub metrics_key: String,
    pub host: String,
    pub port: u16,
    /// Directory of the NDJSON tables.
    pub out_dir: PathBuf,
    pub tables: TableNames,
    /// Request body limit in bytes.
    pub max_body_bytes: usize,
}

impl ServerConfig {
    pub fn new(metrics_key: &str) -> Self {
        Self {
            metrics_key: metrics_key.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            out_dir: PathBuf::from("netwatch-tables"),
            tables: TableNames::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = lookup(ENV_METRICS_KEY)
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing(ENV_METRICS_KEY))?;
        let mut config = Self::new(&key);
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(t) = non_empty(ENV_TABLE_SSIDS) {
            config.tables.ssids = t;
        }
        if let Some(t) = non_empty(ENV_TABLE_CONNECTIVITY) {
            config.tables.connectivity = t;
        }
        if let Some(t) = non_empty(ENV_TABLE_PINGS) {
            config.tables.pings = t;
        }
        if let Some(v) = non_empty(ENV_MAX_BODY_BYTES) {
            config.max_body_bytes = match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: ENV_MAX_BODY_BYTES,
                        value: v,
                    });
                }
            };
        }
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
