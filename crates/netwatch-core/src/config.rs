//! Agent configuration, built once at startup.
//!
//! Values come from the environment (see [`AgentConfig::from_env`]); the CLI
//! may override individual fields afterwards. The resulting value is passed
//! by ownership into the agent; nothing reads the environment later.

use std::path::PathBuf;
use std::time::Duration;

use crate::delivery::RetryPolicy;
use crate::error::ConfigError;

pub const ENV_ENDPOINT_URL: &str = "ENDPOINT_URL";
pub const ENV_API_KEY: &str = "API_KEY";
pub const ENV_LOOP: &str = "LOOP";
pub const ENV_DATA_DIR: &str = "NETWATCH_DATA_DIR";
pub const ENV_WIFI_IFACE: &str = "NETWATCH_WIFI_IFACE";
pub const ENV_CYCLE_SECS: &str = "NETWATCH_CYCLE_SECS";
pub const ENV_RETRY_SECS: &str = "NETWATCH_RETRY_SECS";
pub const ENV_MAX_ATTEMPTS: &str = "NETWATCH_MAX_ATTEMPTS";
pub const ENV_SPILL_DIR: &str = "NETWATCH_SPILL_DIR";
pub const ENV_SETTLE_SECS: &str = "NETWATCH_SETTLE_SECS";
pub const ENV_PRUNE_SCALARS: &str = "NETWATCH_PRUNE_SCALARS";

/// Where and how batches are posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Collector URL without query string.
    pub endpoint_url: String,
    pub api_key: String,
    /// Identifier of the monitored site ("loop").
    pub loop_id: String,
    /// Per-request timeout. Long on purpose: field links are slow and metered.
    pub request_timeout: Duration,
}

impl DeliveryConfig {
    pub fn new(endpoint_url: &str, api_key: &str, loop_id: &str) -> Self {
        Self {
            endpoint_url: endpoint_url.to_string(),
            api_key: api_key.to_string(),
            loop_id: loop_id.to_string(),
            request_timeout: Duration::from_secs(600),
        }
    }
}

/// Sampling period of each observation source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePeriods {
    pub connectivity: Duration,
    pub ping: Duration,
    pub wifi_scan: Duration,
}

impl Default for SourcePeriods {
    fn default() -> Self {
        Self {
            connectivity: Duration::from_millis(1500),
            ping: Duration::from_secs(15),
            wifi_scan: Duration::from_secs(10),
        }
    }
}

/// Complete agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub delivery: DeliveryConfig,
    pub data_dir: PathBuf,
    /// Wireless interface to scan; the first one found when `None`.
    pub wifi_interface: Option<String>,
    /// Time between delivery cycles.
    pub cycle_period: Duration,
    pub retry: RetryPolicy,
    /// Where undeliverable batches go once `retry.max_attempts` is exhausted.
    pub spill_dir: Option<PathBuf>,
    /// Windows end this far behind "now" so in-flight writes land first.
    pub settle: Duration,
    /// Drop delivered scalar points at retirement.
    pub prune_scalars: bool,
    /// Attempts to persist the checkpoint before a cycle reports failure.
    pub checkpoint_retries: u32,
    pub periods: SourcePeriods,
    pub probe_url: String,
    pub ping_host: String,
}

impl AgentConfig {
    /// Defaults for everything but the three required delivery settings.
    pub fn new(delivery: DeliveryConfig) -> Self {
        Self {
            delivery,
            data_dir: PathBuf::from("/var/lib/netwatch"),
            wifi_interface: None,
            cycle_period: Duration::from_secs(3600),
            retry: RetryPolicy::default(),
            spill_dir: None,
            settle: Duration::from_secs(5),
            prune_scalars: true,
            checkpoint_retries: 5,
            periods: SourcePeriods::default(),
            probe_url: "http://clients3.google.com/generate_204".to_string(),
            ping_host: "www.google.com".to_string(),
        }
    }

    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let delivery = DeliveryConfig::new(
            &required(ENV_ENDPOINT_URL)?,
            &required(ENV_API_KEY)?,
            &required(ENV_LOOP)?,
        );
        let mut config = Self::new(delivery);

        if let Some(dir) = lookup(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        config.wifi_interface = lookup(ENV_WIFI_IFACE).filter(|v| !v.is_empty());
        if let Some(v) = lookup(ENV_CYCLE_SECS) {
            config.cycle_period = Duration::from_secs(parse_positive(ENV_CYCLE_SECS, &v)?);
        }
        if let Some(v) = lookup(ENV_RETRY_SECS) {
            config.retry.delay = Duration::from_secs(parse_positive(ENV_RETRY_SECS, &v)?);
        }
        if let Some(v) = lookup(ENV_MAX_ATTEMPTS) {
            let attempts = parse_positive(ENV_MAX_ATTEMPTS, &v)?;
            config.retry.max_attempts =
                Some(u32::try_from(attempts).map_err(|_| invalid(ENV_MAX_ATTEMPTS, &v))?);
        }
        config.spill_dir = lookup(ENV_SPILL_DIR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        if let Some(v) = lookup(ENV_SETTLE_SECS) {
            let secs = v.trim().parse::<u64>().map_err(|_| invalid(ENV_SETTLE_SECS, &v))?;
            config.settle = Duration::from_secs(secs);
        }
        if let Some(v) = lookup(ENV_PRUNE_SCALARS) {
            config.prune_scalars = parse_bool(ENV_PRUNE_SCALARS, &v)?;
        }
        Ok(config)
    }

    /// Location of the sled database.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("store")
    }
}

fn invalid(name: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
    }
}

fn parse_positive(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid(name, value)),
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}
