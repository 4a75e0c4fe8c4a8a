pub mod flush;
pub mod run;
pub mod scan;
pub mod serve;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use netwatch_core::config::{
    ENV_API_KEY, ENV_DATA_DIR, ENV_ENDPOINT_URL, ENV_LOOP, ENV_WIFI_IFACE,
};
use netwatch_core::{
    AgentConfig, ConfigError, CycleSettings, DeliveryClient, DeliveryCycle, DeliveryError,
    SampleStore, Shutdown, SledStore, SourceError, StoreError, unix_now,
};

/// Anything a subcommand can fail with.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Cycle(#[from] netwatch_core::Error),

    #[error(transparent)]
    Sink(#[from] netwatch_server::SinkError),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

pub type CliResult = Result<(), CliError>;

/// Values given on the command line; each wins over its environment variable.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub loop_id: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub iface: Option<String>,
}

impl Overrides {
    fn get(&self, name: &str) -> Option<String> {
        match name {
            ENV_ENDPOINT_URL => self.endpoint.clone(),
            ENV_API_KEY => self.api_key.clone(),
            ENV_LOOP => self.loop_id.clone(),
            ENV_DATA_DIR => self.data_dir.as_ref().map(|d| d.display().to_string()),
            ENV_WIFI_IFACE => self.iface.clone(),
            _ => None,
        }
    }
}

/// Agent configuration from the environment with the command-line overrides
/// applied.
pub fn load_config(overrides: &Overrides) -> Result<AgentConfig, ConfigError> {
    config_from(overrides, |name| std::env::var(name).ok())
}

fn config_from<F>(overrides: &Overrides, env: F) -> Result<AgentConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    AgentConfig::from_lookup(|name| overrides.get(name).or_else(|| env(name)))
}

pub fn open_store(path: &Path) -> Result<SampleStore, StoreError> {
    Ok(Arc::new(SledStore::open(path)?).into_sample_store())
}

/// Delivery cycle over `store` using the configured endpoint and policies.
pub fn build_cycle(
    config: &AgentConfig,
    store: SampleStore,
    shutdown: Shutdown,
) -> Result<DeliveryCycle, DeliveryError> {
    let client = DeliveryClient::new(config.delivery.clone())?;
    Ok(DeliveryCycle::new(
        store,
        Box::new(client),
        unix_now(),
        CycleSettings::from_config(config),
        shutdown,
    ))
}
