//! Observation source implementations.

pub mod helpers;

pub mod connectivity;
pub mod ping;
pub mod wifi;

use std::time::Duration;

use crate::config::AgentConfig;
use crate::error::SourceError;
use crate::source::ObservationSource;

/// Build every source configured for the agent, each paired with its period.
pub fn configured_sources(
    config: &AgentConfig,
    wifi_interface: &str,
) -> Result<Vec<(Box<dyn ObservationSource>, Duration)>, SourceError> {
    let mut sources: Vec<(Box<dyn ObservationSource>, Duration)> = Vec::new();
    sources.push((
        Box::new(connectivity::ConnectivityProbe::new(&config.probe_url)?),
        config.periods.connectivity,
    ));
    sources.push((
        Box::new(ping::PingProbe::new(&config.ping_host)),
        config.periods.ping,
    ));
    sources.push((
        Box::new(wifi::WifiScanner::new(wifi_interface)),
        config.periods.wifi_scan,
    ));
    Ok(sources)
}
