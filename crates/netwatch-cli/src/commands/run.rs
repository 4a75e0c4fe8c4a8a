use log::{info, warn};

use netwatch_core::platform::select_wireless_interface;
use netwatch_core::sources::configured_sources;
use netwatch_core::{Agent, ConfigError, Shutdown, is_root};

use super::{CliResult, Overrides, build_cycle, load_config, open_store};

pub fn run(root_check: bool, overrides: &Overrides) -> CliResult {
    if root_check && !is_root() {
        return Err(ConfigError::NotRoot.into());
    }

    let config = load_config(overrides)?;
    let interface = select_wireless_interface(config.wifi_interface.as_deref())
        .ok_or(ConfigError::NoWirelessInterface)?;

    let store_path = config.store_path();
    let store = open_store(&store_path)?;
    let shutdown = Shutdown::new();
    let cycle = build_cycle(&config, store.clone(), shutdown.clone())?;

    let mut agent = Agent::new(store, cycle, config.cycle_period);
    for (source, period) in configured_sources(&config, &interface)? {
        agent.add_source(source, period);
    }

    let handler = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || handler.trigger()) {
        warn!("could not install signal handler: {e}");
    }

    println!("netwatch v{}", netwatch_core::VERSION);
    println!("  Loop:      {}", config.delivery.loop_id);
    println!("  Endpoint:  {}", config.delivery.endpoint_url);
    println!("  Store:     {}", store_path.display());
    println!("  Interface: {interface}");
    println!("  Sources:   {}", agent.source_count());
    println!("  Cycle:     every {}s", config.cycle_period.as_secs());
    println!();

    let summary = agent.run(&shutdown)?;
    info!(
        "shutdown complete: {} cycles delivered, {} failed",
        summary.cycles_ok, summary.cycles_failed
    );
    for health in &summary.sources {
        println!(
            "  {:<14} {:>8} ok {:>6} failed  {}",
            health.name,
            health.observations,
            health.failures,
            if health.healthy { "healthy" } else { "UNHEALTHY" }
        );
    }
    Ok(())
}
