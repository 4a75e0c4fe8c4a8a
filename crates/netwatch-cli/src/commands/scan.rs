use netwatch_core::platform::{platform_info, select_wireless_interface, source_availability};
use netwatch_core::sources::configured_sources;
use netwatch_core::{AgentConfig, DeliveryConfig, is_root};

use super::CliResult;

pub fn run(interface: Option<&str>) -> CliResult {
    println!("Platform: {} (Rust)", platform_info());
    println!("Root:     {}", if is_root() { "yes" } else { "no" });

    let interface = select_wireless_interface(interface);
    match &interface {
        Some(name) => println!("Wireless: {name}"),
        None => println!("Wireless: (no interface found)"),
    }
    println!();

    // Availability does not depend on the delivery settings.
    let config = AgentConfig::new(DeliveryConfig::new("", "", ""));
    let sources: Vec<_> = configured_sources(&config, interface.as_deref().unwrap_or(""))?
        .into_iter()
        .map(|(source, _)| source)
        .collect();

    for (source, (name, available)) in sources.iter().zip(source_availability(&sources)) {
        let info = source.info();
        let mark = if available { "\u{2705}" } else { "\u{274C}" };
        println!("  {mark} {name:<14} {}", info.description);
        if !available {
            let needs: Vec<String> = info.requirements.iter().map(|r| r.to_string()).collect();
            println!("       requires: {}", needs.join(", "));
        }
    }
    Ok(())
}
