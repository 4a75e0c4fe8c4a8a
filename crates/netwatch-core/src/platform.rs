//! Host inspection: privileges, wireless interfaces, source availability.

use std::fs;
use std::path::Path;

use crate::source::ObservationSource;

const SYS_CLASS_NET: &str = "/sys/class/net";

/// Whether the process runs with effective uid 0.
pub fn is_root() -> bool {
    // SAFETY: geteuid() has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Names of the wireless interfaces on this host, sorted.
pub fn wireless_interfaces() -> Vec<String> {
    wireless_interfaces_in(Path::new(SYS_CLASS_NET))
}

/// Interfaces under `root` that expose a `wireless` directory, sorted.
pub fn wireless_interfaces_in(root: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().join("wireless").is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

/// Pick the configured interface, or the first wireless one found.
pub fn select_wireless_interface(preferred: Option<&str>) -> Option<String> {
    match preferred {
        Some(name) => Some(name.to_string()),
        None => wireless_interfaces().into_iter().next(),
    }
}

/// Availability of each source, in the order given.
pub fn source_availability(sources: &[Box<dyn ObservationSource>]) -> Vec<(&'static str, bool)> {
    sources
        .iter()
        .map(|s| (s.name(), s.is_available()))
        .collect()
}

/// Short description of the host for status output.
pub fn platform_info() -> String {
    format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)
}
