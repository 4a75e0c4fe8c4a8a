//! Wireless network visibility scanner.
//!
//! Triggers an active scan with `iw dev <iface> scan` and turns every `BSS`
//! block of the output into an [`AccessPoint`]. The frequency in MHz is kept
//! in the `channel` field, which is what the collector tables expect.

use std::time::Duration;

use log::debug;

use crate::error::SourceError;
use crate::observation::{AccessPoint, NetworkSnapshot, Observation};
use crate::platform;
use crate::source::{ObservationSource, Requirement, SourceCategory, SourceInfo};
use crate::sources::helpers::{command_exists, describe_command, run_command_timed};
use crate::unix_now;

/// Timeout for a single scan. Dense 5 GHz environments can take several seconds.
const SCAN_TIMEOUT: Duration = Duration::from_secs(20);

static WIFI_INFO: SourceInfo = SourceInfo {
    name: "wifi_scan",
    description: "Visible access points with BSSID, frequency and signal level",
    category: SourceCategory::Radio,
    requirements: &[
        Requirement::WirelessInterface,
        Requirement::IwBinary,
        Requirement::Root,
    ],
    default_period: Duration::from_secs(10),
};

/// Scans one wireless interface.
pub struct WifiScanner {
    interface: String,
}

impl WifiScanner {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl ObservationSource for WifiScanner {
    fn info(&self) -> &SourceInfo {
        &WIFI_INFO
    }

    fn is_available(&self) -> bool {
        command_exists("iw")
            && platform::wireless_interfaces().contains(&self.interface)
    }

    fn observe(&self) -> Result<Observation, SourceError> {
        let args = ["dev", self.interface.as_str(), "scan"];
        let (output, elapsed) = run_command_timed("iw", &args, SCAN_TIMEOUT);
        let output = output.ok_or_else(|| SourceError::Command {
            command: describe_command("iw", &args),
        })?;
        let access_points = parse_scan(&output);
        debug!(
            "{}: {} access points in {:?}",
            self.interface,
            access_points.len(),
            elapsed
        );
        Ok(Observation::Networks(NetworkSnapshot {
            captured_at: unix_now(),
            access_points,
        }))
    }
}

// ---------------------------------------------------------------------------
// Scan output parsing
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Partial {
    bssid: String,
    ssid: Option<String>,
    frequency: u32,
    signal: i32,
}

impl Partial {
    fn finish(self) -> AccessPoint {
        AccessPoint {
            ssid: self.ssid.unwrap_or_default(),
            bssid: self.bssid,
            channel: self.frequency,
            rssi: self.signal,
        }
    }
}

/// Parse `iw dev <iface> scan` output.
///
/// Fields missing from a block default to empty or zero; a block without a
/// BSSID is impossible since the BSSID opens the block.
pub fn parse_scan(output: &str) -> Vec<AccessPoint> {
    let mut found = Vec::new();
    let mut current: Option<Partial> = None;

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("BSS ") {
            if let Some(done) = current.take() {
                found.push(done.finish());
            }
            let bssid = rest
                .split(|c: char| c == '(' || c.is_whitespace())
                .next()
                .unwrap_or_default();
            current = Some(Partial {
                bssid: bssid.to_string(),
                ..Partial::default()
            });
            continue;
        }

        let Some(ap) = current.as_mut() else {
            continue;
        };
        let field = line.trim_start();
        if let Some(v) = field.strip_prefix("freq:") {
            if let Ok(mhz) = v.trim().parse::<f64>() {
                ap.frequency = mhz.round() as u32;
            }
        } else if let Some(v) = field.strip_prefix("signal:") {
            if let Some(dbm) = v.split_whitespace().next().and_then(|s| s.parse::<f64>().ok()) {
                ap.signal = dbm.round() as i32;
            }
        } else if let Some(v) = field.strip_prefix("SSID:") {
            if ap.ssid.is_none() {
                ap.ssid = Some(v.trim().to_string());
            }
        }
    }

    if let Some(done) = current {
        found.push(done.finish());
    }
    found
}
