//! Round-trip latency probe.
//!
//! Runs the system `ping` in quiet mode and keeps the average RTT of the
//! summary line. Both iputils (`rtt min/avg/max/mdev = ...`) and busybox
//! (`round-trip min/avg/max = ...`) summaries are understood.

use std::time::Duration;

use crate::error::SourceError;
use crate::observation::Observation;
use crate::source::{ObservationSource, Requirement, SourceCategory, SourceInfo};
use crate::sources::helpers::{command_exists, describe_command, run_command_timed};
use crate::unix_now;

pub const DEFAULT_PING_HOST: &str = "www.google.com";

const PING_COUNT: &str = "5";
const PING_TIMEOUT: Duration = Duration::from_secs(12);

static PING_INFO: SourceInfo = SourceInfo {
    name: "ping",
    description: "Average ICMP round-trip time over five echo requests",
    category: SourceCategory::Latency,
    requirements: &[Requirement::Network, Requirement::PingBinary],
    default_period: Duration::from_secs(15),
};

/// Records the average RTT in microseconds.
pub struct PingProbe {
    host: String,
}

impl PingProbe {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PING_HOST)
    }
}

impl ObservationSource for PingProbe {
    fn info(&self) -> &SourceInfo {
        &PING_INFO
    }

    fn is_available(&self) -> bool {
        command_exists("ping")
    }

    fn observe(&self) -> Result<Observation, SourceError> {
        let args = ["-c", PING_COUNT, "-q", self.host.as_str()];
        let (output, _) = run_command_timed("ping", &args, PING_TIMEOUT);
        // Stamped on completion so the sample is stored right after its time.
        let at = unix_now();
        let output = output.ok_or_else(|| SourceError::Command {
            command: describe_command("ping", &args),
        })?;
        let rtt_micros = parse_average_rtt(&output).ok_or(SourceError::Parse {
            what: "average round-trip time",
        })?;
        Ok(Observation::Ping { at, rtt_micros })
    }
}

/// Average RTT in microseconds from a `ping` summary.
pub fn parse_average_rtt(output: &str) -> Option<u64> {
    let line = output.lines().find(|l| l.contains("min/avg/max"))?;
    let (_, values) = line.split_once('=')?;
    let avg_ms: f64 = values.trim().split('/').nth(1)?.trim().parse().ok()?;
    if !avg_ms.is_finite() || avg_ms < 0.0 {
        return None;
    }
    Some((avg_ms * 1000.0).round() as u64)
}
