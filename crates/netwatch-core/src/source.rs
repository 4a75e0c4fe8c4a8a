//! Abstract observation source trait and runtime state.
//!
//! Every observation source implements the [`ObservationSource`] trait, which
//! provides metadata via [`SourceInfo`], availability checking, and a single
//! timestamped sample per call.

use std::time::Duration;

use crate::error::SourceError;
use crate::observation::Observation;

/// What a source measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceCategory {
    /// Whether the internet is reachable at all.
    Reachability,
    /// Round-trip latency to a well-known host.
    Latency,
    /// Nearby wireless networks.
    Radio,
}

impl std::fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reachability => write!(f, "reachability"),
            Self::Latency => write!(f, "latency"),
            Self::Radio => write!(f, "radio"),
        }
    }
}

/// Host requirement for an observation source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requirement {
    /// Outbound network access.
    Network,
    /// The system `ping` binary.
    PingBinary,
    /// The `iw` wireless configuration tool.
    IwBinary,
    /// A wireless network interface.
    WirelessInterface,
    /// Effective uid 0 (active scans are privileged).
    Root,
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::PingBinary => write!(f, "ping"),
            Self::IwBinary => write!(f, "iw"),
            Self::WirelessInterface => write!(f, "wireless_interface"),
            Self::Root => write!(f, "root"),
        }
    }
}

/// Metadata about an observation source.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Unique identifier (e.g. `"ping"`).
    pub name: &'static str,
    /// One-line human-readable description.
    pub description: &'static str,
    pub category: SourceCategory,
    /// Host requirements beyond a Linux kernel.
    pub requirements: &'static [Requirement],
    /// Sampling period used when the configuration does not override it.
    pub default_period: Duration,
}

/// Trait that every observation source must implement.
pub trait ObservationSource: Send + Sync {
    /// Source metadata.
    fn info(&self) -> &SourceInfo;

    /// Check if this source can operate on the current machine.
    fn is_available(&self) -> bool;

    /// Take one sample. A failure means no sample for this period.
    fn observe(&self) -> Result<Observation, SourceError>;

    /// Convenience: name from info.
    fn name(&self) -> &'static str {
        self.info().name
    }
}

/// Consecutive failures after which a source is reported unhealthy.
pub const UNHEALTHY_AFTER: u64 = 3;

/// Runtime state for a source driven by the agent.
pub struct SourceState {
    pub source: Box<dyn ObservationSource>,
    pub period: Duration,
    pub observations: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    pub last_latency: Duration,
    pub healthy: bool,
}

impl SourceState {
    pub fn new(source: Box<dyn ObservationSource>, period: Duration) -> Self {
        Self {
            source,
            period,
            observations: 0,
            failures: 0,
            consecutive_failures: 0,
            last_latency: Duration::ZERO,
            healthy: true,
        }
    }

    pub fn record_success(&mut self, latency: Duration) {
        self.observations += 1;
        self.consecutive_failures = 0;
        self.last_latency = latency;
        self.healthy = true;
    }

    /// Returns `true` when this failure flips the source to unhealthy.
    pub fn record_failure(&mut self, latency: Duration) -> bool {
        self.failures += 1;
        self.consecutive_failures += 1;
        self.last_latency = latency;
        let was_healthy = self.healthy;
        self.healthy = self.consecutive_failures < UNHEALTHY_AFTER;
        was_healthy && !self.healthy
    }

    pub fn health(&self) -> SourceHealth {
        SourceHealth {
            name: self.source.name().to_string(),
            healthy: self.healthy,
            observations: self.observations,
            failures: self.failures,
            last_latency: self.last_latency,
        }
    }
}

/// Point-in-time health of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHealth {
    pub name: String,
    pub healthy: bool,
    pub observations: u64,
    pub failures: u64,
    pub last_latency: Duration,
}
