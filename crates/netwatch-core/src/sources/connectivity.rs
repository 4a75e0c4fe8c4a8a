//! Internet reachability probe.
//!
//! Issues an HTTP GET against a captive-portal style endpoint. Any HTTP
//! response counts as connected; only a transport failure counts as
//! disconnected.

use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;

use crate::error::SourceError;
use crate::observation::Observation;
use crate::source::{ObservationSource, Requirement, SourceCategory, SourceInfo};
use crate::unix_now;

pub const DEFAULT_PROBE_URL: &str = "http://clients3.google.com/generate_204";

/// Shorter than the default 1.5s period would suggest, so probes don't pile up.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

static CONNECTIVITY_INFO: SourceInfo = SourceInfo {
    name: "connectivity",
    description: "HTTP reachability of a well-known endpoint",
    category: SourceCategory::Reachability,
    requirements: &[Requirement::Network],
    default_period: Duration::from_millis(1500),
};

/// Records 1.0 when the probe URL answers, 0.0 otherwise.
pub struct ConnectivityProbe {
    http: Client,
    url: String,
}

impl ConnectivityProbe {
    pub fn new(url: &str) -> Result<Self, SourceError> {
        let http = Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ObservationSource for ConnectivityProbe {
    fn info(&self) -> &SourceInfo {
        &CONNECTIVITY_INFO
    }

    fn is_available(&self) -> bool {
        true
    }

    fn observe(&self) -> Result<Observation, SourceError> {
        let connected = match self.http.get(&self.url).send() {
            Ok(_) => true,
            Err(e) => {
                debug!("connectivity probe to {} failed: {e}", self.url);
                false
            }
        };
        let at = unix_now();
        Ok(Observation::Connectivity { at, connected })
    }
}
