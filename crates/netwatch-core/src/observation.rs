//! Observations captured on the host and the wire payload built from them.
//!
//! Sources produce [`Observation`]s stamped with Unix seconds. The delivery
//! payload ([`MetricSet`]) carries the same samples partitioned by kind, each
//! entry with an RFC 3339 timestamp.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::Timestamp;

// ---------------------------------------------------------------------------
// Local observations
// ---------------------------------------------------------------------------

/// One access point seen during a Wi-Fi scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub ssid: String,
    pub bssid: String,
    /// Channel, or the centre frequency in MHz when the scanner reports that.
    pub channel: u32,
    /// Signal strength in dBm.
    pub rssi: i32,
}

/// All access points captured atomically by one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSnapshot {
    pub captured_at: Timestamp,
    pub access_points: Vec<AccessPoint>,
}

/// A single timestamped sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// Whether the internet reachability probe succeeded.
    Connectivity { at: Timestamp, connected: bool },
    /// Average ICMP round-trip time in microseconds.
    Ping { at: Timestamp, rtt_micros: u64 },
    /// Wi-Fi visibility snapshot.
    Networks(NetworkSnapshot),
}

impl Observation {
    /// Capture time in Unix seconds.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Connectivity { at, .. } | Self::Ping { at, .. } => *at,
            Self::Networks(snapshot) => snapshot.captured_at,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connectivity { .. } => "connectivity",
            Self::Ping { .. } => "ping",
            Self::Networks(_) => "networks",
        }
    }
}

// ---------------------------------------------------------------------------
// Wire payload
// ---------------------------------------------------------------------------

/// One access point row as delivered to the collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub ssid: String,
    pub bssid: String,
    pub channel: u32,
    pub rssi: i32,
    pub timestamp: DateTime<Utc>,
}

impl Network {
    pub fn from_access_point(ap: AccessPoint, captured_at: Timestamp) -> Self {
        Self {
            ssid: ap.ssid,
            bssid: ap.bssid,
            channel: ap.channel,
            rssi: ap.rssi,
            timestamp: to_datetime(captured_at),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.ssid, self.bssid, self.channel, self.rssi)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connectivity {
    pub timestamp: DateTime<Utc>,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub timestamp: DateTime<Utc>,
    /// Round-trip time in microseconds.
    pub rtt: i64,
}

/// The delivery payload: every sample of one window, partitioned by kind.
///
/// Collections sent as JSON `null` by older agents decode as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSet {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub networks: Vec<Network>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub connectivity: Vec<Connectivity>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub pings: Vec<Ping>,
}

impl MetricSet {
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty() && self.connectivity.is_empty() && self.pings.is_empty()
    }

    /// Total number of entries across all three collections.
    pub fn len(&self) -> usize {
        self.networks.len() + self.connectivity.len() + self.pings.len()
    }

    /// Append another set, keeping each collection in arrival order.
    pub fn extend(&mut self, other: MetricSet) {
        self.networks.extend(other.networks);
        self.connectivity.extend(other.connectivity);
        self.pings.extend(other.pings);
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Convert Unix seconds to a UTC datetime.
pub fn to_datetime(ts: Timestamp) -> DateTime<Utc> {
    i64::try_from(ts)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home_ap() -> AccessPoint {
        AccessPoint {
            ssid: "home".to_string(),
            bssid: "aa:bb:cc:dd:ee:ff".to_string(),
            channel: 6,
            rssi: -40,
        }
    }

    #[test]
    fn test_observation_timestamp_and_kind() {
        let c = Observation::Connectivity {
            at: 100,
            connected: true,
        };
        let p = Observation::Ping {
            at: 105,
            rtt_micros: 42_000,
        };
        let n = Observation::Networks(NetworkSnapshot {
            captured_at: 110,
            access_points: vec![home_ap()],
        });
        assert_eq!((c.timestamp(), c.kind()), (100, "connectivity"));
        assert_eq!((p.timestamp(), p.kind()), (105, "ping"));
        assert_eq!((n.timestamp(), n.kind()), (110, "networks"));
    }

    #[test]
    fn test_network_display_matches_row_layout() {
        let n = Network::from_access_point(home_ap(), 110);
        assert_eq!(n.to_string(), "home aa:bb:cc:dd:ee:ff 6 -40");
        assert_eq!(n.timestamp.timestamp(), 110);
    }

    #[test]
    fn test_metric_set_field_names() {
        let mut set = MetricSet::default();
        set.pings.push(Ping {
            timestamp: to_datetime(105),
            rtt: 42_000,
        });
        let json = serde_json::to_value(&set).unwrap();
        assert!(json.get("networks").unwrap().as_array().unwrap().is_empty());
        assert!(json.get("connectivity").is_some());
        assert_eq!(json["pings"][0]["rtt"], 42_000);
        assert_eq!(json["pings"][0]["timestamp"], "1970-01-01T00:01:45Z");
    }

    #[test]
    fn test_metric_set_accepts_null_collections() {
        let set: MetricSet =
            serde_json::from_str(r#"{"networks":null,"connectivity":null,"pings":null}"#).unwrap();
        assert!(set.is_empty());
        let set: MetricSet = serde_json::from_str("{}").unwrap();
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_metric_set_extend_preserves_order() {
        let mut a = MetricSet::default();
        a.connectivity.push(Connectivity {
            timestamp: to_datetime(1),
            connected: true,
        });
        let mut b = MetricSet::default();
        b.connectivity.push(Connectivity {
            timestamp: to_datetime(2),
            connected: false,
        });
        a.extend(b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.connectivity[1].timestamp.timestamp(), 2);
    }
}
