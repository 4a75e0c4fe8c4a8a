//! Batch assembly: materialise every stored observation of one window.

use log::{debug, warn};

use crate::error::StoreError;
use crate::observation::{Connectivity, MetricSet, Network, Ping, to_datetime};
use crate::store::{DataPoint, Metric, SampleStore, decode_snapshot, parse_snapshot_key};
use crate::window::Window;

/// All observations of one window, partitioned by kind.
///
/// A batch has no identity beyond its window; it lives only in memory while
/// the delivery cycle owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub window: Window,
    pub metrics: MetricSet,
    /// Snapshot records that could not be read or decoded.
    pub skipped_records: usize,
    /// The stored records this batch was read from; retirement removes
    /// exactly these.
    pub records: StoredRecords,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// Identity of every stored record read into a [`Batch`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredRecords {
    /// Snapshot keys, undecodable ones included.
    pub snapshot_keys: Vec<Vec<u8>>,
    pub pings: Vec<DataPoint>,
    pub connectivity: Vec<DataPoint>,
}

impl StoredRecords {
    pub fn points(&self, metric: Metric) -> &[DataPoint] {
        match metric {
            Metric::Ping => &self.pings,
            Metric::Connectivity => &self.connectivity,
        }
    }
}

/// Reads a window out of the sample store.
pub struct BatchAssembler {
    store: SampleStore,
}

impl BatchAssembler {
    pub fn new(store: SampleStore) -> Self {
        Self { store }
    }

    /// Build the batch for `window`.
    ///
    /// Scalar read failures abort assembly. A snapshot that cannot be read or
    /// decoded is logged and skipped; the rest of the batch is still built.
    pub fn assemble(&self, window: Window) -> Result<Batch, StoreError> {
        let mut metrics = MetricSet::default();
        let mut records = StoredRecords {
            pings: self
                .store
                .scalars()
                .select(Metric::Ping, window.start, window.end)?,
            connectivity: self
                .store
                .scalars()
                .select(Metric::Connectivity, window.start, window.end)?,
            ..StoredRecords::default()
        };

        metrics.pings = records
            .pings
            .iter()
            .map(|point| Ping {
                timestamp: to_datetime(point.timestamp),
                rtt: point.value as i64,
            })
            .collect();
        metrics.connectivity = records
            .connectivity
            .iter()
            .map(|point| Connectivity {
                timestamp: to_datetime(point.timestamp),
                connected: point.value == 1.0,
            })
            .collect();

        let skipped_records =
            self.read_networks(window, &mut metrics.networks, &mut records.snapshot_keys)?;

        debug!(
            "assembled window {window}: {} networks, {} connectivity, {} pings, {} skipped",
            metrics.networks.len(),
            metrics.connectivity.len(),
            metrics.pings.len(),
            skipped_records
        );

        Ok(Batch {
            window,
            metrics,
            skipped_records,
            records,
        })
    }

    /// Decode every snapshot of `window` into `out`, collecting the keys of
    /// the records that were present into `keys`.
    fn read_networks(
        &self,
        window: Window,
        out: &mut Vec<Network>,
        keys: &mut Vec<Vec<u8>>,
    ) -> Result<usize, StoreError> {
        let (low, high) = window.key_range();
        let kv = self.store.snapshots();
        let mut skipped = 0;

        kv.scan_range(&low, &high, &mut |key: &[u8]| {
            let captured_at = match parse_snapshot_key(key) {
                Ok(ts) => ts,
                Err(e) => {
                    warn!("window {window}: skipping record: {e}");
                    keys.push(key.to_vec());
                    skipped += 1;
                    return Ok(());
                }
            };
            let bytes = match kv.get(key) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    warn!("window {window}: snapshot {captured_at} vanished during scan");
                    skipped += 1;
                    return Ok(());
                }
                Err(e) => {
                    warn!("window {window}: error getting snapshot {captured_at}: {e}");
                    skipped += 1;
                    return Ok(());
                }
            };
            keys.push(key.to_vec());
            match decode_snapshot(&bytes) {
                Ok(access_points) => out.extend(
                    access_points
                        .into_iter()
                        .map(|ap| Network::from_access_point(ap, captured_at)),
                ),
                Err(e) => {
                    warn!("window {window}: error decoding snapshot {captured_at}: {e}");
                    skipped += 1;
                }
            }
            Ok(())
        })?;

        Ok(skipped)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::observation::{AccessPoint, NetworkSnapshot, Observation};
    use crate::store::{KeyValueStore, MemoryStore, snapshot_key};

    fn setup() -> (Arc<MemoryStore>, SampleStore) {
        let mem = Arc::new(MemoryStore::new());
        let store = SampleStore::new(mem.clone(), mem.clone());
        (mem, store)
    }

    fn ap(ssid: &str) -> AccessPoint {
        AccessPoint {
            ssid: ssid.to_string(),
            bssid: "aa:bb:cc:dd:ee:ff".to_string(),
            channel: 6,
            rssi: -40,
        }
    }

    fn snapshot(at: u64, ssids: &[&str]) -> Observation {
        Observation::Networks(NetworkSnapshot {
            captured_at: at,
            access_points: ssids.iter().map(|s| ap(s)).collect(),
        })
    }

    #[test]
    fn test_assemble_partitions_by_kind() {
        let (_mem, store) = setup();
        store
            .record(&Observation::Connectivity {
                at: 100,
                connected: true,
            })
            .unwrap();
        store
            .record(&Observation::Ping {
                at: 105,
                rtt_micros: 42_000,
            })
            .unwrap();
        store.record(&snapshot(110, &["home"])).unwrap();

        let batch = BatchAssembler::new(store)
            .assemble(Window::new(0, 200))
            .unwrap();
        assert_eq!(batch.metrics.connectivity.len(), 1);
        assert!(batch.metrics.connectivity[0].connected);
        assert_eq!(batch.metrics.pings[0].rtt, 42_000);
        assert_eq!(batch.metrics.pings[0].timestamp.timestamp(), 105);
        assert_eq!(batch.metrics.networks[0].ssid, "home");
        assert_eq!(batch.metrics.networks[0].timestamp.timestamp(), 110);
        assert_eq!(batch.skipped_records, 0);
    }

    #[test]
    fn test_boundary_observation_goes_to_later_window() {
        let (_mem, store) = setup();
        store
            .record(&Observation::Ping {
                at: 200,
                rtt_micros: 1,
            })
            .unwrap();
        store.record(&snapshot(200, &["edge"])).unwrap();
        let assembler = BatchAssembler::new(store);

        let first = assembler.assemble(Window::new(100, 200)).unwrap();
        assert!(first.is_empty());
        let second = assembler.assemble(Window::new(200, 300)).unwrap();
        assert_eq!(second.metrics.pings.len(), 1);
        assert_eq!(second.metrics.networks.len(), 1);
    }

    #[test]
    fn test_networks_concatenate_in_key_order() {
        let (_mem, store) = setup();
        store.record(&snapshot(30, &["c"])).unwrap();
        store.record(&snapshot(10, &["a", "b"])).unwrap();
        let batch = BatchAssembler::new(store)
            .assemble(Window::new(0, 100))
            .unwrap();
        let ssids: Vec<_> = batch
            .metrics
            .networks
            .iter()
            .map(|n| n.ssid.as_str())
            .collect();
        assert_eq!(ssids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_corrupt_snapshot_is_skipped() {
        let (mem, store) = setup();
        store.record(&snapshot(10, &["good"])).unwrap();
        mem.put(&snapshot_key(20), b"{not json").unwrap();
        store.record(&snapshot(30, &["also good"])).unwrap();

        let batch = BatchAssembler::new(store)
            .assemble(Window::new(0, 100))
            .unwrap();
        assert_eq!(batch.metrics.networks.len(), 2);
        assert_eq!(batch.skipped_records, 1);
        // The unreadable record is still retired with the window.
        assert_eq!(
            batch.records.snapshot_keys,
            vec![snapshot_key(10), snapshot_key(20), snapshot_key(30)]
        );
    }

    #[test]
    fn test_records_identify_assembled_points() {
        let (_mem, store) = setup();
        for at in [5, 5, 50] {
            store
                .record(&Observation::Ping {
                    at,
                    rtt_micros: 7,
                })
                .unwrap();
        }
        let batch = BatchAssembler::new(store)
            .assemble(Window::new(0, 10))
            .unwrap();
        assert_eq!(batch.records.points(Metric::Ping).len(), 2);
        assert_ne!(batch.records.pings[0].seq, batch.records.pings[1].seq);
        assert!(batch.records.points(Metric::Connectivity).is_empty());
    }

    #[test]
    fn test_connectivity_zero_is_disconnected() {
        let (_mem, store) = setup();
        store
            .record(&Observation::Connectivity {
                at: 1,
                connected: false,
            })
            .unwrap();
        let batch = BatchAssembler::new(store)
            .assemble(Window::new(0, 10))
            .unwrap();
        assert!(!batch.metrics.connectivity[0].connected);
    }
}
