//! Retirement of delivered windows.
//!
//! After the collector has accepted a batch, the snapshot records it was read
//! from are deleted and the checkpoint moves to the window end. Both go into
//! one [`WriteBatch`], so a crash leaves either the old state (window is
//! redelivered) or the new one, never deleted data with a stale checkpoint.
//!
//! Only records carried by the batch are removed. Anything stored into the
//! window after assembly stays on disk.

use std::time::Duration;

use log::{debug, error, info, warn};

use crate::assembler::Batch;
use crate::error::StoreError;
use crate::shutdown::Shutdown;
use crate::store::{Metric, SampleStore, WriteBatch};
use crate::window::{Window, WindowTracker};

/// Delay between two attempts to persist the retirement batch.
const COMMIT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// What one retirement removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetirementReport {
    pub snapshots_deleted: usize,
    pub scalars_pruned: usize,
    /// Commit attempts used.
    pub attempts: u32,
}

/// Deletes delivered data and advances the checkpoint.
pub struct Retirer {
    store: SampleStore,
    prune_scalars: bool,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Retirer {
    pub fn new(store: SampleStore, prune_scalars: bool, max_attempts: u32) -> Self {
        Self {
            store,
            prune_scalars,
            max_attempts: max_attempts.max(1),
            retry_delay: COMMIT_RETRY_DELAY,
        }
    }

    /// Override the delay between commit attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Retire the window of `delivered`. Call only after the collector
    /// confirmed delivery.
    ///
    /// An empty batch still advances the checkpoint. A commit failure leaves
    /// the checkpoint where it was; the caller redelivers the window on the
    /// next cycle.
    pub fn retire(
        &self,
        tracker: &WindowTracker,
        delivered: &Batch,
        shutdown: &Shutdown,
    ) -> Result<RetirementReport, StoreError> {
        let window = delivered.window;
        let keys = &delivered.records.snapshot_keys;

        let mut batch = WriteBatch::new();
        for key in keys {
            batch.delete(key.as_slice());
        }
        tracker.stage_advance(&mut batch, window.end)?;

        let attempts = self.commit(window, batch, shutdown)?;
        info!(
            "window {window} retired: {} snapshots deleted, checkpoint now {}",
            keys.len(),
            window.end
        );

        let scalars_pruned = if self.prune_scalars {
            self.prune(delivered)
        } else {
            0
        };

        Ok(RetirementReport {
            snapshots_deleted: keys.len(),
            scalars_pruned,
            attempts,
        })
    }

    fn commit(
        &self,
        window: Window,
        batch: WriteBatch,
        shutdown: &Shutdown,
    ) -> Result<u32, StoreError> {
        let kv = self.store.snapshots();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = kv.apply(batch.clone()).and_then(|()| kv.flush());
            match result {
                Ok(()) => return Ok(attempt),
                Err(e) if attempt >= self.max_attempts => {
                    error!(
                        "window {window}: persisting checkpoint failed after {attempt} attempts: {e}"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!("window {window}: persisting checkpoint failed (attempt {attempt}): {e}");
                    if !shutdown.sleep(self.retry_delay) {
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Drop the delivered scalar points. Failures only cost disk space, so
    /// they are logged and not propagated.
    fn prune(&self, delivered: &Batch) -> usize {
        let window = delivered.window;
        let mut pruned = 0;
        for metric in Metric::ALL {
            let points = delivered.records.points(metric);
            if points.is_empty() {
                continue;
            }
            match self.store.scalars().remove(metric, points) {
                Ok(n) => pruned += n,
                Err(e) => warn!("window {window}: pruning {metric} points: {e}"),
            }
        }
        debug!("window {window}: pruned {pruned} scalar points");
        pruned
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::assembler::BatchAssembler;
    use crate::observation::{AccessPoint, NetworkSnapshot, Observation};
    use crate::store::{CHECKPOINT_KEY, KeyValueStore, MemoryStore, ScalarStore, snapshot_key};

    fn setup() -> (Arc<MemoryStore>, SampleStore, WindowTracker) {
        let mem = Arc::new(MemoryStore::new());
        let store = SampleStore::new(mem.clone(), mem.clone());
        let tracker = WindowTracker::new(mem.clone(), 0);
        (mem, store, tracker)
    }

    fn assembled(store: &SampleStore, start: u64, end: u64) -> Batch {
        BatchAssembler::new(store.clone())
            .assemble(Window::new(start, end))
            .unwrap()
    }

    fn snapshot(at: u64) -> Observation {
        Observation::Networks(NetworkSnapshot {
            captured_at: at,
            access_points: vec![AccessPoint {
                ssid: "home".into(),
                bssid: "aa:bb:cc:dd:ee:ff".into(),
                channel: 6,
                rssi: -40,
            }],
        })
    }

    #[test]
    fn test_retire_deletes_window_and_advances() {
        let (mem, store, tracker) = setup();
        store.record(&snapshot(50)).unwrap();
        store.record(&snapshot(150)).unwrap();
        store.record(&snapshot(200)).unwrap();

        let report = Retirer::new(store.clone(), true, 5)
            .retire(&tracker, &assembled(&store, 0, 200), &Shutdown::new())
            .unwrap();
        assert_eq!(report.snapshots_deleted, 2);
        assert_eq!(report.attempts, 1);
        assert_eq!(tracker.current_window_start().unwrap(), 200);

        // The snapshot at the boundary belongs to the next window.
        assert!(mem.get(&snapshot_key(200)).unwrap().is_some());
        assert!(mem.keys_in_range(&snapshot_key(0), &snapshot_key(200)).unwrap().is_empty());
        assert_eq!(mem.get(CHECKPOINT_KEY).unwrap(), Some(b"200".to_vec()));
    }

    #[test]
    fn test_retire_empty_window_still_advances() {
        let (_mem, store, tracker) = setup();
        let report = Retirer::new(store.clone(), true, 5)
            .retire(&tracker, &assembled(&store, 0, 300), &Shutdown::new())
            .unwrap();
        assert_eq!(report.snapshots_deleted, 0);
        assert_eq!(tracker.current_window_start().unwrap(), 300);
    }

    fn record_scalars(store: &SampleStore) {
        for obs in [
            Observation::Ping {
                at: 10,
                rtt_micros: 1,
            },
            Observation::Connectivity {
                at: 20,
                connected: true,
            },
            Observation::Ping {
                at: 150,
                rtt_micros: 2,
            },
        ] {
            store.record(&obs).unwrap();
        }
    }

    #[test]
    fn test_prune_scalars_inside_window_only() {
        let (mem, store, tracker) = setup();
        record_scalars(&store);
        let report = Retirer::new(store.clone(), true, 5)
            .retire(&tracker, &assembled(&store, 0, 100), &Shutdown::new())
            .unwrap();
        assert_eq!(report.scalars_pruned, 2);
        assert!(mem.select(Metric::Ping, 0, 100).unwrap().is_empty());
        assert_eq!(mem.select(Metric::Ping, 100, 200).unwrap().len(), 1);
    }

    #[test]
    fn test_scalars_kept_when_pruning_disabled() {
        let (mem, store, tracker) = setup();
        record_scalars(&store);
        let report = Retirer::new(store.clone(), false, 5)
            .retire(&tracker, &assembled(&store, 0, 100), &Shutdown::new())
            .unwrap();
        assert_eq!(report.scalars_pruned, 0);
        assert_eq!(mem.select(Metric::Ping, 0, 100).unwrap().len(), 1);
        assert_eq!(mem.select(Metric::Connectivity, 0, 100).unwrap().len(), 1);
    }

    #[test]
    fn test_records_stored_after_assembly_survive() {
        let (mem, store, tracker) = setup();
        store.record(&snapshot(50)).unwrap();
        record_scalars(&store);
        let batch = assembled(&store, 0, 200);

        // Written into the window while the batch was in flight.
        store.record(&snapshot(60)).unwrap();
        store
            .record(&Observation::Ping {
                at: 150,
                rtt_micros: 3,
            })
            .unwrap();

        let report = Retirer::new(store.clone(), true, 5)
            .retire(&tracker, &batch, &Shutdown::new())
            .unwrap();
        assert_eq!(report.snapshots_deleted, 1);
        assert_eq!(report.scalars_pruned, 3);
        assert!(mem.get(&snapshot_key(50)).unwrap().is_none());
        assert!(mem.get(&snapshot_key(60)).unwrap().is_some());
        let pings = mem.select(Metric::Ping, 0, 200).unwrap();
        assert_eq!(pings.len(), 1);
        assert_eq!(pings[0].value, 3.0);
    }

    #[test]
    fn test_retire_rejects_backward_window() {
        let (_mem, store, tracker) = setup();
        tracker.advance(500).unwrap();
        let err = Retirer::new(store.clone(), true, 5)
            .retire(&tracker, &assembled(&store, 0, 100), &Shutdown::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::NonMonotonic { .. }));
        assert_eq!(tracker.current_window_start().unwrap(), 500);
    }

    // -----------------------------------------------------------------------
    // Commit retry
    // -----------------------------------------------------------------------

    /// Key-value store whose first `failures` batch applications fail.
    struct FailingApply {
        inner: MemoryStore,
        failures: u32,
        calls: AtomicU32,
    }

    impl KeyValueStore for FailingApply {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key)
        }
        fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
            self.inner.put(key, value)
        }
        fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
            self.inner.delete(key)
        }
        fn scan_range(
            &self,
            low: &[u8],
            high: &[u8],
            visit: &mut dyn FnMut(&[u8]) -> Result<(), StoreError>,
        ) -> Result<(), StoreError> {
            self.inner.scan_range(low, high, visit)
        }
        fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(StoreError::CorruptCheckpoint("disk hiccup".into()));
            }
            self.inner.apply(batch)
        }
        fn flush(&self) -> Result<(), StoreError> {
            KeyValueStore::flush(&self.inner)
        }
    }

    fn failing(failures: u32) -> (Arc<FailingApply>, SampleStore, WindowTracker) {
        let kv = Arc::new(FailingApply {
            inner: MemoryStore::new(),
            failures,
            calls: AtomicU32::new(0),
        });
        let store = SampleStore::new(Arc::new(MemoryStore::new()), kv.clone());
        let tracker = WindowTracker::new(kv.clone(), 0);
        (kv, store, tracker)
    }

    #[test]
    fn test_commit_retries_transient_failure() {
        let (kv, store, tracker) = failing(2);
        store.record(&snapshot(10)).unwrap();
        let report = Retirer::new(store.clone(), true, 5)
            .with_retry_delay(Duration::from_millis(1))
            .retire(&tracker, &assembled(&store, 0, 100), &Shutdown::new())
            .unwrap();
        assert_eq!(report.attempts, 3);
        assert_eq!(tracker.current_window_start().unwrap(), 100);
        assert!(kv.get(&snapshot_key(10)).unwrap().is_none());
    }

    #[test]
    fn test_commit_gives_up_and_keeps_data() {
        let (kv, store, tracker) = failing(u32::MAX);
        store.record(&snapshot(10)).unwrap();
        let result = Retirer::new(store.clone(), true, 3)
            .with_retry_delay(Duration::from_millis(1))
            .retire(&tracker, &assembled(&store, 0, 100), &Shutdown::new());
        assert!(result.is_err());
        assert_eq!(kv.calls.load(Ordering::SeqCst), 3);
        // Neither the deletion nor the checkpoint landed.
        assert!(kv.get(&snapshot_key(10)).unwrap().is_some());
        assert_eq!(tracker.checkpoint().unwrap(), None);
    }
}
