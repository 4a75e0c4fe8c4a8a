//! One delivery cycle: window, assemble, deliver, retire.
//!
//! ```text
//! checkpoint ──► Window [checkpoint, now - settle)
//!                  │
//!                  ▼
//!          BatchAssembler::assemble
//!                  │
//!                  ▼
//!        deliver_with_retry ──(exhausted)──► spill file
//!                  │                              │
//!                  ▼                              ▼
//!           Retirer::retire ◄─────────────────────┘
//! ```
//!
//! Cycles never overlap: the agent drives them from a single thread, and
//! [`DeliveryCycle::run_once`] takes `&self` but holds no state between calls
//! other than what is persisted.

use std::path::PathBuf;
use std::time::Duration;

use log::{error, info};

use crate::Timestamp;
use crate::assembler::BatchAssembler;
use crate::config::AgentConfig;
use crate::delivery::{Deliver, RetryPolicy, deliver_with_retry, spill_batch};
use crate::error::{DeliveryError, Result, StoreError};
use crate::retirement::{RetirementReport, Retirer};
use crate::shutdown::Shutdown;
use crate::store::SampleStore;
use crate::window::{Window, WindowTracker};

/// Tunables of the delivery cycle.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub retry: RetryPolicy,
    pub spill_dir: Option<PathBuf>,
    pub settle: Duration,
    pub prune_scalars: bool,
    pub checkpoint_retries: u32,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            spill_dir: None,
            settle: Duration::from_secs(5),
            prune_scalars: true,
            checkpoint_retries: 5,
        }
    }
}

impl CycleSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            retry: config.retry,
            spill_dir: config.spill_dir.clone(),
            settle: config.settle,
            prune_scalars: config.prune_scalars,
            checkpoint_retries: config.checkpoint_retries,
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The window had zero length; nothing was sent.
    Skipped,
    /// The collector accepted the batch.
    Delivered,
    /// Retries ran out and the batch was written to this file instead.
    Spilled(PathBuf),
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub window: Window,
    pub outcome: CycleOutcome,
    /// Entries in the batch across all three kinds.
    pub entries: usize,
    pub skipped_records: usize,
    /// Delivery attempts made.
    pub attempts: u32,
    pub retirement: Option<RetirementReport>,
}

/// Drives windows from the store to the collector.
pub struct DeliveryCycle {
    assembler: BatchAssembler,
    client: Box<dyn Deliver>,
    tracker: WindowTracker,
    retirer: Retirer,
    settings: CycleSettings,
    shutdown: Shutdown,
}

impl DeliveryCycle {
    /// `boot_time` is the first window start when no checkpoint is stored.
    pub fn new(
        store: SampleStore,
        client: Box<dyn Deliver>,
        boot_time: Timestamp,
        settings: CycleSettings,
        shutdown: Shutdown,
    ) -> Self {
        let tracker = WindowTracker::new(store.snapshots_handle(), boot_time);
        let retirer = Retirer::new(
            store.clone(),
            settings.prune_scalars,
            settings.checkpoint_retries,
        );
        Self {
            assembler: BatchAssembler::new(store),
            client,
            tracker,
            retirer,
            settings,
            shutdown,
        }
    }

    pub fn tracker(&self) -> &WindowTracker {
        &self.tracker
    }

    /// Persist the boot time as checkpoint if none exists yet.
    pub fn initialize(&self) -> Result<Timestamp, StoreError> {
        self.tracker.ensure_initialized()
    }

    /// The window a cycle started at `now` would deliver.
    pub fn pending_window(&self, now: Timestamp) -> Result<Window, StoreError> {
        let start = self.tracker.current_window_start()?;
        let end = now.saturating_sub(self.settings.settle.as_secs());
        Ok(Window::new(start, end))
    }

    /// Run one cycle for the window ending `settle` before `now`.
    pub fn run_once(&self, now: Timestamp) -> Result<CycleReport> {
        let window = self.pending_window(now)?;
        if window.is_empty() {
            info!("window {window} has zero length, nothing to deliver");
            return Ok(CycleReport {
                window,
                outcome: CycleOutcome::Skipped,
                entries: 0,
                skipped_records: 0,
                attempts: 0,
                retirement: None,
            });
        }

        let batch = self
            .assembler
            .assemble(window)
            .inspect_err(|e| error!("window {window}: assembling batch: {e}"))?;
        info!(
            "delivering window {window}: {} networks, {} connectivity, {} pings",
            batch.metrics.networks.len(),
            batch.metrics.connectivity.len(),
            batch.metrics.pings.len()
        );

        let (outcome, attempts) = match deliver_with_retry(
            self.client.as_ref(),
            &batch,
            &self.settings.retry,
            &self.shutdown,
        ) {
            Ok(attempts) => (CycleOutcome::Delivered, attempts),
            Err(DeliveryError::Exhausted { attempts }) => match &self.settings.spill_dir {
                Some(dir) => {
                    let path = spill_batch(dir, &batch).inspect_err(|e| {
                        error!("window {window}: spilling undeliverable batch: {e}")
                    })?;
                    (CycleOutcome::Spilled(path), attempts)
                }
                None => {
                    error!("window {window}: giving up after {attempts} attempts, window stays pending");
                    return Err(DeliveryError::Exhausted { attempts }.into());
                }
            },
            Err(e) => {
                info!("window {window}: delivery abandoned: {e}");
                return Err(e.into());
            }
        };

        let retirement = self.retirer.retire(&self.tracker, &batch, &self.shutdown)?;

        Ok(CycleReport {
            window,
            outcome,
            entries: batch.metrics.len(),
            skipped_records: batch.skipped_records,
            attempts,
            retirement: Some(retirement),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::assembler::Batch;
    use crate::error::Error;
    use crate::observation::{AccessPoint, MetricSet, NetworkSnapshot, Observation};
    use crate::store::{KeyValueStore, MemoryStore, Metric, ScalarStore, snapshot_key};

    /// Records every payload; fails the first `failures` calls with a 500.
    #[derive(Clone, Default)]
    struct Recorder {
        failures: usize,
        sent: Arc<Mutex<Vec<MetricSet>>>,
    }

    impl Deliver for Recorder {
        fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(batch.metrics.clone());
            if sent.len() <= self.failures {
                Err(DeliveryError::Status(500))
            } else {
                Ok(())
            }
        }
    }

    fn settings(max_attempts: Option<u32>, spill_dir: Option<PathBuf>) -> CycleSettings {
        CycleSettings {
            retry: RetryPolicy {
                delay: Duration::from_millis(1),
                max_attempts,
            },
            spill_dir,
            settle: Duration::ZERO,
            ..CycleSettings::default()
        }
    }

    fn setup(recorder: &Recorder, settings: CycleSettings) -> (Arc<MemoryStore>, SampleStore, DeliveryCycle) {
        let mem = Arc::new(MemoryStore::new());
        let store = SampleStore::new(mem.clone(), mem.clone());
        let cycle = DeliveryCycle::new(
            store.clone(),
            Box::new(recorder.clone()),
            0,
            settings,
            Shutdown::new(),
        );
        (mem, store, cycle)
    }

    fn seed(store: &SampleStore) {
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
        store
            .record(&Observation::Networks(NetworkSnapshot {
                captured_at: 110,
                access_points: vec![AccessPoint {
                    ssid: "home".into(),
                    bssid: "aa:bb:cc:dd:ee:ff".into(),
                    channel: 6,
                    rssi: -40,
                }],
            }))
            .unwrap();
    }

    #[test]
    fn test_cycle_delivers_and_retires() {
        let recorder = Recorder::default();
        let (mem, store, cycle) = setup(&recorder, settings(None, None));
        seed(&store);

        let report = cycle.run_once(200).unwrap();
        assert_eq!(report.window, Window::new(0, 200));
        assert_eq!(report.outcome, CycleOutcome::Delivered);
        assert_eq!(report.entries, 3);
        assert_eq!(report.attempts, 1);
        assert_eq!(cycle.tracker().current_window_start().unwrap(), 200);
        assert!(mem.keys_in_range(&snapshot_key(0), &snapshot_key(200)).unwrap().is_empty());
    }

    #[test]
    fn test_retries_send_identical_batches() {
        let recorder = Recorder {
            failures: 2,
            ..Recorder::default()
        };
        let (_mem, store, cycle) = setup(&recorder, settings(None, None));
        seed(&store);

        let report = cycle.run_once(200).unwrap();
        assert_eq!(report.attempts, 3);
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|m| m == &sent[0]));
        assert_eq!(sent[0].len(), 3);
    }

    #[test]
    fn test_settle_holds_back_recent_seconds() {
        let recorder = Recorder::default();
        let mut s = settings(None, None);
        s.settle = Duration::from_secs(5);
        let (_mem, _store, cycle) = setup(&recorder, s);
        assert_eq!(cycle.pending_window(205).unwrap(), Window::new(0, 200));
        // Too close to the checkpoint: nothing to send.
        assert_eq!(cycle.pending_window(3).unwrap(), Window::new(0, 0));
    }

    #[test]
    fn test_zero_length_window_is_skipped() {
        let recorder = Recorder::default();
        let (_mem, _store, cycle) = setup(&recorder, settings(None, None));
        let report = cycle.run_once(0).unwrap();
        assert_eq!(report.outcome, CycleOutcome::Skipped);
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_consecutive_cycles_chain_windows() {
        let recorder = Recorder::default();
        let (_mem, store, cycle) = setup(&recorder, settings(None, None));
        cycle.run_once(200).unwrap();
        store
            .record(&Observation::Ping {
                at: 200,
                rtt_micros: 7,
            })
            .unwrap();
        let second = cycle.run_once(300).unwrap();
        assert_eq!(second.window, Window::new(200, 300));
        assert_eq!(second.entries, 1);
    }

    #[test]
    fn test_exhausted_without_spill_keeps_window() {
        let recorder = Recorder {
            failures: usize::MAX,
            ..Recorder::default()
        };
        let (mem, store, cycle) = setup(&recorder, settings(Some(2), None));
        seed(&store);

        let err = cycle.run_once(200).unwrap_err();
        assert!(matches!(
            err,
            Error::Delivery(DeliveryError::Exhausted { attempts: 2 })
        ));
        assert_eq!(cycle.tracker().checkpoint().unwrap(), None);
        assert!(mem.get(&snapshot_key(110)).unwrap().is_some());
    }

    #[test]
    fn test_exhausted_with_spill_retires_window() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder {
            failures: usize::MAX,
            ..Recorder::default()
        };
        let (mem, store, cycle) =
            setup(&recorder, settings(Some(2), Some(dir.path().to_path_buf())));
        seed(&store);

        let report = cycle.run_once(200).unwrap();
        let CycleOutcome::Spilled(path) = &report.outcome else {
            panic!("expected spill, got {:?}", report.outcome);
        };
        assert!(path.ends_with("batch-0-200.json"));
        assert!(path.exists());
        assert_eq!(cycle.tracker().current_window_start().unwrap(), 200);
        assert!(mem.get(&snapshot_key(110)).unwrap().is_none());
    }

    #[test]
    fn test_shutdown_abandons_without_retiring() {
        let recorder = Recorder {
            failures: usize::MAX,
            ..Recorder::default()
        };
        let mem = Arc::new(MemoryStore::new());
        let store = SampleStore::new(mem.clone(), mem.clone());
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let cycle = DeliveryCycle::new(
            store.clone(),
            Box::new(recorder.clone()),
            0,
            settings(None, None),
            shutdown,
        );
        seed(&store);

        let err = cycle.run_once(200).unwrap_err();
        assert!(matches!(err, Error::Delivery(DeliveryError::Interrupted)));
        assert_eq!(cycle.tracker().checkpoint().unwrap(), None);
    }

    /// Stores a ping inside the window being delivered, then accepts.
    struct WritesDuringDelivery {
        store: SampleStore,
    }

    impl Deliver for WritesDuringDelivery {
        fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
            assert!(batch.metrics.pings.iter().all(|p| p.timestamp.timestamp() != 150));
            self.store
                .record(&Observation::Ping {
                    at: 150,
                    rtt_micros: 9_000,
                })
                .map_err(|_| DeliveryError::Status(500))
        }
    }

    #[test]
    fn test_write_during_delivery_is_not_retired() {
        let mem = Arc::new(MemoryStore::new());
        let store = SampleStore::new(mem.clone(), mem.clone());
        let cycle = DeliveryCycle::new(
            store.clone(),
            Box::new(WritesDuringDelivery {
                store: store.clone(),
            }),
            0,
            settings(None, None),
            Shutdown::new(),
        );
        seed(&store);

        let report = cycle.run_once(200).unwrap();
        assert_eq!(report.entries, 3);
        assert_eq!(report.retirement.map(|r| r.scalars_pruned), Some(2));

        // The delivered ping at 105 is gone, the undelivered one at 150 stays.
        let pings = mem.select(Metric::Ping, 0, 200).unwrap();
        assert_eq!(pings.len(), 1);
        assert_eq!(pings[0].timestamp, 150);
        assert_eq!(pings[0].value, 9_000.0);
    }
}
