//! The agent runtime: one thread per observation source plus one delivery
//! thread, all sharing the durable stores.
//!
//! Sources and the delivery cycle never talk to each other directly; the
//! stores are the only shared state. Shutdown stops every loop at its next
//! sleep, after which the stores are flushed.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::error::StoreError;
use crate::pipeline::{CycleOutcome, DeliveryCycle};
use crate::shutdown::Shutdown;
use crate::source::{ObservationSource, SourceHealth, SourceState};
use crate::store::SampleStore;
use crate::unix_now;

/// Final counters reported when the agent stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentSummary {
    pub cycles_ok: u64,
    pub cycles_failed: u64,
    pub sources: Vec<SourceHealth>,
}

/// Owns everything the daemon runs.
pub struct Agent {
    store: SampleStore,
    sources: Vec<SourceState>,
    cycle: DeliveryCycle,
    cycle_period: Duration,
}

impl Agent {
    pub fn new(store: SampleStore, cycle: DeliveryCycle, cycle_period: Duration) -> Self {
        Self {
            store,
            sources: Vec::new(),
            cycle,
            cycle_period,
        }
    }

    /// Register a source sampled every `period`. Unavailable sources are
    /// logged and left out.
    pub fn add_source(&mut self, source: Box<dyn ObservationSource>, period: Duration) {
        if !source.is_available() {
            warn!("source {} is not available on this host, skipping", source.name());
            return;
        }
        info!("source {} every {:?}", source.name(), period);
        self.sources.push(SourceState::new(source, period));
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Run until `shutdown` is triggered, then join every thread and flush.
    ///
    /// The first delivery cycle runs immediately so data left over from a
    /// previous run ships without waiting a full period.
    pub fn run(self, shutdown: &Shutdown) -> Result<AgentSummary, StoreError> {
        let Agent {
            store,
            sources,
            cycle,
            cycle_period,
        } = self;

        let start = cycle.initialize()?;
        info!(
            "agent started: {} sources, next window starts at {start}, cycle every {:?}",
            sources.len(),
            cycle_period
        );

        let mut summary = thread::scope(|s| {
            let source_handles: Vec<_> = sources
                .into_iter()
                .map(|mut state| {
                    let store = &store;
                    s.spawn(move || {
                        sample_loop(&mut state, store, shutdown);
                        state.health()
                    })
                })
                .collect();

            let cycle = &cycle;
            let delivery = s.spawn(move || delivery_loop(cycle, cycle_period, shutdown));

            let mut summary = AgentSummary::default();
            for handle in source_handles {
                match handle.join() {
                    Ok(health) => summary.sources.push(health),
                    Err(_) => error!("a source thread panicked"),
                }
            }
            match delivery.join() {
                Ok((ok, failed)) => {
                    summary.cycles_ok = ok;
                    summary.cycles_failed = failed;
                }
                Err(_) => error!("the delivery thread panicked"),
            }
            summary
        });

        store.flush()?;
        summary.sources.sort_by(|a, b| a.name.cmp(&b.name));
        info!(
            "agent stopped: {} cycles delivered, {} failed",
            summary.cycles_ok, summary.cycles_failed
        );
        Ok(summary)
    }
}

fn sample_loop(state: &mut SourceState, store: &SampleStore, shutdown: &Shutdown) {
    let name = state.source.name();
    while shutdown.is_running() {
        let t0 = Instant::now();
        match state.source.observe() {
            Ok(observation) => {
                let latency = t0.elapsed();
                match store.record(&observation) {
                    Ok(()) => state.record_success(latency),
                    Err(e) => {
                        warn!(
                            "{name}: storing {} sample at {}: {e}",
                            observation.kind(),
                            observation.timestamp()
                        );
                        state.record_failure(latency);
                    }
                }
            }
            Err(e) => {
                if state.record_failure(t0.elapsed()) {
                    warn!(
                        "{name}: unhealthy after {} consecutive failures: {e}",
                        state.consecutive_failures
                    );
                } else {
                    debug!("{name}: no sample: {e}");
                }
            }
        }
        if !shutdown.sleep(state.period.saturating_sub(t0.elapsed())) {
            break;
        }
    }
    debug!(
        "{name}: stopped after {} samples, {} failures",
        state.observations, state.failures
    );
}

fn delivery_loop(cycle: &DeliveryCycle, period: Duration, shutdown: &Shutdown) -> (u64, u64) {
    let (mut ok, mut failed) = (0, 0);
    while shutdown.is_running() {
        match cycle.run_once(unix_now()) {
            Ok(report) => {
                ok += 1;
                match report.outcome {
                    CycleOutcome::Skipped => debug!("cycle skipped: window {}", report.window),
                    CycleOutcome::Delivered => info!(
                        "cycle done: window {} ({} entries, {} attempts)",
                        report.window, report.entries, report.attempts
                    ),
                    CycleOutcome::Spilled(path) => warn!(
                        "cycle done: window {} spilled to {}",
                        report.window,
                        path.display()
                    ),
                }
            }
            Err(e) => {
                failed += 1;
                error!("delivery cycle failed: {e}");
            }
        }
        if !shutdown.sleep(period) {
            break;
        }
    }
    (ok, failed)
}
