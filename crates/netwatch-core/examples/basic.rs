//! Basic delivery cycle example.
//!
//! Records a few observations into an in-memory store, then runs one cycle
//! against a collector that prints the JSON it would have received.
//!
//! Run: `cargo run --example basic`

use std::sync::Arc;

use netwatch_core::{
    AccessPoint, Batch, CycleSettings, Deliver, DeliveryCycle, DeliveryError, MemoryStore,
    NetworkSnapshot, Observation, SampleStore, Shutdown,
};

struct PrintCollector;

impl Deliver for PrintCollector {
    fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let json = serde_json::to_string_pretty(&batch.metrics)?;
        println!("window {}:\n{json}", batch.window);
        Ok(())
    }
}

fn main() -> netwatch_core::Result<()> {
    let mem = Arc::new(MemoryStore::new());
    let store = SampleStore::new(mem.clone(), mem);

    store.record(&Observation::Connectivity {
        at: 1_700_000_000,
        connected: true,
    })?;
    store.record(&Observation::Ping {
        at: 1_700_000_010,
        rtt_micros: 18_250,
    })?;
    store.record(&Observation::Networks(NetworkSnapshot {
        captured_at: 1_700_000_020,
        access_points: vec![AccessPoint {
            ssid: "field-office".into(),
            bssid: "02:00:00:00:00:01".into(),
            channel: 2437,
            rssi: -52,
        }],
    }))?;

    let settings = CycleSettings {
        settle: std::time::Duration::ZERO,
        ..CycleSettings::default()
    };
    let cycle = DeliveryCycle::new(
        store,
        Box::new(PrintCollector),
        1_700_000_000,
        settings,
        Shutdown::new(),
    );
    let report = cycle.run_once(1_700_000_100)?;
    println!(
        "{:?}: {} entries, checkpoint now {:?}",
        report.outcome,
        report.entries,
        cycle.tracker().checkpoint()?
    );
    Ok(())
}
