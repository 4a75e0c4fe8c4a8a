//! # netwatch-core
//!
//! **A field network-health agent that never loses a sample.**
//!
//! `netwatch-core` samples Wi-Fi visibility, internet reachability and ping
//! latency on a fixed host, buffers every sample durably on local disk, and
//! ships them to a remote collector in consecutive time windows. Data is only
//! deleted once the collector has confirmed receipt.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use netwatch_core::{
//!     CycleSettings, DeliveryClient, DeliveryConfig, DeliveryCycle, Shutdown, SledStore,
//!     unix_now,
//! };
//!
//! let store = Arc::new(SledStore::open("/var/lib/netwatch/store".as_ref()).unwrap());
//! let samples = store.into_sample_store();
//! let client = DeliveryClient::new(DeliveryConfig::new(
//!     "https://collector.example/ingest",
//!     "api-key",
//!     "loop-1",
//! ))
//! .unwrap();
//!
//! let cycle = DeliveryCycle::new(
//!     samples,
//!     Box::new(client),
//!     unix_now(),
//!     CycleSettings::default(),
//!     Shutdown::new(),
//! );
//! let report = cycle.run_once(unix_now()).unwrap();
//! println!("delivered {} entries for {}", report.entries, report.window);
//! ```
//!
//! ## Architecture
//!
//! Sources → SampleStore → (per cycle) Window → Batch → Delivery → Retirement
//!
//! - **Sources** ([`ObservationSource`]) run on their own threads and write
//!   through [`SampleStore`]: scalars into a time-series store, network
//!   snapshots into an ordered key-value store.
//! - The **window tracker** owns the checkpoint, the start of the next
//!   undelivered window `[start, end)`.
//! - The **delivery cycle** assembles a window, posts it with retry, then
//!   deletes its snapshots and advances the checkpoint in one atomic batch.

pub mod agent;
pub mod assembler;
pub mod config;
pub mod delivery;
pub mod error;
pub mod observation;
pub mod pipeline;
pub mod platform;
pub mod retirement;
pub mod shutdown;
pub mod source;
pub mod sources;
pub mod store;
pub mod window;

pub use agent::{Agent, AgentSummary};
pub use assembler::{Batch, BatchAssembler};
pub use config::{AgentConfig, DeliveryConfig, SourcePeriods};
pub use delivery::{Deliver, DeliveryClient, RetryPolicy, deliver_with_retry, spill_batch};
pub use error::{ConfigError, DeliveryError, Error, Result, SourceError, StoreError};
pub use observation::{
    AccessPoint, Connectivity, MetricSet, Network, NetworkSnapshot, Observation, Ping,
};
pub use pipeline::{CycleOutcome, CycleReport, CycleSettings, DeliveryCycle};
pub use platform::{is_root, platform_info, wireless_interfaces};
pub use retirement::{RetirementReport, Retirer};
pub use shutdown::Shutdown;
pub use source::{ObservationSource, Requirement, SourceCategory, SourceHealth, SourceInfo};
pub use store::{
    KeyValueStore, MemoryStore, Metric, SampleStore, ScalarStore, SledStore, WriteBatch,
};
pub use window::{Window, WindowTracker};

/// Unix seconds.
pub type Timestamp = u64;

/// Current wall-clock time in Unix seconds.
pub fn unix_now() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
