//! Durable sample storage.
//!
//! Two abstract stores back the pipeline:
//! - [`ScalarStore`]: append-style time series keyed by metric name, queried
//!   by half-open time range.
//! - [`KeyValueStore`]: ordered byte keys with point get/put/delete, a
//!   lexical range scan, and atomic write batches.
//!
//! [`SampleStore`] routes observations into the right store. Snapshot keys
//! are `b"n"` followed by the capture time as 8 big-endian bytes, so lexical
//! order and chronological order agree for every pair of timestamps.

pub mod memory;
pub mod sled_store;

use std::sync::Arc;

use crate::Timestamp;
use crate::error::StoreError;
use crate::observation::{AccessPoint, NetworkSnapshot, Observation};

pub use self::memory::MemoryStore;
pub use self::sled_store::SledStore;

/// Key holding the persisted window checkpoint.
pub const CHECKPOINT_KEY: &[u8] = b"startKey";

const SNAPSHOT_PREFIX: u8 = b'n';

// ---------------------------------------------------------------------------
// Scalar series
// ---------------------------------------------------------------------------

/// Scalar metrics kept in the time-series store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    /// Average round-trip time in microseconds.
    Ping,
    /// 1.0 when the reachability probe succeeded, 0.0 otherwise.
    Connectivity,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Ping, Metric::Connectivity];

    pub fn name(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Connectivity => "connectivity",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One stored point of a scalar series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint {
    pub timestamp: Timestamp,
    /// Insertion sequence; tells apart points stored in the same second.
    pub seq: u64,
    pub value: f64,
}

/// Append-style time-series store.
///
/// Implementations must accept concurrent inserts from several threads.
pub trait ScalarStore: Send + Sync {
    fn insert(&self, metric: Metric, timestamp: Timestamp, value: f64) -> Result<(), StoreError>;

    /// All points of `metric` with `start <= timestamp < end`, oldest first.
    fn select(
        &self,
        metric: Metric,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<DataPoint>, StoreError>;

    /// Remove exactly the given points of `metric`, as returned by
    /// [`select`](Self::select). Points stored since are left alone. Returns
    /// the number removed.
    fn remove(&self, metric: Metric, points: &[DataPoint]) -> Result<usize, StoreError>;

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Key-value store
// ---------------------------------------------------------------------------

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Mutations applied all-or-nothing by [`KeyValueStore::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Delete(key.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Ordered byte-keyed store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Visit every key with `low <= key < high` in lexical byte order. The
    /// scan stops at the first error returned by `visit`.
    fn scan_range(
        &self,
        low: &[u8],
        high: &[u8],
        visit: &mut dyn FnMut(&[u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;

    /// Apply every operation of `batch` atomically.
    fn apply(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Block until all previous writes are on disk.
    fn flush(&self) -> Result<(), StoreError>;

    /// Collect the keys of [`KeyValueStore::scan_range`].
    fn keys_in_range(&self, low: &[u8], high: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut keys = Vec::new();
        self.scan_range(low, high, &mut |key: &[u8]| {
            keys.push(key.to_vec());
            Ok(())
        })?;
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// Snapshot keys and values
// ---------------------------------------------------------------------------

/// Key of the network snapshot captured at `ts`.
pub fn snapshot_key(ts: Timestamp) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(SNAPSHOT_PREFIX);
    key.extend_from_slice(&ts.to_be_bytes());
    key
}

/// Recover the capture time from a snapshot key.
pub fn parse_snapshot_key(key: &[u8]) -> Result<Timestamp, StoreError> {
    match key {
        [SNAPSHOT_PREFIX, rest @ ..] if rest.len() == 8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(rest);
            Ok(u64::from_be_bytes(buf))
        }
        _ => Err(StoreError::MalformedKey(key.to_vec())),
    }
}

pub fn encode_snapshot(access_points: &[AccessPoint]) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(access_points)?)
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<Vec<AccessPoint>, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

// ---------------------------------------------------------------------------
// Sample store
// ---------------------------------------------------------------------------

/// Shared handle that writes observations into the durable stores.
///
/// Cloning is cheap; every source thread holds its own clone.
#[derive(Clone)]
pub struct SampleStore {
    scalars: Arc<dyn ScalarStore>,
    snapshots: Arc<dyn KeyValueStore>,
}

impl SampleStore {
    pub fn new(scalars: Arc<dyn ScalarStore>, snapshots: Arc<dyn KeyValueStore>) -> Self {
        Self { scalars, snapshots }
    }

    pub fn scalars(&self) -> &dyn ScalarStore {
        self.scalars.as_ref()
    }

    pub fn snapshots(&self) -> &dyn KeyValueStore {
        self.snapshots.as_ref()
    }

    /// Shared handle to the key-value store, for the checkpoint owner.
    pub fn snapshots_handle(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.snapshots)
    }

    /// Persist one observation.
    pub fn record(&self, observation: &Observation) -> Result<(), StoreError> {
        match observation {
            Observation::Connectivity { at, connected } => {
                let value = if *connected { 1.0 } else { 0.0 };
                self.scalars.insert(Metric::Connectivity, *at, value)
            }
            Observation::Ping { at, rtt_micros } => {
                self.scalars.insert(Metric::Ping, *at, *rtt_micros as f64)
            }
            Observation::Networks(snapshot) => self.record_snapshot(snapshot),
        }
    }

    fn record_snapshot(&self, snapshot: &NetworkSnapshot) -> Result<(), StoreError> {
        let value = encode_snapshot(&snapshot.access_points)?;
        self.snapshots
            .put(&snapshot_key(snapshot.captured_at), &value)
    }

    /// Block until both stores have persisted every write.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.scalars.flush()?;
        self.snapshots.flush()
    }
}
