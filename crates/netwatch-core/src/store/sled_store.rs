//! sled-backed implementation of both stores.
//!
//! One database under the data directory holds two trees:
//! - `snapshots`: network snapshots plus the checkpoint key
//! - `scalars`: `<metric>\0<ts:be64><seq:be64>` -> `f64` big-endian bits

use std::path::Path;
use std::sync::Arc;

use log::debug;
use sled::{Batch, Db, Tree};

use super::{
    DataPoint, KeyValueStore, Metric, SampleStore, ScalarStore, StoreError, WriteBatch, WriteOp,
};
use crate::Timestamp;

const SNAPSHOT_TREE: &str = "snapshots";
const SCALAR_TREE: &str = "scalars";

/// Durable store for scalar series and network snapshots.
pub struct SledStore {
    db: Db,
    snapshots: Tree,
    scalars: Tree,
}

impl SledStore {
    /// Open (or create) the store under `dir`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let db = sled::open(dir)?;
        let snapshots = db.open_tree(SNAPSHOT_TREE)?;
        let scalars = db.open_tree(SCALAR_TREE)?;
        debug!(
            "opened sled store at {} ({} snapshot keys, {} scalar points)",
            dir.display(),
            snapshots.len(),
            scalars.len()
        );
        Ok(Self {
            db,
            snapshots,
            scalars,
        })
    }

    /// Wrap an opened store into a [`SampleStore`] that uses it for both roles.
    pub fn into_sample_store(self: Arc<Self>) -> SampleStore {
        SampleStore::new(self.clone(), self)
    }
}

fn scalar_prefix(metric: Metric) -> Vec<u8> {
    let name = metric.name().as_bytes();
    let mut prefix = Vec::with_capacity(name.len() + 1 + 16);
    prefix.extend_from_slice(name);
    prefix.push(0);
    prefix
}

fn scalar_bound(metric: Metric, ts: Timestamp) -> Vec<u8> {
    let mut key = scalar_prefix(metric);
    key.extend_from_slice(&ts.to_be_bytes());
    key
}

fn scalar_key(metric: Metric, ts: Timestamp, seq: u64) -> Vec<u8> {
    let mut key = scalar_bound(metric, ts);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Timestamp and sequence id encoded after the metric prefix.
fn scalar_identity(metric: Metric, key: &[u8]) -> Result<(Timestamp, u64), StoreError> {
    let offset = metric.name().len() + 1;
    let field = |at: usize| {
        key.get(at..at + 8)
            .and_then(|b| <[u8; 8]>::try_from(b).ok())
            .map(u64::from_be_bytes)
    };
    field(offset)
        .zip(field(offset + 8))
        .ok_or_else(|| StoreError::MalformedKey(key.to_vec()))
}

fn scalar_value(key: &[u8], value: &[u8]) -> Result<f64, StoreError> {
    <[u8; 8]>::try_from(value)
        .map(|b| f64::from_bits(u64::from_be_bytes(b)))
        .map_err(|_| StoreError::MalformedKey(key.to_vec()))
}

impl ScalarStore for SledStore {
    fn insert(&self, metric: Metric, timestamp: Timestamp, value: f64) -> Result<(), StoreError> {
        let seq = self.db.generate_id()?;
        self.scalars.insert(
            scalar_key(metric, timestamp, seq),
            value.to_bits().to_be_bytes().to_vec(),
        )?;
        Ok(())
    }

    fn select(
        &self,
        metric: Metric,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<DataPoint>, StoreError> {
        if start >= end {
            return Ok(Vec::new());
        }
        let low = scalar_bound(metric, start);
        let high = scalar_bound(metric, end);
        let mut points = Vec::new();
        for entry in self.scalars.range(low.as_slice()..high.as_slice()) {
            let (key, value) = entry?;
            let (timestamp, seq) = scalar_identity(metric, &key)?;
            points.push(DataPoint {
                timestamp,
                seq,
                value: scalar_value(&key, &value)?,
            });
        }
        Ok(points)
    }

    fn remove(&self, metric: Metric, points: &[DataPoint]) -> Result<usize, StoreError> {
        let mut removed = 0;
        for point in points {
            if self
                .scalars
                .remove(scalar_key(metric, point.timestamp, point.seq))?
                .is_some()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.scalars.flush()?;
        Ok(())
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.snapshots.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.snapshots.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.snapshots.remove(key)?;
        Ok(())
    }

    fn scan_range(
        &self,
        low: &[u8],
        high: &[u8],
        visit: &mut dyn FnMut(&[u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        if low >= high {
            return Ok(());
        }
        for entry in self.snapshots.range(low..high) {
            let (key, _) = entry?;
            visit(&key)?;
        }
        Ok(())
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut sled_batch = Batch::default();
        for op in batch.into_ops() {
            match op {
                WriteOp::Put(key, value) => sled_batch.insert(key, value),
                WriteOp::Delete(key) => sled_batch.remove(key),
            }
        }
        self.snapshots.apply_batch(sled_batch)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.snapshots.flush()?;
        Ok(())
    }
}
