//! In-memory store used by tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{DataPoint, KeyValueStore, Metric, ScalarStore, StoreError, WriteBatch, WriteOp};
use crate::Timestamp;

/// Volatile implementation of both [`ScalarStore`] and [`KeyValueStore`].
#[derive(Default)]
pub struct MemoryStore {
    series: Mutex<BTreeMap<(Metric, Timestamp, u64), f64>>,
    kv: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    seq: Mutex<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of key-value entries, the checkpoint included.
    pub fn kv_len(&self) -> usize {
        self.kv.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl ScalarStore for MemoryStore {
    fn insert(&self, metric: Metric, timestamp: Timestamp, value: f64) -> Result<(), StoreError> {
        let seq = {
            let mut seq = self.seq.lock().unwrap_or_else(|e| e.into_inner());
            *seq += 1;
            *seq
        };
        self.series
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((metric, timestamp, seq), value);
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
        let series = self.series.lock().unwrap_or_else(|e| e.into_inner());
        Ok(series
            .range((metric, start, 0)..(metric, end, 0))
            .map(|(&(_, timestamp, seq), &value)| DataPoint {
                timestamp,
                seq,
                value,
            })
            .collect())
    }

    fn remove(&self, metric: Metric, points: &[DataPoint]) -> Result<usize, StoreError> {
        let mut series = self.series.lock().unwrap_or_else(|e| e.into_inner());
        Ok(points
            .iter()
            .filter(|p| series.remove(&(metric, p.timestamp, p.seq)).is_some())
            .count())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .kv
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.kv
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.kv.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
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
        // Copy the keys out so `visit` may call back into the store.
        let keys: Vec<Vec<u8>> = self
            .kv
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .range(low.to_vec()..high.to_vec())
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            visit(key)?;
        }
        Ok(())
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut kv = self.kv.lock().unwrap_or_else(|e| e.into_inner());
        for op in batch.into_ops() {
            match op {
                WriteOp::Put(key, value) => {
                    kv.insert(key, value);
                }
                WriteOp::Delete(key) => {
                    kv.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
