//! Delivery windows and the persisted checkpoint.
//!
//! A [`Window`] is the half-open interval `[start, end)` of Unix seconds
//! shipped by one delivery cycle. Consecutive windows share their boundary:
//! the next window starts exactly where the previous one ended.
//!
//! The [`WindowTracker`] owns the checkpoint, the start of the next window
//! still to be delivered. It is stored under [`CHECKPOINT_KEY`] as a decimal
//! string and only ever moves forward.

use std::fmt;
use std::sync::Arc;

use log::{debug, info};

use crate::Timestamp;
use crate::error::StoreError;
use crate::store::{CHECKPOINT_KEY, KeyValueStore, WriteBatch, snapshot_key};

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

/// Half-open time interval `[start, end)` in Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Window {
    /// Build a window; `end` is clamped so it never precedes `start`.
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Length in seconds.
    pub fn duration_secs(&self) -> u64 {
        self.end - self.start
    }

    /// The window that follows this one, ending at `end`.
    pub fn next(&self, end: Timestamp) -> Self {
        Self::new(self.end, end)
    }

    /// Snapshot key bounds `[low, high)` covering this window.
    pub fn key_range(&self) -> (Vec<u8>, Vec<u8>) {
        (snapshot_key(self.start), snapshot_key(self.end))
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

pub fn encode_checkpoint(ts: Timestamp) -> Vec<u8> {
    ts.to_string().into_bytes()
}

pub fn decode_checkpoint(bytes: &[u8]) -> Result<Timestamp, StoreError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<Timestamp>().ok())
        .ok_or_else(|| StoreError::CorruptCheckpoint(String::from_utf8_lossy(bytes).into_owned()))
}

/// Owner of the persisted checkpoint.
///
/// Only the delivery cycle touches the tracker, so there is never more than
/// one writer.
pub struct WindowTracker {
    kv: Arc<dyn KeyValueStore>,
    boot_time: Timestamp,
}

impl WindowTracker {
    /// `boot_time` is the fallback start when no checkpoint was ever stored.
    pub fn new(kv: Arc<dyn KeyValueStore>, boot_time: Timestamp) -> Self {
        Self { kv, boot_time }
    }

    /// The persisted checkpoint, if any.
    pub fn checkpoint(&self) -> Result<Option<Timestamp>, StoreError> {
        self.kv
            .get(CHECKPOINT_KEY)?
            .map(|bytes| decode_checkpoint(&bytes))
            .transpose()
    }

    /// Start of the next undelivered window: the checkpoint, or the boot time
    /// when none exists.
    pub fn current_window_start(&self) -> Result<Timestamp, StoreError> {
        Ok(self.checkpoint()?.unwrap_or(self.boot_time))
    }

    /// Persist the boot time as checkpoint when none exists yet, so a crash
    /// before the first delivery still resumes from the first boot.
    pub fn ensure_initialized(&self) -> Result<Timestamp, StoreError> {
        if let Some(ts) = self.checkpoint()? {
            debug!("resuming from checkpoint {ts}");
            return Ok(ts);
        }
        self.kv
            .put(CHECKPOINT_KEY, &encode_checkpoint(self.boot_time))?;
        self.kv.flush()?;
        info!("seeded checkpoint with boot time {}", self.boot_time);
        Ok(self.boot_time)
    }

    /// Durably move the checkpoint to `new_start`.
    ///
    /// Fails with [`StoreError::NonMonotonic`] if that would move it backward.
    pub fn advance(&self, new_start: Timestamp) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        self.stage_advance(&mut batch, new_start)?;
        self.kv.apply(batch)?;
        self.kv.flush()
    }

    /// Validate `new_start` and append the checkpoint write to `batch`, so the
    /// caller can commit it together with other mutations.
    pub fn stage_advance(
        &self,
        batch: &mut WriteBatch,
        new_start: Timestamp,
    ) -> Result<(), StoreError> {
        let current = self.current_window_start()?;
        if new_start < current {
            return Err(StoreError::NonMonotonic {
                current,
                requested: new_start,
            });
        }
        batch.put(CHECKPOINT_KEY, encode_checkpoint(new_start));
        Ok(())
    }
}
