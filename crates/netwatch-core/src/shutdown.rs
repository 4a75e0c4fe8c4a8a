//! Process-wide shutdown flag shared by every agent thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(50);

/// Cloneable run flag. Once triggered it stays triggered.
#[derive(Debug, Clone)]
pub struct Shutdown {
    running: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn trigger(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Sleep for `duration` unless shutdown is requested first.
    ///
    /// Returns `true` if the full duration elapsed while still running.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while self.is_running() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            std::thread::sleep(remaining.min(POLL));
        }
        false
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
