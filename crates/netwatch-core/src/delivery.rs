//! Batch delivery to the remote collector.
//!
//! One attempt is a single blocking `POST <endpoint>?key=..&loop=..` with the
//! batch's [`MetricSet`](crate::observation::MetricSet) as JSON body. Only a
//! `200` counts as accepted. [`deliver_with_retry`] drives attempts with a
//! fixed sleep between them; by default it never gives up.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;

use crate::assembler::Batch;
use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::shutdown::Shutdown;

/// Anything that can ship a batch somewhere.
pub trait Deliver: Send + Sync {
    fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Blocking HTTP delivery client.
pub struct DeliveryClient {
    http: Client,
    config: DeliveryConfig,
}

impl DeliveryClient {
    pub fn new(config: DeliveryConfig) -> Result<Self, DeliveryError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { http, config })
    }
}

impl Deliver for DeliveryClient {
    fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(&batch.metrics)?;
        debug!(
            "posting window {} ({} entries, {} bytes)",
            batch.window,
            batch.metrics.len(),
            body.len()
        );
        let response = self
            .http
            .post(&self.config.endpoint_url)
            .query(&[
                ("key", self.config.api_key.as_str()),
                ("loop", self.config.loop_id.as_str()),
            ])
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(DeliveryError::Status(status.as_u16()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Fixed-delay retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Sleep between two failed attempts.
    pub delay: Duration,
    /// `None` retries until success or shutdown.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(300),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn is_bounded(&self) -> bool {
        self.max_attempts.is_some()
    }
}

/// Deliver `batch`, retrying per `policy`. Returns the number of attempts
/// used on success.
///
/// Fails with [`DeliveryError::Interrupted`] when shutdown is requested
/// during a retry sleep, and with [`DeliveryError::Exhausted`] when a bounded
/// policy runs out of attempts.
pub fn deliver_with_retry(
    client: &dyn Deliver,
    batch: &Batch,
    policy: &RetryPolicy,
    shutdown: &Shutdown,
) -> Result<u32, DeliveryError> {
    let mut attempts: u32 = 0;
    loop {
        attempts = attempts.saturating_add(1);
        match client.deliver(batch) {
            Ok(()) => {
                if attempts > 1 {
                    info!("window {} delivered after {attempts} attempts", batch.window);
                }
                return Ok(attempts);
            }
            Err(e) => {
                warn!(
                    "delivery of window {} failed (attempt {attempts}): {e}",
                    batch.window
                );
            }
        }

        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(DeliveryError::Exhausted { attempts });
        }
        if !shutdown.sleep(policy.delay) {
            return Err(DeliveryError::Interrupted);
        }
    }
}

// ---------------------------------------------------------------------------
// Spill
// ---------------------------------------------------------------------------

/// File name used for a spilled batch.
pub fn spill_file_name(batch: &Batch) -> String {
    format!("batch-{}-{}.json", batch.window.start, batch.window.end)
}

/// Write an undeliverable batch into `dir` and return its path.
///
/// The payload goes to a uniquely named temporary file first and is renamed
/// into place once synced, so a crash never leaves a truncated spill file.
pub fn spill_batch(dir: &Path, batch: &Batch) -> Result<PathBuf, DeliveryError> {
    fs::create_dir_all(dir)?;
    let body = serde_json::to_vec_pretty(&batch.metrics)?;

    let tmp = dir.join(format!(".spill-{}.tmp", uuid::Uuid::new_v4()));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(&body)?;
    file.sync_all()?;
    drop(file);

    let path = dir.join(spill_file_name(batch));
    fs::rename(&tmp, &path)?;
    info!("window {} spilled to {}", batch.window, path.display());
    Ok(path)
}
