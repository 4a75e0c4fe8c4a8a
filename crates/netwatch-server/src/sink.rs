//! Analytics sinks: where accepted batches end up.
//!
//! Each payload collection maps to one table. Rows carry the loop identifier
//! next to the sample fields, so batches from many sites can share a table.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use netwatch_core::{Connectivity, MetricSet, Network, Ping};

/// Failure to persist rows.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("writing table {table}: {source}")]
    Io {
        table: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding row: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsidRow {
    pub ssid: String,
    pub bssid: String,
    pub channel: u32,
    #[serde(rename = "loop")]
    pub loop_id: String,
    pub rssi: i32,
    pub timestamp: DateTime<Utc>,
}

impl SsidRow {
    pub fn new(loop_id: &str, network: &Network) -> Self {
        Self {
            ssid: network.ssid.clone(),
            bssid: network.bssid.clone(),
            channel: network.channel,
            loop_id: loop_id.to_string(),
            rssi: network.rssi,
            timestamp: network.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityRow {
    #[serde(rename = "loop")]
    pub loop_id: String,
    pub timestamp: DateTime<Utc>,
    pub connected: bool,
}

impl ConnectivityRow {
    pub fn new(loop_id: &str, c: &Connectivity) -> Self {
        Self {
            loop_id: loop_id.to_string(),
            timestamp: c.timestamp,
            connected: c.connected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRow {
    #[serde(rename = "loop")]
    pub loop_id: String,
    pub timestamp: DateTime<Utc>,
    pub rtt: i64,
}

impl PingRow {
    pub fn new(loop_id: &str, p: &Ping) -> Self {
        Self {
            loop_id: loop_id.to_string(),
            timestamp: p.timestamp,
            rtt: p.rtt,
        }
    }
}

// ---------------------------------------------------------------------------
// Sink trait
// ---------------------------------------------------------------------------

/// Bulk row insertion, one method per table. Each returns the rows written.
pub trait AnalyticsSink: Send + Sync {
    fn insert_networks(&self, loop_id: &str, rows: &[Network]) -> Result<usize, SinkError>;

    fn insert_connectivity(&self, loop_id: &str, rows: &[Connectivity])
    -> Result<usize, SinkError>;

    fn insert_pings(&self, loop_id: &str, rows: &[Ping]) -> Result<usize, SinkError>;

    /// Insert a whole payload. The first failing table aborts the rest; rows
    /// already written stay written.
    ///
    /// Not transactional: a caller that resends the payload after an error
    /// writes the earlier tables again, so a failed batch followed by a
    /// successful retry leaves duplicate rows.
    fn insert(&self, loop_id: &str, metrics: &MetricSet) -> Result<usize, SinkError> {
        let mut written = 0;
        if !metrics.connectivity.is_empty() {
            written += self.insert_connectivity(loop_id, &metrics.connectivity)?;
        }
        if !metrics.pings.is_empty() {
            written += self.insert_pings(loop_id, &metrics.pings)?;
        }
        if !metrics.networks.is_empty() {
            written += self.insert_networks(loop_id, &metrics.networks)?;
        }
        Ok(written)
    }
}

/// Table names used by file-backed sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub ssids: String,
    pub connectivity: String,
    pub pings: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            ssids: "ssids".to_string(),
            connectivity: "connectivity".to_string(),
            pings: "pings".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// NDJSON sink
// ---------------------------------------------------------------------------

/// Appends one JSON object per row to `<dir>/<table>.ndjson`.
pub struct NdjsonSink {
    dir: PathBuf,
    tables: TableNames,
    write_lock: Mutex<()>,
}

impl NdjsonSink {
    pub fn new(dir: &Path, tables: TableNames) -> Result<Self, SinkError> {
        fs::create_dir_all(dir).map_err(|source| SinkError::Io {
            table: dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            tables,
            write_lock: Mutex::new(()),
        })
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.ndjson"))
    }

    fn append<T: Serialize>(&self, table: &str, rows: &[T]) -> Result<usize, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }
        // Encode everything first so a bad row never leaves a partial append.
        let mut buf = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut buf, row)?;
            buf.push(b'\n');
        }

        let io_err = |source: std::io::Error| SinkError::Io {
            table: table.to_string(),
            source,
        };
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.table_path(table))
            .map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&buf).map_err(io_err)?;
        writer.flush().map_err(io_err)?;
        Ok(rows.len())
    }
}

impl AnalyticsSink for NdjsonSink {
    fn insert_networks(&self, loop_id: &str, rows: &[Network]) -> Result<usize, SinkError> {
        let rows: Vec<_> = rows.iter().map(|n| SsidRow::new(loop_id, n)).collect();
        self.append(&self.tables.ssids, &rows)
    }

    fn insert_connectivity(
        &self,
        loop_id: &str,
        rows: &[Connectivity],
    ) -> Result<usize, SinkError> {
        let rows: Vec<_> = rows
            .iter()
            .map(|c| ConnectivityRow::new(loop_id, c))
            .collect();
        self.append(&self.tables.connectivity, &rows)
    }

    fn insert_pings(&self, loop_id: &str, rows: &[Ping]) -> Result<usize, SinkError> {
        let rows: Vec<_> = rows.iter().map(|p| PingRow::new(loop_id, p)).collect();
        self.append(&self.tables.pings, &rows)
    }
}

// ---------------------------------------------------------------------------
// Memory sink
// ---------------------------------------------------------------------------

/// Rows held by a [`MemorySink`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryTables {
    pub ssids: Vec<SsidRow>,
    pub connectivity: Vec<ConnectivityRow>,
    pub pings: Vec<PingRow>,
}

/// Collects rows in memory. Can be switched to fail every insert.
#[derive(Default)]
pub struct MemorySink {
    tables: Mutex<MemoryTables>,
    failing: Mutex<bool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(|e| e.into_inner()) = failing;
    }

    pub fn tables(&self) -> MemoryTables {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn check(&self) -> Result<(), SinkError> {
        if *self.failing.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(SinkError::Unavailable("memory sink set to fail".into()));
        }
        Ok(())
    }
}

impl AnalyticsSink for MemorySink {
    fn insert_networks(&self, loop_id: &str, rows: &[Network]) -> Result<usize, SinkError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables
            .ssids
            .extend(rows.iter().map(|n| SsidRow::new(loop_id, n)));
        Ok(rows.len())
    }

    fn insert_connectivity(
        &self,
        loop_id: &str,
        rows: &[Connectivity],
    ) -> Result<usize, SinkError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables
            .connectivity
            .extend(rows.iter().map(|c| ConnectivityRow::new(loop_id, c)));
        Ok(rows.len())
    }

    fn insert_pings(&self, loop_id: &str, rows: &[Ping]) -> Result<usize, SinkError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables
            .pings
            .extend(rows.iter().map(|p| PingRow::new(loop_id, p)));
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use netwatch_core::observation::to_datetime;

    use super::*;

    fn metrics() -> MetricSet {
        MetricSet {
            networks: vec![Network {
                ssid: "home".into(),
                bssid: "aa:bb:cc:dd:ee:ff".into(),
                channel: 2412,
                rssi: -40,
                timestamp: to_datetime(110),
            }],
            connectivity: vec![Connectivity {
                timestamp: to_datetime(100),
                connected: true,
            }],
            pings: vec![
                Ping {
                    timestamp: to_datetime(105),
                    rtt: 42_000,
                },
                Ping {
                    timestamp: to_datetime(120),
                    rtt: 40_000,
                },
            ],
        }
    }

    #[test]
    fn test_ndjson_sink_appends_rows_per_table() {
        let dir = tempfile::tempdir().unwrap();
        let sink = NdjsonSink::new(dir.path(), TableNames::default()).unwrap();
        assert_eq!(sink.insert("loop-1", &metrics()).unwrap(), 4);
        assert_eq!(sink.insert("loop-2", &metrics()).unwrap(), 4);

        let pings = fs::read_to_string(sink.table_path("pings")).unwrap();
        let rows: Vec<PingRow> = pings
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].loop_id, "loop-1");
        assert_eq!(rows[3].loop_id, "loop-2");
        assert_eq!(rows[0].rtt, 42_000);

        let ssids = fs::read_to_string(sink.table_path("ssids")).unwrap();
        let first: serde_json::Value = serde_json::from_str(ssids.lines().next().unwrap()).unwrap();
        assert_eq!(first["loop"], "loop-1");
        assert_eq!(first["ssid"], "home");
        assert_eq!(first["channel"], 2412);
    }

    #[test]
    fn test_empty_collections_create_no_table() {
        let dir = tempfile::tempdir().unwrap();
        let sink = NdjsonSink::new(dir.path(), TableNames::default()).unwrap();
        assert_eq!(sink.insert("loop-1", &MetricSet::default()).unwrap(), 0);
        assert!(!sink.table_path("pings").exists());
    }

    #[test]
    fn test_custom_table_names() {
        let dir = tempfile::tempdir().unwrap();
        let tables = TableNames {
            pings: "field_pings".into(),
            ..TableNames::default()
        };
        let sink = NdjsonSink::new(dir.path(), tables).unwrap();
        sink.insert("l", &metrics()).unwrap();
        assert!(dir.path().join("field_pings.ndjson").exists());
    }

    #[test]
    fn test_memory_sink_collects_and_fails_on_demand() {
        let sink = MemorySink::new();
        sink.insert("loop-1", &metrics()).unwrap();
        let tables = sink.tables();
        assert_eq!(tables.ssids.len(), 1);
        assert_eq!(tables.connectivity[0].loop_id, "loop-1");
        assert_eq!(tables.pings.len(), 2);

        sink.set_failing(true);
        assert!(matches!(
            sink.insert("loop-1", &metrics()),
            Err(SinkError::Unavailable(_))
        ));
    }
    /// Fails the ssid table until told otherwise.
    struct FlakyNetworks {
        inner: MemorySink,
        fail_networks: Mutex<bool>,
    }

    impl AnalyticsSink for FlakyNetworks {
        fn insert_networks(&self, loop_id: &str, rows: &[Network]) -> Result<usize, SinkError> {
            if *self.fail_networks.lock().unwrap() {
                return Err(SinkError::Unavailable("ssids down".into()));
            }
            self.inner.insert_networks(loop_id, rows)
        }

        fn insert_connectivity(
            &self,
            loop_id: &str,
            rows: &[Connectivity],
        ) -> Result<usize, SinkError> {
            self.inner.insert_connectivity(loop_id, rows)
        }

        fn insert_pings(&self, loop_id: &str, rows: &[Ping]) -> Result<usize, SinkError> {
            self.inner.insert_pings(loop_id, rows)
        }
    }

    #[test]
    fn test_partial_failure_then_resend_duplicates_earlier_tables() {
        let sink = FlakyNetworks {
            inner: MemorySink::new(),
            fail_networks: Mutex::new(true),
        };
        assert!(sink.insert("loop-1", &metrics()).is_err());
        let tables = sink.inner.tables();
        assert_eq!(tables.connectivity.len(), 1);
        assert_eq!(tables.pings.len(), 2);
        assert!(tables.ssids.is_empty());

        *sink.fail_networks.lock().unwrap() = false;
        assert_eq!(sink.insert("loop-1", &metrics()).unwrap(), 4);
        let tables = sink.inner.tables();
        assert_eq!(tables.connectivity.len(), 2);
        assert_eq!(tables.pings.len(), 4);
        assert_eq!(tables.ssids.len(), 1);
    }
}
