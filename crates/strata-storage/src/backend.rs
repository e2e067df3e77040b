//! Strata Backend - Point Store Abstraction
//!
//! Defines the point store trait shared by the ingestion, query and
//! retention layers, with an in-memory implementation and a durable
//! implementation backed by the write-ahead log.
//!
//! Key Features:
//! - Atomic write batches: validated, logged and applied together
//! - Time-range scans per series and tier
//! - Crash recovery by log replay, with checkpoints to bound replay time
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::state::StoreState;
use crate::transaction::{CommitSummary, WriteBatch};
use crate::wal::{LogRecordType, WriteAheadLog};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use strata_common::{
    Bucket, DataPoint, MetricKind, RawPoint, Resolution, Result, SeriesKey, StorageConfig,
    StrataError,
};

// =============================================================================
// Point Store Trait
// =============================================================================

/// Pluggable point store interface.
pub trait PointStore: Send + Sync {
    /// Validate and apply a batch atomically. On error nothing is applied.
    fn commit(&self, batch: WriteBatch) -> Result<CommitSummary>;

    /// Raw points of a series with `start <= timestamp < end`, ascending.
    fn scan_raw(&self, series: &SeriesKey, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<DataPoint>>;

    /// Buckets of a series whose start lies in `[start, end)`, ascending.
    fn scan_buckets(
        &self,
        resolution: Resolution,
        series: &SeriesKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bucket>>;

    /// Rows of one series in each of `tiers` over `[start, end)`, read from
    /// a single view of the store. A commit never lands between two tiers.
    fn scan_tiers(
        &self,
        series: &SeriesKey,
        tiers: &[Resolution],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TierScan>;

    /// Every series holding data in any tier, sorted by key.
    fn series(&self) -> Result<Vec<SeriesInfo>>;

    /// Series holding data in one tier, sorted.
    fn series_in(&self, resolution: Resolution) -> Result<Vec<SeriesKey>>;

    fn stats(&self) -> Result<StoreStats>;

    /// Sync all pending writes to durable storage.
    fn sync(&self) -> Result<()>;

    /// Compact durable state. No-op for stores without a log.
    fn checkpoint(&self) -> Result<()> {
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Convenience Writes
    // -------------------------------------------------------------------------

    fn insert_raw(&self, points: Vec<RawPoint>) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }
        Ok(self.commit(WriteBatch::new().insert_raw(points))?.raw_inserted)
    }

    fn insert_buckets(&self, resolution: Resolution, buckets: Vec<Bucket>) -> Result<usize> {
        if buckets.is_empty() {
            return Ok(0);
        }
        Ok(self.commit(WriteBatch::new().insert_buckets(resolution, buckets))?.buckets_inserted)
    }

    /// Delete rows with `after <= timestamp < before`, returning the count removed.
    fn delete_range(
        &self,
        resolution: Resolution,
        series: Option<&SeriesKey>,
        after: Option<DateTime<Utc>>,
        before: DateTime<Utc>,
    ) -> Result<usize> {
        let batch = WriteBatch::new().delete_range(resolution, series.cloned(), after, before);
        Ok(self.commit(batch)?.rows_deleted)
    }
}

// =============================================================================
// Series Info and Statistics
// =============================================================================

/// A stored series with its metric kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub series: SeriesKey,
    pub kind: MetricKind,
}

/// Rows of one series read across tiers at the same instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierScan {
    pub raw: Vec<DataPoint>,
    pub minute: Vec<Bucket>,
    pub hour: Vec<Bucket>,
}

impl TierScan {
    pub fn len(&self) -> usize {
        self.raw.len() + self.minute.len() + self.hour.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Statistics about store contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Raw points plus buckets across all tiers.
    pub total_points: u64,
    pub total_series: u64,
    pub approx_size_bytes: u64,
    pub raw_points: u64,
    pub minute_buckets: u64,
    pub hour_buckets: u64,
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-memory point store for testing and embedding.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PointStore for MemoryStore {
    fn commit(&self, batch: WriteBatch) -> Result<CommitSummary> {
        let mut state = self.state.write();
        state.validate(&batch)?;
        Ok(state.apply(batch))
    }

    fn scan_raw(&self, series: &SeriesKey, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<DataPoint>> {
        Ok(self.state.read().scan_raw(series, start, end))
    }

    fn scan_buckets(
        &self,
        resolution: Resolution,
        series: &SeriesKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bucket>> {
        Ok(self.state.read().scan_buckets(resolution, series, start, end))
    }

    fn scan_tiers(
        &self,
        series: &SeriesKey,
        tiers: &[Resolution],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TierScan> {
        Ok(self.state.read().scan_tiers(series, tiers, start, end))
    }

    fn series(&self) -> Result<Vec<SeriesInfo>> {
        Ok(self.state.read().series())
    }

    fn series_in(&self, resolution: Resolution) -> Result<Vec<SeriesKey>> {
        Ok(self.state.read().series_in(resolution))
    }

    fn stats(&self) -> Result<StoreStats> {
        Ok(self.state.read().stats())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Durable Store
// =============================================================================

/// Point store persisted through a write-ahead log.
///
/// Each committed batch is one log record. On open the log is replayed in
/// order; a checkpoint record resets the state to the snapshot it holds.
pub struct DurableStore {
    state: RwLock<StoreState>,
    wal: WriteAheadLog,
}

impl DurableStore {
    pub fn open(dir: impl AsRef<Path>, sync_writes: bool) -> Result<Self> {
        let dir = dir.as_ref();
        let (wal, records) = WriteAheadLog::open(dir, sync_writes)?;

        let mut state = StoreState::default();
        let replayed = records.len();
        for record in records {
            let batch: WriteBatch = serde_json::from_slice(&record.data).map_err(|e| {
                StrataError::Corruption(format!("undecodable batch at LSN {}: {}", record.lsn.0, e))
            })?;
            if record.record_type == LogRecordType::Checkpoint {
                state = StoreState::default();
            }
            state.apply(batch);
        }

        let stats = state.stats();
        tracing::info!(
            "Opened point store at {:?}: replayed {} records, {} series, {} points",
            dir,
            replayed,
            stats.total_series,
            stats.total_points
        );

        Ok(Self {
            state: RwLock::new(state),
            wal,
        })
    }

    fn encode(batch: &WriteBatch) -> Result<Bytes> {
        serde_json::to_vec(batch)
            .map(Bytes::from)
            .map_err(|e| StrataError::Serialization(e.to_string()))
    }
}

impl PointStore for DurableStore {
    fn commit(&self, batch: WriteBatch) -> Result<CommitSummary> {
        let mut state = self.state.write();
        state.validate(&batch)?;
        self.wal.append_commit(Self::encode(&batch)?)?;
        Ok(state.apply(batch))
    }

    fn scan_raw(&self, series: &SeriesKey, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<DataPoint>> {
        Ok(self.state.read().scan_raw(series, start, end))
    }

    fn scan_buckets(
        &self,
        resolution: Resolution,
        series: &SeriesKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bucket>> {
        Ok(self.state.read().scan_buckets(resolution, series, start, end))
    }

    fn scan_tiers(
        &self,
        series: &SeriesKey,
        tiers: &[Resolution],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TierScan> {
        Ok(self.state.read().scan_tiers(series, tiers, start, end))
    }

    fn series(&self) -> Result<Vec<SeriesInfo>> {
        Ok(self.state.read().series())
    }

    fn series_in(&self, resolution: Resolution) -> Result<Vec<SeriesKey>> {
        Ok(self.state.read().series_in(resolution))
    }

    fn stats(&self) -> Result<StoreStats> {
        let mut stats = self.state.read().stats();
        stats.approx_size_bytes = self.wal.size_bytes();
        Ok(stats)
    }

    fn sync(&self) -> Result<()> {
        self.wal.sync()
    }

    fn checkpoint(&self) -> Result<()> {
        // Holding the read lock keeps commits out until the log is swapped.
        let state = self.state.read();
        self.wal.checkpoint(Self::encode(&state.snapshot())?)?;
        Ok(())
    }
}

/// Open the store described by `config`.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn PointStore>> {
    match &config.data_directory {
        Some(dir) => Ok(Arc::new(DurableStore::open(dir, config.sync_writes)?)),
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WAL_FILE_NAME;
    use chrono::Duration;
    use std::io::Write;
    use strata_common::{BucketStats, Tags};

    fn key(host: &str) -> SeriesKey {
        SeriesKey::new("cpu", Tags::new().with("host", host)).expect("key should build")
    }

    fn base() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_040, 0).expect("valid timestamp")
    }

    fn point(series: &SeriesKey, offset_secs: i64, value: f64) -> RawPoint {
        RawPoint::new(series.clone(), MetricKind::Gauge, base() + Duration::seconds(offset_secs), value)
    }

    #[test]
    fn test_memory_store_write_scan() {
        let store = MemoryStore::new();
        let a = key("a");
        let inserted = store
            .insert_raw(vec![point(&a, 0, 1.0), point(&a, 5, 2.0)])
            .expect("insert should succeed");
        assert_eq!(inserted, 2);

        let points = store
            .scan_raw(&a, base(), base() + Duration::minutes(1))
            .expect("scan should succeed");
        assert_eq!(points.len(), 2);
        assert_eq!(store.stats().expect("stats should succeed").raw_points, 2);
    }

    #[test]
    fn test_scan_tiers_reads_requested_tiers() {
        let store = MemoryStore::new();
        let a = key("a");
        store.insert_raw(vec![point(&a, 90, 3.0)]).expect("insert should succeed");
        store
            .insert_buckets(Resolution::Minute, vec![Bucket::new(a.clone(), base(), BucketStats::from_value(1.0))])
            .expect("insert should succeed");

        let end = base() + Duration::hours(1);
        let all = store
            .scan_tiers(&a, &[Resolution::Hour, Resolution::Minute, Resolution::Raw], base(), end)
            .expect("scan should succeed");
        assert_eq!(all.len(), 2);
        assert_eq!(all.raw[0].value, 3.0);
        assert_eq!(all.minute[0].start, base());
        assert!(all.hour.is_empty());

        let raw_only = store
            .scan_tiers(&a, &[Resolution::Raw], base(), end)
            .expect("scan should succeed");
        assert_eq!(raw_only.len(), 1);
        assert!(raw_only.minute.is_empty());
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let store = MemoryStore::new();
        let a = key("a");
        store
            .insert_buckets(Resolution::Minute, vec![Bucket::new(a.clone(), base(), BucketStats::from_value(1.0))])
            .expect("insert should succeed");

        let batch = WriteBatch::new()
            .insert_raw(vec![point(&a, 120, 9.0)])
            .insert_buckets(Resolution::Minute, vec![Bucket::new(a.clone(), base(), BucketStats::from_value(2.0))]);
        let err = store.commit(batch).expect_err("duplicate bucket should fail the batch");
        assert!(matches!(err, StrataError::BucketExists(_)));

        let stats = store.stats().expect("stats should succeed");
        assert_eq!(stats.raw_points, 0);
        assert_eq!(stats.minute_buckets, 1);
    }

    #[test]
    fn test_durable_store_recovery() {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        let a = key("a");

        {
            let store = DurableStore::open(temp_dir.path(), true).expect("failed to open store");
            store
                .insert_raw(vec![point(&a, 0, 1.0), point(&a, 30, 2.0), point(&a, 90, 3.0)])
                .expect("insert should succeed");
            store
                .commit(
                    WriteBatch::new()
                        .insert_buckets(Resolution::Minute, vec![Bucket::new(
                            a.clone(),
                            base(),
                            BucketStats::from_values([1.0, 2.0]).expect("stats should exist"),
                        )])
                        .delete_exact(Resolution::Raw, a.clone(), base(), base() + Duration::minutes(1), 2),
                )
                .expect("consolidation batch should commit");
        }

        let store = DurableStore::open(temp_dir.path(), true).expect("failed to reopen store");
        let stats = store.stats().expect("stats should succeed");
        assert_eq!(stats.raw_points, 1);
        assert_eq!(stats.minute_buckets, 1);

        let buckets = store
            .scan_buckets(Resolution::Minute, &a, base(), base() + Duration::hours(1))
            .expect("scan should succeed");
        assert_eq!(buckets[0].stats.sum, 3.0);
    }

    #[test]
    fn test_durable_store_ignores_torn_batch() {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        let a = key("a");
        {
            let store = DurableStore::open(temp_dir.path(), false).expect("failed to open store");
            store.insert_raw(vec![point(&a, 0, 1.0)]).expect("insert should succeed");
        }
        {
            let path = temp_dir.path().join(WAL_FILE_NAME);
            let mut file = std::fs::OpenOptions::new().append(true).open(path).expect("open log");
            file.write_all(&[2, 0, 0, 0, 0, 0, 0, 0, 1, 0]).expect("write partial header");
        }

        let store = DurableStore::open(temp_dir.path(), false).expect("failed to reopen store");
        assert_eq!(store.stats().expect("stats should succeed").raw_points, 1);
        store.insert_raw(vec![point(&a, 10, 2.0)]).expect("insert after recovery should succeed");
    }

    #[test]
    fn test_checkpoint_preserves_state() {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        let a = key("a");
        let b = SeriesKey::new("requests", Tags::new()).expect("key should build");

        {
            let store = DurableStore::open(temp_dir.path(), true).expect("failed to open store");
            store.insert_raw(vec![point(&a, 0, 1.0)]).expect("insert should succeed");
            store
                .insert_raw(vec![RawPoint::new(b.clone(), MetricKind::Counter, base(), 10.0)])
                .expect("insert should succeed");
            store
                .delete_range(Resolution::Raw, Some(&a), None, base() + Duration::hours(1))
                .expect("delete should succeed");
            store.checkpoint().expect("checkpoint should succeed");
            store.insert_raw(vec![point(&a, 5, 4.0)]).expect("insert should succeed");
        }

        let store = DurableStore::open(temp_dir.path(), true).expect("failed to reopen store");
        let series = store.series().expect("series should succeed");
        assert_eq!(series.len(), 2);
        let requests = series.iter().find(|s| s.series == b).expect("requests series should exist");
        assert_eq!(requests.kind, MetricKind::Counter);

        let points = store
            .scan_raw(&a, base(), base() + Duration::minutes(1))
            .expect("scan should succeed");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 4.0);
    }

    #[test]
    fn test_open_store_from_config() {
        let store = open_store(&StorageConfig::default()).expect("memory store should open");
        assert_eq!(store.stats().expect("stats should succeed"), StoreStats::default());

        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        let config = StorageConfig {
            data_directory: Some(temp_dir.path().join("data")),
            ..Default::default()
        };
        let store = open_store(&config).expect("durable store should open");
        store.insert_raw(vec![point(&key("a"), 0, 1.0)]).expect("insert should succeed");
        assert!(temp_dir.path().join("data").join(WAL_FILE_NAME).exists());
    }
}
