//! Strata Time Series Engine
//!
//! Core engine that coordinates ingestion, storage, querying and the
//! background downsampling schedule.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::buffer::IngestBuffer;
use crate::query::{QueryExecutor, QueryResult, TimeSeriesQuery};
use crate::retention::{RetentionManager, RetentionPolicy, RetentionReport};
use crate::scheduler::BackgroundTasks;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use strata_common::{
    parse_value, validate_value, EngineConfig, MetricKind, RawPoint, Resolution, Result, SeriesKey,
    StrataError, Tags,
};
use strata_storage::{open_store, PointStore, SeriesInfo, StoreStats};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Engine Statistics
// =============================================================================

/// Snapshot of engine and store statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStats {
    pub storage: StoreStats,
    pub pending_points: usize,
    pub points_accepted: u64,
    pub flush_count: u64,
    pub failed_flushes: u64,
    pub last_flush: Option<DateTime<Utc>>,
    pub last_retention_cycle: Option<DateTime<Utc>>,
}

impl EngineStats {
    pub fn total_points(&self) -> u64 {
        self.storage.total_points
    }

    pub fn total_series(&self) -> u64 {
        self.storage.total_series
    }

    pub fn approx_size_bytes(&self) -> u64 {
        self.storage.approx_size_bytes
    }
}

// =============================================================================
// Time Series Engine
// =============================================================================

/// The main time series storage and query engine.
pub struct TimeSeriesEngine {
    config: EngineConfig,
    store: Arc<dyn PointStore>,
    buffer: Arc<IngestBuffer>,
    retention: Arc<RetentionManager>,
    executor: QueryExecutor,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl TimeSeriesEngine {
    /// Open the store described by `config` and build the engine around it.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store = open_store(&config.storage)?;
        Self::with_store(config, store)
    }

    /// Build the engine around an existing store.
    pub fn with_store(config: EngineConfig, store: Arc<dyn PointStore>) -> Result<Self> {
        config.validate()?;
        let policy = RetentionPolicy::from_config(&config.retention)?;

        let buffer = Arc::new(IngestBuffer::new(store.clone(), config.ingest.max_pending_points));
        let retention = Arc::new(
            RetentionManager::new(store.clone(), policy).with_checkpoints(config.storage.checkpoint_after_cycle),
        );

        Ok(Self {
            executor: QueryExecutor::new(store.clone()),
            config,
            store,
            buffer,
            retention,
            tasks: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn PointStore> {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Spawn the flush and retention loops on the current Tokio runtime.
    pub fn start(&self) -> Result<()> {
        if self.buffer.is_closed() {
            return Err(StrataError::ShutDown);
        }

        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return Ok(());
        }

        let mut background = BackgroundTasks::new();
        background.spawn_flush(self.buffer.clone(), self.config.ingest.flush_interval);
        if self.config.scheduler.enabled {
            background.spawn_retention(
                self.retention.clone(),
                self.config.scheduler.interval,
                self.config.scheduler.startup_delay,
            );
        }

        tracing::info!(
            "Time series engine started: flush every {:?}, retention {}",
            self.config.ingest.flush_interval,
            if self.config.scheduler.enabled { "scheduled" } else { "disabled" }
        );
        *tasks = Some(background);
        Ok(())
    }

    /// Stop background work, flush every accepted point and sync the store.
    pub async fn shutdown(&self) -> Result<()> {
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.shutdown().await;
        }

        self.buffer.close();
        let buffer = self.buffer.clone();
        let store = self.store.clone();
        let flushed = tokio::task::spawn_blocking(move || -> Result<usize> {
            let flushed = buffer.flush()?;
            store.sync()?;
            Ok(flushed)
        })
        .await
        .map_err(|e| StrataError::Storage(format!("final flush task failed: {}", e)))??;

        tracing::info!("Time series engine shut down, final flush wrote {} points", flushed);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Ingestion
    // -------------------------------------------------------------------------

    /// Record a measurement. It becomes visible to queries after the next flush.
    pub fn record(
        &self,
        name: &str,
        kind: MetricKind,
        value: f64,
        tags: Tags,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let value = validate_value(value)?;
        let series = SeriesKey::new(name, tags)?;
        self.buffer.record(RawPoint::new(series, kind, timestamp, value))
    }

    pub fn record_now(&self, name: &str, kind: MetricKind, value: f64, tags: Tags) -> Result<()> {
        self.record(name, kind, value, tags, Utc::now())
    }

    /// Record from text fields: a numeric value and `key=value,...` tags.
    pub fn record_text(
        &self,
        name: &str,
        kind: MetricKind,
        value: &str,
        tags: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let value = parse_value(value)?;
        let tags = Tags::parse(tags)?;
        self.record(name, kind, value, tags, timestamp.unwrap_or_else(Utc::now))
    }

    /// Flush pending points now, returning how many were written.
    pub fn flush(&self) -> Result<usize> {
        self.buffer.flush()
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn query(&self, query: &TimeSeriesQuery) -> Result<QueryResult> {
        self.executor.execute(query)
    }

    /// Every series currently holding data in any tier.
    pub fn list_series(&self) -> Result<Vec<SeriesInfo>> {
        self.store.series()
    }

    pub fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            storage: self.store.stats()?,
            pending_points: self.buffer.pending_len(),
            points_accepted: self.buffer.accepted(),
            flush_count: self.buffer.flush_count(),
            failed_flushes: self.buffer.failed_flushes(),
            last_flush: self.buffer.last_flush(),
            last_retention_cycle: self.retention.last_cycle(),
        })
    }

    // -------------------------------------------------------------------------
    // Retention
    // -------------------------------------------------------------------------

    /// Consolidate data older than `older_than` into `target` now.
    pub fn trigger_downsample(&self, older_than: Duration, target: Resolution) -> Result<RetentionReport> {
        if older_than < Duration::zero() {
            return Err(StrataError::InvalidQuery("older_than must not be negative".to_string()));
        }
        self.retention.trigger(target, Utc::now() - older_than)
    }

    /// Run one full retention cycle as of `now`.
    pub fn run_retention(&self, now: DateTime<Utc>) -> RetentionReport {
        self.retention.run_cycle(now, &CancellationToken::new())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::AggregateFunction;
    use std::collections::HashMap;

    fn engine() -> TimeSeriesEngine {
        TimeSeriesEngine::open(EngineConfig::in_memory()).expect("engine should open")
    }

    fn host(name: &str) -> Tags {
        Tags::new().with("host", name)
    }

    #[test]
    fn test_write_and_query() {
        let engine = engine();
        let now = Utc::now();

        for i in 0..10 {
            engine
                .record("cpu", MetricKind::Gauge, i as f64, host("a"), now - Duration::seconds(10 - i))
                .expect("record should succeed");
        }

        let query = TimeSeriesQuery::new("cpu", now - Duration::minutes(1), now + Duration::seconds(1));
        assert!(engine.query(&query).expect("query should succeed").is_empty());

        assert_eq!(engine.flush().expect("flush should succeed"), 10);
        let result = engine.query(&query).expect("query should succeed");
        assert_eq!(result.series.len(), 1);
        assert_eq!(result.series[0].points.len(), 10);
    }

    #[test]
    fn test_validation_errors() {
        let engine = engine();

        let err = engine
            .record_now("", MetricKind::Gauge, 1.0, Tags::new())
            .expect_err("empty name should be rejected");
        assert!(matches!(err, StrataError::InvalidSeriesName(_)));

        let err = engine
            .record_now("cpu", MetricKind::Gauge, f64::NAN, Tags::new())
            .expect_err("NaN should be rejected");
        assert!(matches!(err, StrataError::InvalidValue(_)));

        let err = engine
            .record_text("cpu", MetricKind::Gauge, "abc", "host=a", None)
            .expect_err("non-numeric text should be rejected");
        assert!(matches!(err, StrataError::InvalidValue(_)));

        let err = engine
            .record_text("cpu", MetricKind::Gauge, "1", "host", None)
            .expect_err("malformed tags should be rejected");
        assert!(matches!(err, StrataError::InvalidTags(_)));

        assert_eq!(engine.stats().expect("stats should succeed").points_accepted, 0);
    }

    #[test]
    fn test_record_text() {
        let engine = engine();
        let ts = Utc::now();
        engine
            .record_text("req", MetricKind::Counter, " 12.5 ", " method = GET , path=/a,method=POST", Some(ts))
            .expect("record should succeed");
        engine.flush().expect("flush should succeed");

        let series = engine.list_series().expect("list should succeed");
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].kind, MetricKind::Counter);
        assert_eq!(series[0].series.tags().get("method").map(String::as_str), Some("POST"));
        assert_eq!(series[0].series.tags().get("path").map(String::as_str), Some("/a"));
    }

    #[test]
    fn test_tag_order_does_not_matter() {
        let engine = engine();
        let ts = Utc::now();

        let mut forward = HashMap::new();
        forward.insert("a".to_string(), "1".to_string());
        forward.insert("b".to_string(), "2".to_string());
        let reversed: Tags = [("b", "2"), ("a", "1")].into_iter().collect();

        engine
            .record("x", MetricKind::Gauge, 1.0, Tags::from(forward), ts)
            .expect("record should succeed");
        engine
            .record("x", MetricKind::Gauge, 2.0, reversed, ts + Duration::seconds(1))
            .expect("record should succeed");
        engine.flush().expect("flush should succeed");

        assert_eq!(engine.list_series().expect("list should succeed").len(), 1);
    }

    #[test]
    fn test_stats() {
        let engine = engine();
        let now = Utc::now();
        engine.record("cpu", MetricKind::Gauge, 1.0, host("a"), now).expect("record should succeed");
        engine.record("cpu", MetricKind::Gauge, 2.0, host("b"), now).expect("record should succeed");

        let before = engine.stats().expect("stats should succeed");
        assert_eq!(before.pending_points, 2);
        assert_eq!(before.total_points(), 0);

        engine.flush().expect("flush should succeed");
        let after = engine.stats().expect("stats should succeed");
        assert_eq!(after.total_points(), 2);
        assert_eq!(after.total_series(), 2);
        assert!(after.approx_size_bytes() > 0);
        assert_eq!(after.flush_count, 1);
        assert!(after.last_flush.is_some());
    }

    #[test]
    fn test_trigger_downsample() {
        let engine = engine();
        let old = Utc::now() - Duration::hours(2);
        for i in 0..3 {
            engine
                .record("cpu", MetricKind::Gauge, 10.0 * (i + 1) as f64, host("a"), old + Duration::seconds(i * 5))
                .expect("record should succeed");
        }
        engine.flush().expect("flush should succeed");

        let report = engine
            .trigger_downsample(Duration::hours(1), Resolution::Minute)
            .expect("downsample should succeed");
        assert!(report.buckets_written >= 1);
        assert_eq!(report.source_rows_removed, 3);

        let query = TimeSeriesQuery::new("cpu", old - Duration::minutes(5), Utc::now())
            .with_aggregation(AggregateFunction::Sum)
            .at_resolution(Resolution::Minute);
        let result = engine.query(&query).expect("query should succeed");
        assert_eq!(result.series[0].points[0].value, 60.0);

        let err = engine
            .trigger_downsample(Duration::hours(1), Resolution::Raw)
            .expect_err("raw is not a downsampling target");
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_points() {
        let engine = engine();
        engine.start().expect("start should succeed");
        engine
            .record_now("cpu", MetricKind::Gauge, 42.0, host("a"))
            .expect("record should succeed");

        engine.shutdown().await.expect("shutdown should succeed");
        let stats = engine.stats().expect("stats should succeed");
        assert_eq!(stats.storage.raw_points, 1);
        assert_eq!(stats.pending_points, 0);

        assert!(matches!(
            engine.record_now("cpu", MetricKind::Gauge, 1.0, host("a")),
            Err(StrataError::ShutDown)
        ));
        assert!(matches!(engine.start(), Err(StrataError::ShutDown)));
    }
}
