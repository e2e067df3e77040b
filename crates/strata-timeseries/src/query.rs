//! Strata Time Series Query
//!
//! Range and aggregated queries over the point store. A query reads every
//! tier holding data for its range and stitches the results, so it keeps
//! returning the same answer while downsampling migrates data between tiers.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::aggregation::{AggregateFunction, Downsampler};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_common::{
    validate_name, BucketStats, DataPoint, MetricKind, Resolution, Result, SeriesKey, StrataError,
    Tags,
};
use strata_storage::PointStore;

// =============================================================================
// Time Series Query
// =============================================================================

/// A time series query over `[start, end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesQuery {
    pub metric: String,
    /// Tags a series must carry; extra tags on the series are ignored.
    pub tags: Option<Tags>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Option<Duration>,
    pub aggregation: Option<AggregateFunction>,
    /// Read a single tier instead of stitching all of them.
    pub resolution: Option<Resolution>,
    pub limit: Option<usize>,
}

impl TimeSeriesQuery {
    /// Create a new query for a metric.
    pub fn new(metric: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            metric: metric.into(),
            tags: None,
            start,
            end,
            step: None,
            aggregation: None,
            resolution: None,
            limit: None,
        }
    }

    /// Query the last N duration.
    pub fn last(metric: impl Into<String>, duration: Duration) -> Self {
        let end = Utc::now();
        let start = end - duration;
        Self::new(metric, start, end)
    }

    /// Add tag filters.
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Partition the range into windows of `step`.
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregateFunction) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    pub fn at_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Add a result limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Get the time range duration.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn is_aggregated(&self) -> bool {
        self.step.is_some() || self.aggregation.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.metric)?;
        if let Some(tags) = &self.tags {
            tags.validate()?;
        }
        if self.start > self.end {
            return Err(StrataError::InvalidQuery(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        if let Some(step) = self.step {
            if step <= Duration::zero() {
                return Err(StrataError::InvalidQuery("step must be positive".to_string()));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Query Result
// =============================================================================

/// Points of one series matched by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesResult {
    pub series: SeriesKey,
    pub kind: MetricKind,
    pub points: Vec<DataPoint>,
}

/// Result of a time series query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub series: Vec<SeriesResult>,
    pub query_time_ms: u64,
    pub points_scanned: usize,
    pub points_returned: usize,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Get total number of data points.
    pub fn total_points(&self) -> usize {
        self.series.iter().map(|s| s.points.len()).sum()
    }

    /// Check if the result is empty.
    pub fn is_empty(&self) -> bool {
        self.series.is_empty() || self.total_points() == 0
    }

    /// Points of the series with exactly these tags.
    pub fn points_for(&self, tags: &Tags) -> Option<&[DataPoint]> {
        self.series
            .iter()
            .find(|s| s.series.tags() == tags)
            .map(|s| s.points.as_slice())
    }
}

// =============================================================================
// Query Executor
// =============================================================================

/// Executes time series queries against a point store.
pub struct QueryExecutor {
    store: Arc<dyn PointStore>,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn PointStore>) -> Self {
        Self { store }
    }

    /// Execute a query. Storage failures are returned, never partial results.
    pub fn execute(&self, query: &TimeSeriesQuery) -> Result<QueryResult> {
        query.validate()?;
        let start_time = std::time::Instant::now();

        let filter = query.tags.clone().unwrap_or_default();
        let mut result = QueryResult::empty();

        for info in self.store.series()? {
            if !info.series.matches(&query.metric, &filter) {
                continue;
            }

            let samples = self.collect_samples(query, &info.series)?;
            result.points_scanned += samples.len();

            let mut points = if query.is_aggregated() {
                Self::aggregate(query, samples)
            } else {
                samples
                    .into_iter()
                    .map(|(timestamp, stats)| DataPoint::new(timestamp, stats.avg()))
                    .collect()
            };

            if let Some(limit) = query.limit {
                points.truncate(limit);
            }

            if !points.is_empty() {
                result.series.push(SeriesResult {
                    series: info.series,
                    kind: info.kind,
                    points,
                });
            }
        }

        result.points_returned = result.total_points();
        result.query_time_ms = start_time.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Read every requested tier for one series, merged in timestamp order.
    ///
    /// All tiers come from one view of the store, so a window being migrated
    /// is seen exactly once. A raw point becomes single-value statistics so
    /// that all tiers share one representation.
    fn collect_samples(
        &self,
        query: &TimeSeriesQuery,
        series: &SeriesKey,
    ) -> Result<Vec<(DateTime<Utc>, BucketStats)>> {
        let tiers: &[Resolution] = match &query.resolution {
            Some(resolution) => std::slice::from_ref(resolution),
            None => &[Resolution::Hour, Resolution::Minute, Resolution::Raw],
        };

        let scan = self.store.scan_tiers(series, tiers, query.start, query.end)?;
        let mut samples: Vec<(DateTime<Utc>, BucketStats)> = scan
            .hour
            .into_iter()
            .chain(scan.minute)
            .map(|b| (b.start, b.stats))
            .chain(scan.raw.into_iter().map(|p| (p.timestamp, BucketStats::from_value(p.value))))
            .collect();

        // Stable: coarser tiers stay ahead of raw points at the same instant.
        samples.sort_by_key(|(timestamp, _)| *timestamp);
        Ok(samples)
    }

    fn aggregate(query: &TimeSeriesQuery, samples: Vec<(DateTime<Utc>, BucketStats)>) -> Vec<DataPoint> {
        let function = query.aggregation.unwrap_or_default();
        let step = match query.step {
            Some(step) => step,
            None if query.duration() > Duration::zero() => query.duration(),
            None => return Vec::new(),
        };

        Downsampler::new(step)
            .with_origin(query.start)
            .downsample(samples)
            .into_iter()
            .map(|window| DataPoint::new(window.start, function.evaluate(&window.stats)))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
