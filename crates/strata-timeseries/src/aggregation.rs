//! Strata Time Series Aggregation
//!
//! Aggregation functions over sufficient statistics and the downsampler
//! that groups points or buckets into fixed-width windows.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strata_common::{Bucket, BucketStats, DataPoint, StrataError};

// =============================================================================
// Aggregate Function
// =============================================================================

/// Aggregation function type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    #[default]
    Avg,
    Sum,
    Min,
    Max,
    Count,
    First,
    Last,
}

impl AggregateFunction {
    pub const ALL: [AggregateFunction; 7] = [
        Self::Avg,
        Self::Sum,
        Self::Min,
        Self::Max,
        Self::Count,
        Self::First,
        Self::Last,
    ];

    /// Derive the aggregate from sufficient statistics.
    pub fn evaluate(&self, stats: &BucketStats) -> f64 {
        match self {
            Self::Avg => stats.avg(),
            Self::Sum => stats.sum,
            Self::Min => stats.min,
            Self::Max => stats.max,
            Self::Count => stats.count as f64,
            Self::First => stats.first,
            Self::Last => stats.last,
        }
    }

    /// Apply the aggregation to values in time order.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        BucketStats::from_values(values.iter().copied()).map(|stats| self.evaluate(&stats))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::First => "first",
            Self::Last => "last",
        }
    }
}

impl FromStr for AggregateFunction {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == name)
            .ok_or_else(|| StrataError::UnknownAggregation(s.trim().to_string()))
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Window
// =============================================================================

/// One non-empty window produced by a [`Downsampler`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub stats: BucketStats,
    /// Input samples merged into the window: points or finer buckets.
    pub samples: usize,
}

// =============================================================================
// Downsampler
// =============================================================================

/// Groups time-ordered samples into fixed-width windows.
///
/// Windows are aligned to multiples of the interval counted from `origin`,
/// the Unix epoch unless set otherwise.
#[derive(Debug, Clone)]
pub struct Downsampler {
    interval: Duration,
    origin: DateTime<Utc>,
}

impl Downsampler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            origin: DateTime::UNIX_EPOCH,
        }
    }

    /// Align windows to `origin` instead of the epoch.
    pub fn with_origin(mut self, origin: DateTime<Utc>) -> Self {
        self.origin = origin;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start of the window containing `timestamp`.
    pub fn bucket_start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let interval_millis = self.interval.num_milliseconds().max(1);
        let offset = (timestamp - self.origin).num_milliseconds();
        self.origin + Duration::milliseconds(offset.div_euclid(interval_millis) * interval_millis)
    }

    /// Summarize samples, each a timestamp with the statistics it carries.
    ///
    /// Samples must be in ascending time order. Empty windows produce nothing.
    pub fn downsample<I>(&self, samples: I) -> Vec<Window>
    where
        I: IntoIterator<Item = (DateTime<Utc>, BucketStats)>,
    {
        let mut result: Vec<Window> = Vec::new();

        for (timestamp, stats) in samples {
            let start = self.bucket_start(timestamp);
            match result.last_mut() {
                Some(window) if window.start == start => {
                    window.stats.merge(&stats);
                    window.samples += 1;
                }
                _ => result.push(Window {
                    start,
                    stats,
                    samples: 1,
                }),
            }
        }

        result
    }

    /// Summarize raw points into per-window statistics.
    pub fn points(&self, points: &[DataPoint]) -> Vec<Window> {
        self.downsample(points.iter().map(|p| (p.timestamp, BucketStats::from_value(p.value))))
    }

    /// Roll finer buckets of one series up into windows of this interval.
    pub fn buckets(&self, buckets: &[Bucket]) -> Vec<Window> {
        self.downsample(buckets.iter().map(|b| (b.start, b.stats)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::{SeriesKey, Tags};

    #[test]
    fn test_aggregate_functions() {
        let values = vec![4.0, 1.0, 3.0, 2.0, 5.0];

        assert_eq!(AggregateFunction::Sum.apply(&values), Some(15.0));
        assert_eq!(AggregateFunction::Count.apply(&values), Some(5.0));
        assert_eq!(AggregateFunction::Min.apply(&values), Some(1.0));
        assert_eq!(AggregateFunction::Max.apply(&values), Some(5.0));
        assert_eq!(AggregateFunction::Avg.apply(&values), Some(3.0));
        assert_eq!(AggregateFunction::First.apply(&values), Some(4.0));
        assert_eq!(AggregateFunction::Last.apply(&values), Some(5.0));
        assert_eq!(AggregateFunction::Avg.apply(&[]), None);
    }

    #[test]
    fn test_parse_aggregate_function() {
        assert_eq!("AVG".parse::<AggregateFunction>().expect("should parse"), AggregateFunction::Avg);
        assert_eq!(" last ".parse::<AggregateFunction>().expect("should parse"), AggregateFunction::Last);

        let err = "median".parse::<AggregateFunction>().expect_err("median is not supported");
        assert!(matches!(err, StrataError::UnknownAggregation(ref name) if name == "median"));
        assert!(err.is_validation());
    }

    #[test]
    fn test_downsampler() {
        let base_time = DateTime::from_timestamp(1_700_000_000, 0).expect("failed to create test base_time");
        let points: Vec<DataPoint> = (0..100)
            .map(|i| DataPoint::new(base_time + Duration::seconds(i), i as f64))
            .collect();

        let downsampler = Downsampler::new(Duration::seconds(10));
        let result = downsampler.points(&points);

        assert_eq!(result.len(), 10);
        assert!(result.iter().all(|w| w.stats.count == 10 && w.samples == 10));
        assert_eq!(result[0].stats.first, 0.0);
        assert_eq!(result[0].stats.last, 9.0);
    }

    #[test]
    fn test_downsampler_origin() {
        let origin = DateTime::from_timestamp(1_700_000_007, 0).expect("valid timestamp");
        let downsampler = Downsampler::new(Duration::seconds(10)).with_origin(origin);

        assert_eq!(downsampler.bucket_start(origin + Duration::seconds(9)), origin);
        assert_eq!(
            downsampler.bucket_start(origin + Duration::seconds(10)),
            origin + Duration::seconds(10)
        );
        assert_eq!(
            downsampler.bucket_start(origin - Duration::seconds(1)),
            origin - Duration::seconds(10)
        );
    }

    #[test]
    fn test_roll_up_buckets() {
        let series = SeriesKey::new("cpu", Tags::new()).expect("key should build");
        let hour = DateTime::from_timestamp(1_699_999_200, 0).expect("valid timestamp");
        let buckets: Vec<Bucket> = (0..120)
            .map(|i| Bucket::new(series.clone(), hour + Duration::minutes(i), BucketStats::from_value(i as f64)))
            .collect();

        let rolled = Downsampler::new(Duration::hours(1)).buckets(&buckets);
        assert_eq!(rolled.len(), 2);
        assert_eq!(rolled[0].start, hour);
        assert_eq!(rolled[0].samples, 60);
        assert_eq!(rolled[0].stats.count, 60);
        assert_eq!(rolled[1].stats.first, 60.0);
        assert_eq!(rolled[1].stats.max, 119.0);
    }
}
