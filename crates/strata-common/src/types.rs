//! Strata Types - Core Data Types
//!
//! Points, aggregate buckets and resolution tiers shared by the storage
//! and query layers.
//!
//! Key Features:
//! - Raw points carrying series identity and metric kind
//! - Sufficient statistics (`sum, count, min, max, first, last`) per bucket
//! - The fixed Raw -> 1-minute -> 1-hour resolution chain
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::error::{Result, StrataError};
use crate::series::{MetricKind, SeriesKey};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Data Point
// =============================================================================

/// A single timestamped value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl DataPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

// =============================================================================
// Raw Point
// =============================================================================

/// A measurement as written by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    pub series: SeriesKey,
    pub kind: MetricKind,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl RawPoint {
    pub fn new(series: SeriesKey, kind: MetricKind, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            series,
            kind,
            timestamp,
            value,
        }
    }

    pub fn data_point(&self) -> DataPoint {
        DataPoint::new(self.timestamp, self.value)
    }
}

// =============================================================================
// Bucket Statistics
// =============================================================================

/// Sufficient statistics from which every supported aggregate is derived.
///
/// Values must be pushed, and buckets merged, in ascending time order so
/// that `first` and `last` follow timestamp order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub sum: f64,
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub first: f64,
    pub last: f64,
}

impl BucketStats {
    pub fn from_value(value: f64) -> Self {
        Self {
            sum: value,
            count: 1,
            min: value,
            max: value,
            first: value,
            last: value,
        }
    }

    /// Build statistics from values in time order. `None` for no values.
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Option<Self> {
        let mut iter = values.into_iter();
        let mut stats = Self::from_value(iter.next()?);
        for value in iter {
            stats.push(value);
        }
        Some(stats)
    }

    /// Fold in a value later than all values seen so far.
    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.last = value;
    }

    /// Fold in statistics covering a later time span.
    pub fn merge(&mut self, later: &BucketStats) {
        self.sum += later.sum;
        self.count += later.count;
        self.min = self.min.min(later.min);
        self.max = self.max.max(later.max);
        self.last = later.last;
    }

    pub fn avg(&self) -> f64 {
        self.sum / self.count as f64
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [self.sum, self.min, self.max, self.first, self.last]
            .iter()
            .all(|v| v.is_finite());
        if self.count == 0 || !finite || self.min > self.max {
            return Err(StrataError::InvalidValue(format!("malformed bucket statistics {:?}", self)));
        }
        Ok(())
    }
}

// =============================================================================
// Bucket
// =============================================================================

/// An aggregate bucket of one series at one resolution tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub series: SeriesKey,
    pub start: DateTime<Utc>,
    pub stats: BucketStats,
}

impl Bucket {
    pub fn new(series: SeriesKey, start: DateTime<Utc>, stats: BucketStats) -> Self {
        Self { series, start, stats }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// A level of temporal granularity in the fixed Raw -> Minute -> Hour chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Raw,
    Minute,
    Hour,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Resolution::Raw, Resolution::Minute, Resolution::Hour];

    /// Bucket width of the tier. Raw points have no width.
    pub fn width(&self) -> Option<Duration> {
        match self {
            Self::Raw => None,
            Self::Minute => Some(Duration::minutes(1)),
            Self::Hour => Some(Duration::hours(1)),
        }
    }

    /// The tier this tier's data is consolidated into.
    pub fn next(&self) -> Option<Resolution> {
        match self {
            Self::Raw => Some(Self::Minute),
            Self::Minute => Some(Self::Hour),
            Self::Hour => None,
        }
    }

    /// The tier this tier is derived from.
    pub fn source(&self) -> Option<Resolution> {
        match self {
            Self::Raw => None,
            Self::Minute => Some(Self::Raw),
            Self::Hour => Some(Self::Minute),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Minute => "1m",
            Self::Hour => "1h",
        }
    }
}

impl FromStr for Resolution {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "1m" | "minute" | "tier1" => Ok(Self::Minute),
            "1h" | "hour" | "tier2" => Ok(Self::Hour),
            other => Err(StrataError::InvalidResolution(other.to_string())),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Time Alignment
// =============================================================================

/// Floor a timestamp to a multiple of `width` since the Unix epoch.
pub fn align_timestamp(timestamp: DateTime<Utc>, width: Duration) -> DateTime<Utc> {
    let width_millis = width.num_milliseconds().max(1);
    let millis = timestamp.timestamp_millis();
    let aligned = millis.div_euclid(width_millis) * width_millis;
    DateTime::from_timestamp_millis(aligned).unwrap_or(timestamp)
}

/// Check that a timestamp sits exactly on a `width` boundary.
pub fn is_aligned(timestamp: DateTime<Utc>, width: Duration) -> bool {
    align_timestamp(timestamp, width) == timestamp
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_stats() {
        let stats = BucketStats::from_values([10.0, 20.0, 30.0]).expect("stats should exist");
        assert_eq!(stats.sum, 60.0);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.first, 10.0);
        assert_eq!(stats.last, 30.0);
        assert_eq!(stats.avg(), 20.0);

        assert!(BucketStats::from_values(std::iter::empty()).is_none());
    }

    #[test]
    fn test_bucket_stats_merge() {
        let mut early = BucketStats::from_values([5.0, 1.0]).expect("stats should exist");
        let late = BucketStats::from_values([9.0, 3.0]).expect("stats should exist");
        early.merge(&late);

        assert_eq!(early.count, 4);
        assert_eq!(early.sum, 18.0);
        assert_eq!(early.min, 1.0);
        assert_eq!(early.max, 9.0);
        assert_eq!(early.first, 5.0);
        assert_eq!(early.last, 3.0);
    }

    #[test]
    fn test_resolution_chain() {
        assert_eq!(Resolution::Raw.next(), Some(Resolution::Minute));
        assert_eq!(Resolution::Minute.next(), Some(Resolution::Hour));
        assert!(Resolution::Hour.is_terminal());
        assert_eq!(Resolution::Hour.source(), Some(Resolution::Minute));
        assert_eq!(Resolution::Raw.width(), None);
        assert_eq!("1h".parse::<Resolution>().expect("should parse"), Resolution::Hour);
        assert!(matches!(
            "1d".parse::<Resolution>(),
            Err(StrataError::InvalidResolution(_))
        ));
    }

    #[test]
    fn test_alignment() {
        let ts = DateTime::parse_from_rfc3339("2026-01-19T15:30:45.250Z")
            .expect("failed to parse test timestamp")
            .with_timezone(&Utc);

        let minute = align_timestamp(ts, Duration::minutes(1));
        assert_eq!(minute.to_rfc3339(), "2026-01-19T15:30:00+00:00");

        let hour = align_timestamp(ts, Duration::hours(1));
        assert_eq!(hour.to_rfc3339(), "2026-01-19T15:00:00+00:00");

        assert!(is_aligned(hour, Duration::minutes(1)));
        assert!(!is_aligned(ts, Duration::minutes(1)));
    }

    #[test]
    fn test_alignment_before_epoch() {
        let ts = DateTime::from_timestamp(-30, 0).expect("valid timestamp");
        let aligned = align_timestamp(ts, Duration::minutes(1));
        assert_eq!(aligned.timestamp(), -60);
    }
}
