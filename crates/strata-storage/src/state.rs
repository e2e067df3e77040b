//! Strata Store State - In-Memory Tiers
//!
//! The live contents of the point store: raw points and the two aggregate
//! tiers, each keyed by series and ordered by timestamp. Shared by the
//! memory and durable backends; the durable backend replays its log into
//! the same structure.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::backend::{SeriesInfo, StoreStats, TierScan};
use crate::transaction::{CommitSummary, Mutation, WriteBatch};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;
use strata_common::{
    is_aligned, Bucket, BucketStats, DataPoint, MetricKind, Resolution, Result, SeriesKey,
    StrataError,
};

/// Raw values at one instant, in arrival order.
type RawSeries = BTreeMap<DateTime<Utc>, Vec<f64>>;
type BucketSeries = BTreeMap<DateTime<Utc>, BucketStats>;

const RAW_ROW_BYTES: usize = std::mem::size_of::<DateTime<Utc>>() + std::mem::size_of::<f64>();
const BUCKET_ROW_BYTES: usize =
    std::mem::size_of::<DateTime<Utc>>() + std::mem::size_of::<BucketStats>();

// =============================================================================
// Store State
// =============================================================================

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    kinds: HashMap<SeriesKey, MetricKind>,
    raw: HashMap<SeriesKey, RawSeries>,
    minute: HashMap<SeriesKey, BucketSeries>,
    hour: HashMap<SeriesKey, BucketSeries>,
    raw_count: usize,
}

impl StoreState {
    fn tier(&self, resolution: Resolution) -> Option<&HashMap<SeriesKey, BucketSeries>> {
        match resolution {
            Resolution::Raw => None,
            Resolution::Minute => Some(&self.minute),
            Resolution::Hour => Some(&self.hour),
        }
    }

    fn tier_mut(&mut self, resolution: Resolution) -> Option<&mut HashMap<SeriesKey, BucketSeries>> {
        match resolution {
            Resolution::Raw => None,
            Resolution::Minute => Some(&mut self.minute),
            Resolution::Hour => Some(&mut self.hour),
        }
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    /// Check every mutation of a batch without changing anything.
    ///
    /// Range preconditions are evaluated against the state before the batch.
    pub fn validate(&self, batch: &WriteBatch) -> Result<()> {
        let mut pending: HashSet<(Resolution, &SeriesKey, DateTime<Utc>)> = HashSet::new();
        let mut deletes: Vec<(Resolution, Option<&SeriesKey>, Option<DateTime<Utc>>, DateTime<Utc>)> =
            Vec::new();

        for mutation in &batch.mutations {
            match mutation {
                Mutation::InsertRaw { points } => {
                    if let Some(bad) = points.iter().find(|p| !p.value.is_finite()) {
                        return Err(StrataError::InvalidValue(format!(
                            "{} at {} is not finite",
                            bad.series, bad.timestamp
                        )));
                    }
                }
                Mutation::InsertBuckets { resolution, buckets } => {
                    let (tier, width) = match (self.tier(*resolution), resolution.width()) {
                        (Some(tier), Some(width)) => (tier, width),
                        _ => {
                            return Err(StrataError::InvalidResolution(format!(
                                "buckets cannot be inserted into the {} tier",
                                resolution
                            )))
                        }
                    };

                    for bucket in buckets {
                        bucket.stats.validate()?;
                        if !is_aligned(bucket.start, width) {
                            return Err(StrataError::InvalidValue(format!(
                                "bucket start {} is not aligned to {}",
                                bucket.start, resolution
                            )));
                        }

                        let deleted_earlier = deletes.iter().any(|(r, series, after, before)| {
                            r == resolution
                                && series.map_or(true, |s| s == &bucket.series)
                                && after.map_or(true, |a| bucket.start >= a)
                                && bucket.start < *before
                        });
                        let stored = tier
                            .get(&bucket.series)
                            .is_some_and(|rows| rows.contains_key(&bucket.start));

                        if (stored && !deleted_earlier)
                            || !pending.insert((*resolution, &bucket.series, bucket.start))
                        {
                            return Err(StrataError::BucketExists(format!(
                                "{} {} at {}",
                                resolution, bucket.series, bucket.start
                            )));
                        }
                    }
                }
                Mutation::DeleteRange {
                    resolution,
                    series,
                    after,
                    before,
                    expected,
                } => {
                    if let Some(expected) = expected {
                        let actual = self.count_range(*resolution, series.as_ref(), *after, *before);
                        if actual != *expected {
                            return Err(StrataError::Conflict(format!(
                                "{} range before {} holds {} rows, expected {}",
                                resolution, before, actual, expected
                            )));
                        }
                    }
                    deletes.push((*resolution, series.as_ref(), *after, *before));
                }
                Mutation::DescribeSeries { .. } => {}
            }
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Apply
    // -------------------------------------------------------------------------

    /// Apply a batch that has already been validated.
    pub fn apply(&mut self, batch: WriteBatch) -> CommitSummary {
        let mut summary = CommitSummary::default();

        for mutation in batch.mutations {
            match mutation {
                Mutation::InsertRaw { points } => {
                    summary.raw_inserted += points.len();
                    self.raw_count += points.len();
                    for point in points {
                        self.kinds.insert(point.series.clone(), point.kind);
                        self.raw
                            .entry(point.series)
                            .or_default()
                            .entry(point.timestamp)
                            .or_default()
                            .push(point.value);
                    }
                }
                Mutation::InsertBuckets { resolution, buckets } => {
                    summary.buckets_inserted += buckets.len();
                    let kinds = &mut self.kinds;
                    let Some(tier) = (match resolution {
                        Resolution::Raw => None,
                        Resolution::Minute => Some(&mut self.minute),
                        Resolution::Hour => Some(&mut self.hour),
                    }) else {
                        continue;
                    };
                    for bucket in buckets {
                        kinds.entry(bucket.series.clone()).or_default();
                        tier.entry(bucket.series).or_default().insert(bucket.start, bucket.stats);
                    }
                }
                Mutation::DeleteRange {
                    resolution,
                    series,
                    after,
                    before,
                    ..
                } => {
                    summary.rows_deleted += self.delete_range(resolution, series.as_ref(), after, before);
                }
                Mutation::DescribeSeries { series } => {
                    for info in series {
                        self.kinds.insert(info.series, info.kind);
                    }
                }
            }
        }

        summary
    }

    fn delete_range(
        &mut self,
        resolution: Resolution,
        series: Option<&SeriesKey>,
        after: Option<DateTime<Utc>>,
        before: DateTime<Utc>,
    ) -> usize {
        let targets: Vec<SeriesKey> = match series {
            Some(key) => vec![key.clone()],
            None => match resolution {
                Resolution::Raw => self.raw.keys().cloned().collect(),
                _ => self
                    .tier(resolution)
                    .map(|tier| tier.keys().cloned().collect())
                    .unwrap_or_default(),
            },
        };

        let mut deleted = 0;
        for key in &targets {
            match resolution {
                Resolution::Raw => {
                    if let Some(rows) = self.raw.get_mut(key) {
                        let removed: usize =
                            split_range(rows, after, before).values().map(Vec::len).sum();
                        self.raw_count -= removed;
                        deleted += removed;
                        if rows.is_empty() {
                            self.raw.remove(key);
                        }
                    }
                }
                _ => {
                    if let Some(tier) = self.tier_mut(resolution) {
                        if let Some(rows) = tier.get_mut(key) {
                            deleted += split_range(rows, after, before).len();
                            if rows.is_empty() {
                                tier.remove(key);
                            }
                        }
                    }
                }
            }
            self.forget_if_empty(key);
        }

        deleted
    }

    fn forget_if_empty(&mut self, key: &SeriesKey) {
        if !self.raw.contains_key(key) && !self.minute.contains_key(key) && !self.hour.contains_key(key) {
            self.kinds.remove(key);
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn count_range(
        &self,
        resolution: Resolution,
        series: Option<&SeriesKey>,
        after: Option<DateTime<Utc>>,
        before: DateTime<Utc>,
    ) -> usize {
        let bounds = bounds(after, before);
        match resolution {
            Resolution::Raw => {
                let count = |rows: &RawSeries| -> usize {
                    bounds.map_or(0, |b| rows.range(b).map(|(_, v)| v.len()).sum())
                };
                match series {
                    Some(key) => self.raw.get(key).map_or(0, count),
                    None => self.raw.values().map(count).sum(),
                }
            }
            _ => {
                let Some(tier) = self.tier(resolution) else {
                    return 0;
                };
                let count = |rows: &BucketSeries| -> usize { bounds.map_or(0, |b| rows.range(b).count()) };
                match series {
                    Some(key) => tier.get(key).map_or(0, count),
                    None => tier.values().map(count).sum(),
                }
            }
        }
    }

    /// Raw points of one series in `[start, end)`, ascending; ties keep arrival order.
    pub fn scan_raw(&self, series: &SeriesKey, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DataPoint> {
        let (Some(rows), Some(b)) = (self.raw.get(series), bounds(Some(start), end)) else {
            return Vec::new();
        };
        rows.range(b)
            .flat_map(|(ts, values)| values.iter().map(move |v| DataPoint::new(*ts, *v)))
            .collect()
    }

    /// Buckets of one series whose start lies in `[start, end)`, ascending.
    pub fn scan_buckets(
        &self,
        resolution: Resolution,
        series: &SeriesKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Bucket> {
        let rows = self.tier(resolution).and_then(|tier| tier.get(series));
        let (Some(rows), Some(b)) = (rows, bounds(Some(start), end)) else {
            return Vec::new();
        };
        rows.range(b)
            .map(|(ts, stats)| Bucket::new(series.clone(), *ts, *stats))
            .collect()
    }

    pub fn scan_tiers(
        &self,
        series: &SeriesKey,
        tiers: &[Resolution],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TierScan {
        let mut scan = TierScan::default();
        for tier in tiers {
            match tier {
                Resolution::Raw => scan.raw = self.scan_raw(series, start, end),
                Resolution::Minute => scan.minute = self.scan_buckets(Resolution::Minute, series, start, end),
                Resolution::Hour => scan.hour = self.scan_buckets(Resolution::Hour, series, start, end),
            }
        }
        scan
    }

    pub fn series(&self) -> Vec<SeriesInfo> {
        let keys: BTreeSet<&SeriesKey> = self
            .raw
            .keys()
            .chain(self.minute.keys())
            .chain(self.hour.keys())
            .collect();

        keys.into_iter()
            .map(|key| SeriesInfo {
                series: key.clone(),
                kind: self.kinds.get(key).copied().unwrap_or_default(),
            })
            .collect()
    }

    pub fn series_in(&self, resolution: Resolution) -> Vec<SeriesKey> {
        let mut keys: Vec<SeriesKey> = match resolution {
            Resolution::Raw => self.raw.keys().cloned().collect(),
            _ => self
                .tier(resolution)
                .map(|tier| tier.keys().cloned().collect())
                .unwrap_or_default(),
        };
        keys.sort();
        keys
    }

    pub fn stats(&self) -> StoreStats {
        let minute_buckets: usize = self.minute.values().map(BTreeMap::len).sum();
        let hour_buckets: usize = self.hour.values().map(BTreeMap::len).sum();
        let series = self.series();

        let key_bytes: usize = self
            .raw
            .keys()
            .chain(self.minute.keys())
            .chain(self.hour.keys())
            .map(SeriesKey::size_bytes)
            .sum();

        StoreStats {
            total_points: (self.raw_count + minute_buckets + hour_buckets) as u64,
            total_series: series.len() as u64,
            approx_size_bytes: (self.raw_count * RAW_ROW_BYTES
                + (minute_buckets + hour_buckets) * BUCKET_ROW_BYTES
                + key_bytes) as u64,
            raw_points: self.raw_count as u64,
            minute_buckets: minute_buckets as u64,
            hour_buckets: hour_buckets as u64,
        }
    }

    /// A batch that rebuilds this state from empty.
    pub fn snapshot(&self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        batch.push(Mutation::DescribeSeries { series: self.series() });

        let points = self
            .raw
            .iter()
            .flat_map(|(key, rows)| {
                let kind = self.kinds.get(key).copied().unwrap_or_default();
                rows.iter().flat_map(move |(ts, values)| {
                    values
                        .iter()
                        .map(move |v| strata_common::RawPoint::new(key.clone(), kind, *ts, *v))
                })
            })
            .collect::<Vec<_>>();
        if !points.is_empty() {
            batch.push(Mutation::InsertRaw { points });
        }

        for resolution in [Resolution::Minute, Resolution::Hour] {
            let buckets: Vec<Bucket> = self
                .tier(resolution)
                .into_iter()
                .flat_map(|tier| tier.iter())
                .flat_map(|(key, rows)| rows.iter().map(move |(ts, stats)| Bucket::new(key.clone(), *ts, *stats)))
                .collect();
            if !buckets.is_empty() {
                batch.push(Mutation::InsertBuckets { resolution, buckets });
            }
        }

        batch
    }
}

// =============================================================================
// Range Helpers
// =============================================================================

type TimeBounds = (Bound<DateTime<Utc>>, Bound<DateTime<Utc>>);

/// Range bounds for `after <= t < before`; `None` when the range is empty.
fn bounds(after: Option<DateTime<Utc>>, before: DateTime<Utc>) -> Option<TimeBounds> {
    match after {
        Some(a) if a >= before => None,
        Some(a) => Some((Bound::Included(a), Bound::Excluded(before))),
        None => Some((Bound::Unbounded, Bound::Excluded(before))),
    }
}

/// Remove and return the rows with `after <= t < before`.
fn split_range<V>(
    rows: &mut BTreeMap<DateTime<Utc>, V>,
    after: Option<DateTime<Utc>>,
    before: DateTime<Utc>,
) -> BTreeMap<DateTime<Utc>, V> {
    let mut tail = rows.split_off(&before);
    let removed = match after {
        Some(a) if a < before => rows.split_off(&a),
        Some(_) => BTreeMap::new(),
        None => std::mem::take(rows),
    };
    rows.append(&mut tail);
    removed
}

// =============================================================================
// Tests
// =============================================================================
