//! Strata Transaction - Atomic Write Batches
//!
//! A write batch is the unit of atomicity of the point store: every mutation
//! in a batch is validated against the current state, logged as one
//! write-ahead-log record and applied together, or the whole batch is
//! rejected. Cross-tier moves (insert derived buckets, delete their source
//! window) are expressed as one batch.
//!
//! Optimistic preconditions let a writer assert how many rows a deleted
//! range holds; if a concurrent flush changed the range the batch fails
//! with a conflict instead of deleting data it never looked at.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::backend::SeriesInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_common::{Bucket, RawPoint, Resolution, SeriesKey};

// =============================================================================
// Mutation
// =============================================================================

/// A single change inside a write batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// Append raw points.
    InsertRaw { points: Vec<RawPoint> },
    /// Insert aggregate buckets into a non-raw tier. Each bucket is written once.
    InsertBuckets {
        resolution: Resolution,
        buckets: Vec<Bucket>,
    },
    /// Delete rows with `after <= timestamp < before`, for one series or all.
    DeleteRange {
        resolution: Resolution,
        series: Option<SeriesKey>,
        after: Option<DateTime<Utc>>,
        before: DateTime<Utc>,
        /// Reject the batch unless the range holds exactly this many rows.
        expected: Option<usize>,
    },
    /// Record series metadata without data. Emitted by checkpoints.
    DescribeSeries { series: Vec<SeriesInfo> },
}

// =============================================================================
// Write Batch
// =============================================================================

/// An ordered list of mutations committed atomically.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WriteBatch {
    pub mutations: Vec<Mutation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) -> &mut Self {
        self.mutations.push(mutation);
        self
    }

    pub fn insert_raw(mut self, points: Vec<RawPoint>) -> Self {
        self.mutations.push(Mutation::InsertRaw { points });
        self
    }

    pub fn insert_buckets(mut self, resolution: Resolution, buckets: Vec<Bucket>) -> Self {
        self.mutations.push(Mutation::InsertBuckets { resolution, buckets });
        self
    }

    pub fn delete_range(
        mut self,
        resolution: Resolution,
        series: Option<SeriesKey>,
        after: Option<DateTime<Utc>>,
        before: DateTime<Utc>,
    ) -> Self {
        self.mutations.push(Mutation::DeleteRange {
            resolution,
            series,
            after,
            before,
            expected: None,
        });
        self
    }

    /// Delete a range that must hold exactly `expected` rows at commit time.
    pub fn delete_exact(
        mut self,
        resolution: Resolution,
        series: SeriesKey,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        expected: usize,
    ) -> Self {
        self.mutations.push(Mutation::DeleteRange {
            resolution,
            series: Some(series),
            after: Some(after),
            before,
            expected: Some(expected),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Effect of a committed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitSummary {
    pub raw_inserted: usize,
    pub buckets_inserted: usize,
    pub rows_deleted: usize,
}

// =============================================================================
// Tests
// =============================================================================
