//! Strata Time Series Retention
//!
//! Downsampling and expiry across the Raw -> 1-minute -> 1-hour chain.
//!
//! Consolidation moves complete windows of a source tier into buckets of
//! the next tier. Every window is one atomic batch that inserts the bucket
//! and deletes exactly the source rows it summarizes, so a crash leaves each
//! window either fully migrated or untouched. Windows whose end lies past
//! the cutoff are never touched. Expiry deletes terminal-tier buckets older
//! than their horizon.
//!
//! Both passes are idempotent: migrated windows have no source rows left.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::aggregation::{Downsampler, Window};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_common::{
    align_timestamp, Bucket, Resolution, Result, RetentionConfig, SeriesKey, StrataError,
};
use strata_storage::{PointStore, WriteBatch};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Retention Policy
// =============================================================================

/// Retention horizon of each tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub raw: Duration,
    pub minute: Duration,
    pub hour: Duration,
}

impl RetentionPolicy {
    pub fn from_config(config: &RetentionConfig) -> Result<Self> {
        let convert = |resolution: Resolution| {
            Duration::from_std(config.horizon(resolution)).map_err(|e| {
                StrataError::Configuration(format!("{} retention out of range: {}", resolution, e))
            })
        };

        Ok(Self {
            raw: convert(Resolution::Raw)?,
            minute: convert(Resolution::Minute)?,
            hour: convert(Resolution::Hour)?,
        })
    }

    pub fn horizon(&self, resolution: Resolution) -> Duration {
        match resolution {
            Resolution::Raw => self.raw,
            Resolution::Minute => self.minute,
            Resolution::Hour => self.hour,
        }
    }

    /// Data of `resolution` older than this is consolidated or expired.
    pub fn cutoff(&self, resolution: Resolution, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.horizon(resolution)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            raw: Duration::days(7),
            minute: Duration::days(30),
            hour: Duration::days(365),
        }
    }
}

// =============================================================================
// Retention Report
// =============================================================================

/// Outcome of a consolidation or retention cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub buckets_written: usize,
    pub source_rows_removed: usize,
    pub rows_expired: usize,
    /// Points that arrived for windows already consolidated and were dropped.
    pub late_points_discarded: u64,
    /// Windows left for the next cycle after repeated write conflicts.
    pub windows_deferred: usize,
    /// One entry per failed pass.
    pub failures: Vec<String>,
    /// Another cycle was running, nothing was done.
    pub skipped: bool,
    pub cancelled: bool,
}

impl RetentionReport {
    pub fn absorb(&mut self, other: RetentionReport) {
        self.buckets_written += other.buckets_written;
        self.source_rows_removed += other.source_rows_removed;
        self.rows_expired += other.rows_expired;
        self.late_points_discarded += other.late_points_discarded;
        self.windows_deferred += other.windows_deferred;
        self.failures.extend(other.failures);
        self.cancelled |= other.cancelled;
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Whether the store was changed.
    pub fn changed(&self) -> bool {
        self.buckets_written > 0 || self.source_rows_removed > 0 || self.rows_expired > 0
    }
}

/// One step of the tier chain: `source` rows merge into `target` windows of `width`.
#[derive(Debug, Clone, Copy)]
struct Transition {
    source: Resolution,
    target: Resolution,
    width: Duration,
}

impl Transition {
    fn from_source(source: Resolution) -> Result<Self> {
        let target = source.next().ok_or_else(|| {
            StrataError::InvalidResolution(format!("{} tier has no coarser tier", source))
        })?;
        let width = target
            .width()
            .ok_or_else(|| StrataError::InvalidResolution(target.to_string()))?;
        Ok(Self { source, target, width })
    }
}

enum Outcome {
    Migrated { buckets: usize, rows: usize },
    Discarded { rows: usize, points: u64 },
    Conflict,
}

// =============================================================================
// Retention Manager
// =============================================================================

/// Runs consolidation and expiry against a point store.
pub struct RetentionManager {
    store: Arc<dyn PointStore>,
    policy: RetentionPolicy,
    checkpoint_after_cycle: bool,
    /// Held for the duration of a pass; passes never overlap.
    running: Mutex<()>,
    last_cycle: RwLock<Option<DateTime<Utc>>>,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn PointStore>, policy: RetentionPolicy) -> Self {
        Self {
            store,
            policy,
            checkpoint_after_cycle: false,
            running: Mutex::new(()),
            last_cycle: RwLock::new(None),
        }
    }

    /// Compact the store after each cycle that changed it.
    pub fn with_checkpoints(mut self, enabled: bool) -> Self {
        self.checkpoint_after_cycle = enabled;
        self
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn last_cycle(&self) -> Option<DateTime<Utc>> {
        *self.last_cycle.read()
    }

    // -------------------------------------------------------------------------
    // Scheduled Cycle
    // -------------------------------------------------------------------------

    /// Run every consolidation transition and then expiry.
    ///
    /// A failing pass is recorded in the report and the remaining passes
    /// still run. Returns immediately if another pass holds the guard.
    pub fn run_cycle(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> RetentionReport {
        let Some(_running) = self.running.try_lock() else {
            tracing::warn!("Retention cycle already in progress, skipping");
            return RetentionReport {
                skipped: true,
                ..Default::default()
            };
        };

        let mut report = RetentionReport::default();

        for source in [Resolution::Raw, Resolution::Minute] {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let cutoff = self.policy.cutoff(source, now);
            match self.consolidate(source, cutoff, cancel) {
                Ok(pass) => report.absorb(pass),
                Err(e) => {
                    tracing::error!("Consolidation of {} tier failed: {}", source, e);
                    report.failures.push(format!("consolidate {}: {}", source, e));
                }
            }
        }

        if !report.cancelled {
            let cutoff = self.policy.cutoff(Resolution::Hour, now);
            match self.expire(cutoff) {
                Ok(expired) => report.rows_expired += expired,
                Err(e) => {
                    tracing::error!("Expiry of {} tier failed: {}", Resolution::Hour, e);
                    report.failures.push(format!("expire {}: {}", Resolution::Hour, e));
                }
            }
        }

        if self.checkpoint_after_cycle && report.changed() {
            if let Err(e) = self.store.checkpoint() {
                tracing::error!("Checkpoint after retention cycle failed: {}", e);
                report.failures.push(format!("checkpoint: {}", e));
            }
        }

        *self.last_cycle.write() = Some(now);
        tracing::info!(
            "Retention cycle: {} buckets written, {} source rows removed, {} expired, {} late points discarded, {} failures",
            report.buckets_written,
            report.source_rows_removed,
            report.rows_expired,
            report.late_points_discarded,
            report.failures.len()
        );

        report
    }

    /// Consolidate data older than `cutoff` into `target`, outside the schedule.
    ///
    /// Waits for a running cycle to finish instead of skipping.
    pub fn trigger(&self, target: Resolution, cutoff: DateTime<Utc>) -> Result<RetentionReport> {
        let source = target.source().ok_or_else(|| {
            StrataError::InvalidResolution(format!("{} is not a downsampling target", target))
        })?;

        let _running = self.running.lock();
        let report = self.consolidate(source, cutoff, &CancellationToken::new())?;
        tracing::info!(
            "Manual downsample to {}: {} buckets written, {} source rows removed",
            target,
            report.buckets_written,
            report.source_rows_removed
        );
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Consolidation
    // -------------------------------------------------------------------------

    /// Move every complete window of `source` ending at or before `cutoff`
    /// into the next tier.
    pub fn consolidate(
        &self,
        source: Resolution,
        cutoff: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<RetentionReport> {
        let transition = Transition::from_source(source)?;
        let end = align_timestamp(cutoff, transition.width);

        let mut report = RetentionReport::default();
        for series in self.store.series_in(source)? {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            self.consolidate_series(transition, &series, end, cancel, &mut report)?;
        }

        Ok(report)
    }

    fn consolidate_series(
        &self,
        transition: Transition,
        series: &SeriesKey,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
        report: &mut RetentionReport,
    ) -> Result<()> {
        let windows = self.scan_windows(transition, series, DateTime::<Utc>::MIN_UTC, end)?;
        if windows.is_empty() {
            return Ok(());
        }
        tracing::debug!("Consolidating {} windows of {} into {}", windows.len(), series, transition.target);

        for window in windows {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let mut outcome = self.migrate_window(transition, series, &window)?;
            if matches!(outcome, Outcome::Conflict) {
                // A concurrent write changed the window; summarize it again.
                let window_end = window.start + transition.width;
                let rescanned = self.scan_windows(transition, series, window.start, window_end)?;
                outcome = match rescanned.first() {
                    Some(fresh) => self.migrate_window(transition, series, fresh)?,
                    None => continue,
                };
            }

            match outcome {
                Outcome::Migrated { buckets, rows } => {
                    report.buckets_written += buckets;
                    report.source_rows_removed += rows;
                }
                Outcome::Discarded { rows, points } => {
                    tracing::warn!(
                        "Discarded {} late points of {} at {}: {} bucket already written",
                        points,
                        series,
                        window.start,
                        transition.target
                    );
                    report.source_rows_removed += rows;
                    report.late_points_discarded += points;
                }
                Outcome::Conflict => {
                    tracing::warn!("Window {} of {} still conflicting, deferring", window.start, series);
                    report.windows_deferred += 1;
                }
            }
        }

        Ok(())
    }

    /// Group source rows in `[start, end)` by destination window.
    fn scan_windows(
        &self,
        transition: Transition,
        series: &SeriesKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Window>> {
        let downsampler = Downsampler::new(transition.width);
        match transition.source {
            Resolution::Raw => Ok(downsampler.points(&self.store.scan_raw(series, start, end)?)),
            source => Ok(downsampler.buckets(&self.store.scan_buckets(source, series, start, end)?)),
        }
    }

    /// Commit one window: insert its bucket and delete exactly its source rows.
    fn migrate_window(&self, transition: Transition, series: &SeriesKey, window: &Window) -> Result<Outcome> {
        let Transition { source, target, width } = transition;
        let window_end = window.start + width;
        let batch = WriteBatch::new()
            .insert_buckets(target, vec![Bucket::new(series.clone(), window.start, window.stats)])
            .delete_exact(source, series.clone(), window.start, window_end, window.samples);

        match self.store.commit(batch) {
            Ok(summary) => Ok(Outcome::Migrated {
                buckets: summary.buckets_inserted,
                rows: summary.rows_deleted,
            }),
            Err(StrataError::BucketExists(_)) => {
                // The window was consolidated before these rows arrived.
                let discard =
                    WriteBatch::new().delete_exact(source, series.clone(), window.start, window_end, window.samples);
                match self.store.commit(discard) {
                    Ok(summary) => Ok(Outcome::Discarded {
                        rows: summary.rows_deleted,
                        points: window.stats.count,
                    }),
                    Err(StrataError::Conflict(_)) => Ok(Outcome::Conflict),
                    Err(e) => Err(e),
                }
            }
            Err(StrataError::Conflict(_)) => Ok(Outcome::Conflict),
            Err(e) => Err(e),
        }
    }

    // -------------------------------------------------------------------------
    // Expiry
    // -------------------------------------------------------------------------

    /// Delete terminal-tier buckets starting before `cutoff`.
    pub fn expire(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let terminal = Resolution::Hour;
        let expired = self.store.delete_range(terminal, None, None, cutoff)?;
        if expired > 0 {
            tracing::info!("Expired {} {} buckets older than {}", expired, terminal, cutoff);
        }
        Ok(expired)
    }
}

// =============================================================================
// Tests
// =============================================================================
