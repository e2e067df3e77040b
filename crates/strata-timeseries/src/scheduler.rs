//! Strata Time Series Scheduler
//!
//! Background flush and retention tasks. Each task owns a child of one
//! cancellation token and runs its store work on the blocking pool. A
//! retention cycle observes cancellation only between atomic units, so
//! shutdown waits for the unit in progress and never interrupts one.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::buffer::IngestBuffer;
use crate::retention::RetentionManager;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Background Tasks
// =============================================================================

/// Handles of the running background loops.
pub struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Flush `buffer` every `interval`. Must be called inside a Tokio runtime.
    pub fn spawn_flush(&mut self, buffer: Arc<IngestBuffer>, interval: Duration) {
        let cancel = self.cancel.child_token();
        self.handles.push(tokio::spawn(flush_loop(buffer, interval, cancel)));
    }

    /// Run retention cycles every `interval` after `startup_delay`.
    pub fn spawn_retention(&mut self, manager: Arc<RetentionManager>, interval: Duration, startup_delay: Duration) {
        let cancel = self.cancel.child_token();
        self.handles
            .push(tokio::spawn(retention_loop(manager, interval, startup_delay, cancel)));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel all loops and wait for them to stop.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!("Background task ended abnormally: {}", e);
            }
        }
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Loops
// =============================================================================

async fn flush_loop(buffer: Arc<IngestBuffer>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let buffer = buffer.clone();
        match tokio::task::spawn_blocking(move || buffer.flush()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!("Scheduled flush failed: {}", e),
            Err(e) => tracing::error!("Flush task panicked: {}", e),
        }
    }

    tracing::debug!("Flush loop stopped");
}

async fn retention_loop(
    manager: Arc<RetentionManager>,
    period: Duration,
    startup_delay: Duration,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(startup_delay) => {}
    }

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let manager = manager.clone();
        let token = cancel.clone();
        let cycle = tokio::task::spawn_blocking(move || manager.run_cycle(Utc::now(), &token));
        if let Err(e) = cycle.await {
            tracing::error!("Retention task panicked: {}", e);
        }
    }

    tracing::debug!("Retention loop stopped");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retention::RetentionPolicy;
    use strata_common::{MetricKind, RawPoint, SeriesKey, Tags};
    use strata_storage::{MemoryStore, PointStore};

    fn point() -> RawPoint {
        let series = SeriesKey::new("cpu", Tags::new()).expect("key should build");
        RawPoint::new(series, MetricKind::Gauge, Utc::now(), 1.0)
    }

    #[tokio::test]
    async fn test_flush_loop_flushes_periodically() {
        let store = Arc::new(MemoryStore::new());
        let buffer = Arc::new(IngestBuffer::new(store.clone(), 100));
        buffer.record(point()).expect("record should succeed");

        let mut tasks = BackgroundTasks::new();
        tasks.spawn_flush(buffer.clone(), Duration::from_millis(20));
        assert_eq!(tasks.len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.stats().expect("stats should succeed").raw_points, 1);
        assert_eq!(buffer.pending_len(), 0);

        tasks.shutdown().await;
    }

    #[tokio::test]
    async fn test_retention_loop_runs_after_delay() {
        let store = Arc::new(MemoryStore::new());
        let old = SeriesKey::new("cpu", Tags::new()).expect("key should build");
        store
            .insert_raw(vec![RawPoint::new(
                old,
                MetricKind::Gauge,
                Utc::now() - chrono::Duration::days(8),
                2.0,
            )])
            .expect("insert should succeed");

        let manager = Arc::new(RetentionManager::new(store.clone(), RetentionPolicy::default()));
        let mut tasks = BackgroundTasks::new();
        tasks.spawn_retention(manager.clone(), Duration::from_secs(3600), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(manager.last_cycle().is_some());
        let stats = store.stats().expect("stats should succeed");
        assert_eq!(stats.raw_points, 0);
        assert_eq!(stats.minute_buckets, 1);

        tasks.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_before_startup_delay() {
        let manager = Arc::new(RetentionManager::new(Arc::new(MemoryStore::new()), RetentionPolicy::default()));
        let mut tasks = BackgroundTasks::new();
        tasks.spawn_retention(manager.clone(), Duration::from_secs(3600), Duration::from_secs(3600));

        tasks.shutdown().await;
        assert!(manager.last_cycle().is_none());
    }
}
