//! Strata Time Series Ingest Buffer
//!
//! Accepted points wait in an in-memory batch until the next flush moves
//! the whole batch into the point store as one transaction. Writers never
//! wait on storage; a failed flush keeps the batch for the next attempt, up
//! to a bounded backlog.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use strata_common::{RawPoint, Result, StrataError};
use strata_storage::PointStore;

// =============================================================================
// Ingest Buffer
// =============================================================================

pub struct IngestBuffer {
    store: Arc<dyn PointStore>,
    pending: Mutex<Vec<RawPoint>>,
    max_pending: usize,
    /// Serializes flushes so a batch is never written twice.
    flush_lock: Mutex<()>,
    closed: AtomicBool,
    accepted: AtomicU64,
    flushes: AtomicU64,
    failed_flushes: AtomicU64,
    last_flush: RwLock<Option<DateTime<Utc>>>,
}

impl IngestBuffer {
    pub fn new(store: Arc<dyn PointStore>, max_pending: usize) -> Self {
        Self {
            store,
            pending: Mutex::new(Vec::new()),
            max_pending,
            flush_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            accepted: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            failed_flushes: AtomicU64::new(0),
            last_flush: RwLock::new(None),
        }
    }

    /// Append a point to the pending batch.
    pub fn record(&self, point: RawPoint) -> Result<()> {
        // Checked under the batch lock so no point lands after `close`.
        let mut pending = self.pending.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(StrataError::ShutDown);
        }
        if pending.len() >= self.max_pending {
            return Err(StrataError::BacklogFull(pending.len()));
        }
        pending.push(point);
        self.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Move the entire pending batch into the store, returning the points written.
    ///
    /// On failure the batch is put back ahead of points recorded meanwhile.
    pub fn flush(&self) -> Result<usize> {
        let _flushing = self.flush_lock.lock();

        let mut batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return Ok(0);
        }
        batch.sort_by_key(|p| p.timestamp);
        let count = batch.len();

        match self.store.insert_raw(batch.clone()) {
            Ok(_) => {
                self.flushes.fetch_add(1, Ordering::Relaxed);
                *self.last_flush.write() = Some(Utc::now());
                tracing::debug!("Flushed {} points", count);
                Ok(count)
            }
            Err(e) => {
                self.failed_flushes.fetch_add(1, Ordering::Relaxed);
                let mut pending = self.pending.lock();
                batch.append(&mut pending);
                *pending = batch;
                tracing::warn!("Flush of {} points failed, keeping them for retry: {}", count, e);
                Err(e)
            }
        }
    }

    /// Refuse further writes. Pending points stay until the final flush.
    ///
    /// Once this returns, every accepted point is in the pending batch.
    pub fn close(&self) {
        let _pending = self.pending.lock();
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn failed_flushes(&self) -> u64 {
        self.failed_flushes.load(Ordering::Relaxed)
    }

    pub fn last_flush(&self) -> Option<DateTime<Utc>> {
        *self.last_flush.read()
    }
}

// =============================================================================
// Tests
// =============================================================================
