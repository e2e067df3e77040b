//! Strata Storage - Tiered Point Store
//!
//! Storage layer holding raw points and the 1-minute and 1-hour aggregate
//! tiers, with atomic multi-tier write batches and write-ahead logging.
//!
//! Key Features:
//! - Pluggable point stores (memory, durable)
//! - Atomic write batches with optimistic range preconditions
//! - Write-ahead logging with checksummed records and crash recovery
//! - Checkpoints that compact the log to the live state
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod backend;
mod state;
pub mod transaction;
pub mod wal;

pub use backend::{
    open_store, DurableStore, MemoryStore, PointStore, SeriesInfo, StoreStats, TierScan,
};
pub use transaction::{CommitSummary, Mutation, WriteBatch};
pub use wal::WriteAheadLog;
