//! Strata Time Series - Metric Storage and Downsampling Engine
//!
//! Embedded time series engine: tagged numeric measurements are buffered,
//! flushed to the point store in batches, queried with aggregation across
//! resolution tiers, and progressively consolidated and expired.
//!
//! Key Features:
//! - Non-blocking ingestion with periodic batched flushes
//! - Range and step-aggregated queries stitched across tiers
//! - Raw -> 1-minute -> 1-hour consolidation with sufficient statistics
//! - Atomic, idempotent downsampling and terminal-tier expiry
//! - Cancellable background tasks with a final flush on shutdown
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod aggregation;
pub mod buffer;
pub mod engine;
pub mod query;
pub mod retention;
pub mod scheduler;

pub use aggregation::{AggregateFunction, Downsampler, Window};
pub use buffer::IngestBuffer;
pub use engine::{EngineStats, TimeSeriesEngine};
pub use query::{QueryExecutor, QueryResult, SeriesResult, TimeSeriesQuery};
pub use retention::{RetentionManager, RetentionPolicy, RetentionReport};
pub use scheduler::BackgroundTasks;

pub use strata_common::{
    DataPoint, EngineConfig, MetricKind, Resolution, Result, SeriesKey, StrataError, Tags,
};
pub use strata_storage::{PointStore, SeriesInfo, StoreStats};
