//! Strata Common - Shared Types and Utilities
//!
//! Foundational types, error handling and configuration used by the Strata
//! storage and time series crates.
//!
//! Key Features:
//! - Unified error type with validation/retryable classification
//! - Canonical series identity (metric name plus sorted tag set)
//! - Points, sufficient-statistics buckets and resolution tiers
//! - Engine configuration loadable from TOML
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod config;
pub mod error;
pub mod series;
pub mod types;

pub use config::{EngineConfig, IngestConfig, RetentionConfig, SchedulerConfig, StorageConfig};
pub use error::{Result, StrataError};
pub use series::{parse_value, validate_name, validate_value, MetricKind, SeriesKey, Tags};
pub use types::{align_timestamp, is_aligned, Bucket, BucketStats, DataPoint, RawPoint, Resolution};
