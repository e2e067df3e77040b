//! Strata Error - Unified Error Types
//!
//! Error handling for every Strata operation. Errors fall into two classes:
//! validation errors, rejected synchronously at the call boundary and never
//! partially applied, and storage errors, which fail the affected flush or
//! consolidation unit and are retried on the next scheduled cycle.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Unified error type for all Strata operations.
#[derive(Error, Debug)]
pub enum StrataError {
    // Validation errors
    #[error("invalid series name: {0}")]
    InvalidSeriesName(String),

    #[error("invalid tag set: {0}")]
    InvalidTags(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("unknown aggregation function: {0}")]
    UnknownAggregation(String),

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    // Storage errors
    #[error("bucket already exists: {0}")]
    BucketExists(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    // Ingestion errors
    #[error("ingest backlog full: {0} points pending")]
    BacklogFull(usize),

    #[error("engine is shut down")]
    ShutDown,
}

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for Strata operations.
pub type Result<T> = std::result::Result<T, StrataError>;

// =============================================================================
// Error Classification
// =============================================================================

impl StrataError {
    /// Returns true if the error was raised by input validation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StrataError::InvalidSeriesName(_)
                | StrataError::InvalidTags(_)
                | StrataError::InvalidValue(_)
                | StrataError::UnknownAggregation(_)
                | StrataError::InvalidResolution(_)
                | StrataError::InvalidQuery(_)
                | StrataError::Configuration(_)
        )
    }

    /// Returns true if the operation can be safely retried on a later cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StrataError::Conflict(_)
                | StrataError::Storage(_)
                | StrataError::Io(_)
                | StrataError::BacklogFull(_)
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
