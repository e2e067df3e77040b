//! Strata Config - Configuration Structures
//!
//! Configuration consumed by the engine at startup: storage location,
//! ingestion flush cadence, per-tier retention horizons and the background
//! scheduler cadence. Loadable from TOML with humantime durations
//! (`flush_interval = "1s"`, `raw = "7d"`).
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::error::{Result, StrataError};
use crate::types::Resolution;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DAY: u64 = 24 * 60 * 60;

// =============================================================================
// Storage Configuration
// =============================================================================

/// Configuration for the point store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the write-ahead log. `None` keeps data in memory only.
    pub data_directory: Option<PathBuf>,
    /// fsync every committed batch.
    pub sync_writes: bool,
    /// Rewrite the log as a checkpoint after each retention cycle.
    pub checkpoint_after_cycle: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: None,
            sync_writes: true,
            checkpoint_after_cycle: true,
        }
    }
}

// =============================================================================
// Ingest Configuration
// =============================================================================

/// Configuration for the ingestion buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    /// Upper bound on accepted-but-unflushed points.
    pub max_pending_points: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(1),
            max_pending_points: 100_000,
        }
    }
}

// =============================================================================
// Retention Configuration
// =============================================================================

/// Retention horizon per resolution tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    #[serde(with = "humantime_serde")]
    pub raw: Duration,
    #[serde(with = "humantime_serde")]
    pub minute: Duration,
    #[serde(with = "humantime_serde")]
    pub hour: Duration,
}

impl RetentionConfig {
    pub fn horizon(&self, resolution: Resolution) -> Duration {
        match resolution {
            Resolution::Raw => self.raw,
            Resolution::Minute => self.minute,
            Resolution::Hour => self.hour,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            raw: Duration::from_secs(7 * DAY),
            minute: Duration::from_secs(30 * DAY),
            hour: Duration::from_secs(365 * DAY),
        }
    }
}

// =============================================================================
// Scheduler Configuration
// =============================================================================

/// Cadence of the background retention job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Delay before the first cycle so startup work is not competed with.
    #[serde(with = "humantime_serde")]
    pub startup_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60 * 60),
            startup_delay: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub retention: RetentionConfig,
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| StrataError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// In-memory configuration, mainly for tests and embedding.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Durable configuration rooted at `dir`.
    pub fn durable(dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                data_directory: Some(dir.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest.flush_interval.is_zero() {
            return Err(StrataError::Configuration("flush_interval must be positive".into()));
        }
        if self.ingest.max_pending_points == 0 {
            return Err(StrataError::Configuration("max_pending_points must be positive".into()));
        }
        if self.scheduler.interval.is_zero() {
            return Err(StrataError::Configuration("scheduler interval must be positive".into()));
        }
        for resolution in Resolution::ALL {
            let horizon = self.retention.horizon(resolution);
            let min = resolution
                .next()
                .and_then(|next| next.width())
                .and_then(|w| w.to_std().ok())
                .unwrap_or(Duration::from_secs(1));
            if horizon < min {
                return Err(StrataError::Configuration(format!(
                    "{} retention {:?} is shorter than {:?}",
                    resolution, horizon, min
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
