//! Buffer and run configuration contracts that can be shared across crates.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AutoflushError;

/// Default size threshold that triggers a flush
pub const DEFAULT_MAX_LEN: usize = 512;

/// Default flush queue capacity
pub const DEFAULT_MAX_FLUSHES: usize = 128;

/// Default forced-flush cadence
pub const DEFAULT_INTERVAL_MS: u64 = 500;

/// Default shutdown deadline
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD_MS: u64 = 10_000;

/// Buffer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AutoflushConfig {
    /// Number of buffered items that seals a flush
    #[validate(range(min = 1))]
    pub max_len: usize,

    /// Flush queue capacity; producers block once it is full
    #[validate(range(min = 1))]
    pub max_flushes: usize,

    /// Worker count (None = available CPU count)
    #[validate(range(min = 1))]
    pub parallelism: Option<usize>,

    /// Forced-flush cadence in milliseconds
    #[validate(range(min = 1))]
    pub interval_ms: u64,

    /// Deadline for `stop` in milliseconds
    pub shutdown_grace_period_ms: u64,
}

impl Default for AutoflushConfig {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_LEN,
            max_flushes: DEFAULT_MAX_FLUSHES,
            parallelism: None,
            interval_ms: DEFAULT_INTERVAL_MS,
            shutdown_grace_period_ms: DEFAULT_SHUTDOWN_GRACE_PERIOD_MS,
        }
    }
}

impl AutoflushConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_period_ms)
    }

    /// Effective worker count
    pub fn parallelism(&self) -> usize {
        self.parallelism.unwrap_or_else(default_parallelism)
    }

    /// Validate field ranges
    pub fn check(&self) -> Result<(), AutoflushError> {
        self.validate()
            .map_err(|e| AutoflushError::config("buffer", e.to_string()))
    }
}

/// Available CPU count, 1 if unknown
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Complete configuration for a CLI run
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct RunConfig {
    /// Buffer settings
    #[serde(default)]
    #[validate(nested)]
    pub buffer: AutoflushConfig,

    /// Handler routing
    #[serde(default)]
    pub handler: HandlerConfig,

    /// Synthetic load settings
    #[serde(default)]
    #[validate(nested)]
    pub load: LoadConfig,
}

/// Handler configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Handler kind
    #[serde(default)]
    pub kind: HandlerKind,

    /// Kind-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// Handler kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// Structured log summary per batch
    #[default]
    Log,
    /// JSON lines appended to a file
    File,
}

/// Synthetic load generated by `autoflush run`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoadConfig {
    /// Concurrent producer tasks
    #[validate(range(min = 1))]
    pub producers: usize,

    /// Items each producer adds
    pub items_per_producer: u64,

    /// Items per call; 1 uses `add`, more uses `add_many`
    #[validate(range(min = 1))]
    pub batch_size: usize,

    /// Labels attached to every producer context
    pub labels: BTreeMap<String, String>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            producers: 4,
            items_per_producer: 10_000,
            batch_size: 1,
            labels: BTreeMap::new(),
        }
    }
}
