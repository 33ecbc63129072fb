//! StatsCollector trait - optional metrics sink
//!
//! Every call is best effort: callers ignore the returned error.

use std::time::Duration;

use thiserror::Error;

/// Error reported by a stats collector
#[derive(Debug, Error)]
#[error("stats collector error: {0}")]
pub struct StatsError(pub String);

/// Metrics sink used by the buffer's instrumentation hooks
pub trait StatsCollector: Send + Sync {
    /// Increment a counter by `value`
    fn count(&self, name: &str, value: i64, tags: &[String]) -> Result<(), StatsError>;

    /// Set a gauge
    fn gauge(&self, name: &str, value: f64, tags: &[String]) -> Result<(), StatsError>;

    /// Record a timing
    fn time_in_milliseconds(
        &self,
        name: &str,
        value: Duration,
        tags: &[String],
    ) -> Result<(), StatsError>;

    /// Record a sample into a distribution
    fn distribution(&self, name: &str, value: f64, tags: &[String]) -> Result<(), StatsError>;
}

/// Milliseconds as a float, the unit elapsed metrics are reported in
pub fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}
