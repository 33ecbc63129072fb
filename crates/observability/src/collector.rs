//! Stats collectors - `StatsCollector` implementations
//!
//! - [`MetricsCollector`]: forwards to the `metrics` facade (Prometheus exporter)
//! - [`MockCollector`]: records every call, for assertions
//! - [`MultiCollector`]: fans out to several collectors

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use contracts::{millis, StatsCollector, StatsError};
use metrics::{counter, gauge, histogram, Label};

/// Split a `key:value` tag into a metrics label
fn tag_label(tag: &str) -> Label {
    match tag.split_once(':') {
        Some((key, value)) => Label::new(key.to_string(), value.to_string()),
        None => Label::new("tag", tag.to_string()),
    }
}

/// Collector backed by the global `metrics` recorder
///
/// Timings and distributions go to histograms suffixed `.timing` and `.distribution`
/// so they never share a name with the gauge of the same measurement.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    default_tags: Vec<String>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag attached to every metric, as `key:value`
    pub fn with_default_tag(mut self, key: &str, value: &str) -> Self {
        self.default_tags.push(format!("{key}:{value}"));
        self
    }

    fn labels(&self, tags: &[String]) -> Vec<Label> {
        self.default_tags
            .iter()
            .chain(tags)
            .map(|t| tag_label(t))
            .collect()
    }
}

impl StatsCollector for MetricsCollector {
    fn count(&self, name: &str, value: i64, tags: &[String]) -> Result<(), StatsError> {
        let value = u64::try_from(value)
            .map_err(|_| StatsError(format!("negative count {value} for '{name}'")))?;
        counter!(name.to_string(), self.labels(tags)).increment(value);
        Ok(())
    }

    fn gauge(&self, name: &str, value: f64, tags: &[String]) -> Result<(), StatsError> {
        gauge!(name.to_string(), self.labels(tags)).set(value);
        Ok(())
    }

    fn time_in_milliseconds(
        &self,
        name: &str,
        value: Duration,
        tags: &[String],
    ) -> Result<(), StatsError> {
        histogram!(format!("{name}.timing"), self.labels(tags)).record(millis(value));
        Ok(())
    }

    fn distribution(&self, name: &str, value: f64, tags: &[String]) -> Result<(), StatsError> {
        histogram!(format!("{name}.distribution"), self.labels(tags)).record(value);
        Ok(())
    }
}

/// Recorded value of a [`MockMetric`]
#[derive(Debug, Clone, PartialEq)]
pub enum MockValue {
    Count(i64),
    Gauge(f64),
    Timing(Duration),
    Distribution(f64),
}

/// One recorded call
#[derive(Debug, Clone, PartialEq)]
pub struct MockMetric {
    pub name: String,
    pub value: MockValue,
    pub tags: Vec<String>,
}

#[derive(Debug, Default)]
struct MockState {
    metrics: Vec<MockMetric>,
    failing: Option<String>,
}

/// Collector that keeps every call in memory
#[derive(Debug, Clone, Default)]
pub struct MockCollector {
    default_tags: Vec<String>,
    state: Arc<Mutex<MockState>>,
}

impl MockCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag attached to every recorded metric, as `key:value`
    pub fn with_default_tag(mut self, key: &str, value: &str) -> Self {
        self.default_tags.push(format!("{key}:{value}"));
        self
    }

    /// Reject every call with `message` instead of recording it
    pub fn fail_with(&self, message: impl Into<String>) {
        self.lock().failing = Some(message.into());
    }

    /// Everything recorded so far, in call order
    pub fn metrics(&self) -> Vec<MockMetric> {
        self.lock().metrics.clone()
    }

    /// Recorded calls for one metric name
    pub fn named(&self, name: &str) -> Vec<MockMetric> {
        self.lock()
            .metrics
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect()
    }

    /// Sum of every count recorded under `name`
    pub fn total_count(&self, name: &str) -> i64 {
        self.named(name)
            .iter()
            .filter_map(|m| match m.value {
                MockValue::Count(c) => Some(c),
                _ => None,
            })
            .sum()
    }

    /// Gauge values recorded under `name`, in call order
    pub fn gauges(&self, name: &str) -> Vec<f64> {
        self.named(name)
            .iter()
            .filter_map(|m| match m.value {
                MockValue::Gauge(g) => Some(g),
                _ => None,
            })
            .collect()
    }

    /// Remove and return everything recorded so far
    pub fn take(&self) -> Vec<MockMetric> {
        std::mem::take(&mut self.lock().metrics)
    }

    fn record(&self, name: &str, value: MockValue, tags: &[String]) -> Result<(), StatsError> {
        let mut state = self.lock();
        if let Some(message) = &state.failing {
            return Err(StatsError(message.clone()));
        }
        let tags = self.default_tags.iter().chain(tags).cloned().collect();
        state.metrics.push(MockMetric {
            name: name.to_string(),
            value,
            tags,
        });
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StatsCollector for MockCollector {
    fn count(&self, name: &str, value: i64, tags: &[String]) -> Result<(), StatsError> {
        self.record(name, MockValue::Count(value), tags)
    }

    fn gauge(&self, name: &str, value: f64, tags: &[String]) -> Result<(), StatsError> {
        self.record(name, MockValue::Gauge(value), tags)
    }

    fn time_in_milliseconds(
        &self,
        name: &str,
        value: Duration,
        tags: &[String],
    ) -> Result<(), StatsError> {
        self.record(name, MockValue::Timing(value), tags)
    }

    fn distribution(&self, name: &str, value: f64, tags: &[String]) -> Result<(), StatsError> {
        self.record(name, MockValue::Distribution(value), tags)
    }
}

/// Collector that forwards every call to each inner collector
///
/// Every collector is called even if an earlier one fails; the first error is returned.
#[derive(Clone, Default)]
pub struct MultiCollector {
    collectors: Vec<Arc<dyn StatsCollector>>,
}

impl MultiCollector {
    pub fn new(collectors: Vec<Arc<dyn StatsCollector>>) -> Self {
        Self { collectors }
    }

    pub fn push(&mut self, collector: Arc<dyn StatsCollector>) {
        self.collectors.push(collector);
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    fn each(
        &self,
        call: impl Fn(&dyn StatsCollector) -> Result<(), StatsError>,
    ) -> Result<(), StatsError> {
        let mut first = None;
        for collector in &self.collectors {
            if let Err(e) = call(collector.as_ref()) {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl StatsCollector for MultiCollector {
    fn count(&self, name: &str, value: i64, tags: &[String]) -> Result<(), StatsError> {
        self.each(|c| c.count(name, value, tags))
    }

    fn gauge(&self, name: &str, value: f64, tags: &[String]) -> Result<(), StatsError> {
        self.each(|c| c.gauge(name, value, tags))
    }

    fn time_in_milliseconds(
        &self,
        name: &str,
        value: Duration,
        tags: &[String],
    ) -> Result<(), StatsError> {
        self.each(|c| c.time_in_milliseconds(name, value, tags))
    }

    fn distribution(&self, name: &str, value: f64, tags: &[String]) -> Result<(), StatsError> {
        self.each(|c| c.distribution(name, value, tags))
    }
}
