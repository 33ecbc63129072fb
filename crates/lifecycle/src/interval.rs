//! Interval - invokes an action on a fixed cadence until stopped

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use contracts::{AutoflushError, FlushContext};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::latch::{Latch, LatchState};
use crate::worker::panic_message;
use crate::{report_error, ErrorSink};

/// Action run on every tick
pub type IntervalAction =
    Arc<dyn Fn(FlushContext) -> BoxFuture<'static, Result<(), AutoflushError>> + Send + Sync>;

/// Periodic trigger
///
/// Ticks never overlap: a slow action delays the following tick instead of
/// bursting to catch up.
pub struct Interval {
    period: Duration,
    action: IntervalAction,
    context: FlushContext,
    errors: Option<ErrorSink>,
    latch: Latch,
}

impl Interval {
    pub fn new(period: Duration, context: FlushContext, action: IntervalAction) -> Self {
        Self {
            period,
            action,
            context,
            errors: None,
            latch: Latch::new(),
        }
    }

    /// Set the errors sink
    pub fn with_errors(mut self, errors: Option<ErrorSink>) -> Self {
        self.errors = errors;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn latch(&self) -> &Latch {
        &self.latch
    }

    /// Run the tick loop until stopped; the first tick fires one period after start
    pub async fn start(&self) -> Result<(), AutoflushError> {
        if !self
            .latch
            .transition(LatchState::Stopped, LatchState::Starting)
        {
            return Err(AutoflushError::CannotStart);
        }

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.latch.started();
        debug!(period_ms = self.period.as_millis() as u64, "interval started");

        loop {
            let stopping = self.latch.notify_stopping();
            if self.latch.is_stopping() {
                break;
            }
            tokio::select! {
                biased;
                _ = stopping => break,
                _ = ticker.tick() => self.trigger().await,
            }
        }

        self.latch.stopped();
        debug!("interval stopped");
        Ok(())
    }

    async fn trigger(&self) {
        let action = Arc::clone(&self.action);
        let ctx = self.context.clone();
        let outcome = AssertUnwindSafe(async move { action(ctx).await })
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => report_error(self.errors.as_ref(), e),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(message = %message, "interval action panicked");
                report_error(
                    self.errors.as_ref(),
                    AutoflushError::IntervalPanicked { message },
                );
            }
        }
    }

    /// Stop the loop and wait for the in-flight tick to finish
    pub async fn stop(&self) -> Result<(), AutoflushError> {
        let stopped = self.latch.notify_stopped();
        if !self
            .latch
            .transition(LatchState::Started, LatchState::Stopping)
        {
            return Err(AutoflushError::CannotStop);
        }
        stopped.await;
        Ok(())
    }

    /// Stop if running, otherwise return immediately
    pub async fn wait_stopped(&self) {
        if self.stop().await.is_err() && !self.latch.is_stopped() {
            self.latch.notify_stopped().await;
        }
    }
}
