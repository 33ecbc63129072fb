//! # Lifecycle
//!
//! Concurrency primitives underneath the buffer:
//! - [`Latch`]: the `Stopped -> Starting -> Started -> Stopping -> Stopped` state machine
//! - [`Worker`]: a recyclable execution unit with panic recovery
//! - [`Interval`]: a non-overlapping periodic trigger

mod interval;
mod latch;
mod worker;

pub use interval::{Interval, IntervalAction};
pub use latch::{Latch, LatchState};
pub use worker::{WorkAction, Worker, WorkerFinalizer};

use contracts::AutoflushError;
use tokio::sync::mpsc;
use tracing::debug;

/// Optional sink asynchronous errors are delivered to
pub type ErrorSink = mpsc::Sender<AutoflushError>;

/// Deliver an error to the sink without blocking
///
/// Dropped when the sink is absent, full or closed.
pub fn report_error(errors: Option<&ErrorSink>, err: AutoflushError) {
    match errors {
        Some(sink) => {
            if let Err(e) = sink.try_send(err) {
                debug!(error = %e, "error sink unavailable, dropping error");
            }
        }
        None => debug!(error = %err, "no error sink, dropping error"),
    }
}
