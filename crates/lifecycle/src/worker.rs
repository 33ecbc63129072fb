//! Worker - a recyclable execution unit pushed work over a channel
//!
//! A worker accepts one item at a time, runs its action on it, then invokes its
//! finalizer (used by pools to return the worker to a ready set). Action errors and
//! panics are reported through the optional errors sink.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use contracts::{AutoflushError, FlushContext};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use crate::latch::{Latch, LatchState};
use crate::{report_error, ErrorSink};

/// Action run for every work item
pub type WorkAction<W> =
    Arc<dyn Fn(W) -> BoxFuture<'static, Result<(), AutoflushError>> + Send + Sync>;

/// Hook invoked after every work item, successful or not
pub type WorkerFinalizer<W> =
    Arc<dyn Fn(&Arc<Worker<W>>) -> Result<(), AutoflushError> + Send + Sync>;

/// Worker pushed work over a single-slot channel
pub struct Worker<W> {
    id: usize,
    latch: Latch,
    action: WorkAction<W>,
    finalizer: Option<WorkerFinalizer<W>>,
    errors: Option<ErrorSink>,
    work_tx: mpsc::Sender<W>,
    work_rx: Mutex<Option<mpsc::Receiver<W>>>,
}

impl<W: Send + 'static> Worker<W> {
    /// Create a worker with the given action
    pub fn new(id: usize, action: WorkAction<W>) -> Self {
        let (work_tx, work_rx) = mpsc::channel(1);
        Self {
            id,
            latch: Latch::new(),
            action,
            finalizer: None,
            errors: None,
            work_tx,
            work_rx: Mutex::new(Some(work_rx)),
        }
    }

    /// Set the hook run after each item
    pub fn with_finalizer(mut self, finalizer: WorkerFinalizer<W>) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    /// Set the errors sink
    pub fn with_errors(mut self, errors: Option<ErrorSink>) -> Self {
        self.errors = errors;
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn latch(&self) -> &Latch {
        &self.latch
    }

    /// Hand an item to the worker, waiting for its slot to free up
    ///
    /// Gives the item back if the worker can never receive it.
    pub async fn enqueue(&self, item: W) -> Result<(), W> {
        self.work_tx.send(item).await.map_err(|e| e.0)
    }

    /// Run the worker loop
    ///
    /// Completes when the worker is stopped. To run it in the background:
    ///
    /// ```ignore
    /// let started = worker.latch().notify_started();
    /// tokio::spawn(Arc::clone(&worker).start());
    /// started.await;
    /// ```
    pub async fn start(self: Arc<Self>) -> Result<(), AutoflushError> {
        if !self
            .latch
            .transition(LatchState::Stopped, LatchState::Starting)
        {
            return Err(AutoflushError::CannotStart);
        }
        let taken = self.work_rx.lock().ok().and_then(|mut slot| slot.take());
        let Some(mut rx) = taken else {
            self.latch.stopped();
            return Err(AutoflushError::CannotStart);
        };

        self.dispatch(&mut rx).await;

        if let Ok(mut slot) = self.work_rx.lock() {
            *slot = Some(rx);
        }
        Ok(())
    }

    async fn dispatch(self: &Arc<Self>, rx: &mut mpsc::Receiver<W>) {
        self.latch.started();
        debug!(worker = self.id, "worker started");

        loop {
            let stopping = self.latch.notify_stopping();
            if self.latch.is_stopping() {
                break;
            }
            tokio::select! {
                biased;
                _ = stopping => break,
                item = rx.recv() => match item {
                    Some(item) => self.execute(item).await,
                    None => break,
                },
            }
        }

        // anything handed over before the stop signal is still ours
        while let Ok(item) = rx.try_recv() {
            self.execute(item).await;
        }

        self.latch.stopped();
        debug!(worker = self.id, "worker stopped");
    }

    /// Run the action on one item, recovering panics, then run the finalizer
    pub async fn execute(self: &Arc<Self>, item: W) {
        let action = Arc::clone(&self.action);
        let outcome = AssertUnwindSafe(async move { action(item).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.handle_error(e),
            Err(panic) => self.handle_error(AutoflushError::Panicked {
                worker_id: self.id,
                message: panic_message(panic.as_ref()),
            }),
        }

        if let Some(finalizer) = &self.finalizer {
            if let Err(e) = finalizer(self) {
                self.handle_error(e);
            }
        }
    }

    /// Stop the worker, leaving nothing queued in its slot
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

    /// Let the worker finish its current item and stop, bounded by `ctx`
    #[instrument(name = "worker_drain", skip(self, ctx), fields(worker = self.id))]
    pub async fn drain(&self, ctx: &FlushContext) {
        let stopped = self.latch.notify_stopped();
        if !self
            .latch
            .transition(LatchState::Started, LatchState::Stopping)
        {
            return;
        }
        tokio::select! {
            _ = stopped => {}
            _ = ctx.done() => debug!(worker = self.id, "drain timed out"),
        }
    }

    fn handle_error(&self, err: AutoflushError) {
        report_error(self.errors.as_ref(), err);
    }
}

impl<W> fmt::Debug for Worker<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.latch.state())
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
