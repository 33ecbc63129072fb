//! Graceful shutdown - bounded drain of the store, the queue and the workers
//!
//! One deadline derived from `shutdown_grace_period` bounds every step. Running out of
//! time abandons whatever is still queued; `stop` itself still succeeds.

use std::sync::atomic::Ordering;

use contracts::{AutoflushError, Flush, FlushContext, FlushHandler};
use futures::future::join_all;
use lifecycle::LatchState;
use tracing::{debug, info, instrument};

use crate::buffer::Buffer;

impl<T, H> Buffer<T, H>
where
    T: Send + 'static,
    H: FlushHandler<T> + Sync + 'static,
{
    /// Stop the buffer, giving in-flight and buffered items the grace period to be handled
    ///
    /// Fails with `CannotStop` unless the buffer is started. A buffer cannot be
    /// restarted once stopped.
    #[instrument(
        name = "buffer_stop",
        skip(self),
        fields(grace_ms = self.settings.shutdown_grace_period.as_millis() as u64)
    )]
    pub async fn stop(&self) -> Result<(), AutoflushError> {
        if self.latch.state() != LatchState::Started
            || self.stop_requested.swap(true, Ordering::AcqRel)
        {
            return Err(AutoflushError::CannotStop);
        }
        let Some(runtime) = self.runtime.get() else {
            return Err(AutoflushError::CannotStop);
        };

        runtime.interval.wait_stopped().await;

        let stopped = self.latch.notify_stopped();
        self.latch.stopping();
        stopped.await;

        let deadline = self
            .context
            .with_timeout(self.settings.shutdown_grace_period);
        let _cancel = deadline.cancel_on_drop();

        self.seal_remaining(&deadline);
        let remaining = self.take_queued();
        if !remaining.is_empty() {
            debug!(remaining = remaining.len(), "flushes remaining");
        }

        let mut timed_out = false;
        for flush in remaining {
            let worker = tokio::select! {
                biased;
                _ = deadline.done() => {
                    timed_out = true;
                    break;
                }
                worker = runtime.ready_rx.recv() => match worker {
                    Ok(worker) => worker,
                    Err(_) => break,
                },
            };
            if worker.enqueue(flush).await.is_err() {
                debug!(worker = worker.id(), "worker gone, flush abandoned");
            }
        }

        debug!(workers = runtime.workers.len(), "draining workers");
        join_all(runtime.workers.iter().map(|w| w.drain(&deadline))).await;
        timed_out |= deadline.is_done();

        // workers parked in the pool hold the pool's sender through their finalizer
        while runtime.ready_rx.try_recv().is_ok() {}

        if timed_out {
            debug!("stop timed out");
        }
        info!("Buffer stopped");
        Ok(())
    }

    /// Seal the final partial batch and close the queue to producers
    fn seal_remaining(&self, deadline: &FlushContext) {
        let mut store = self.lock_contents();
        if !store.is_empty() {
            let flush = Flush::new(deadline.clone(), store.drain());
            if let Err(e) = self.flushes_tx.try_send(flush) {
                self.lock_carry_over().push(e.into_inner());
            }
        }
        self.flushes_tx.close();
    }

    /// Everything left to hand out, oldest first
    fn take_queued(&self) -> Vec<Flush<T>> {
        let mut remaining: Vec<Flush<T>> = self.lock_carry_over().drain(..).collect();
        while let Ok(flush) = self.flushes_rx.try_recv() {
            remaining.push(flush);
        }
        remaining
    }
}
