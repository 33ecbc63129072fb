//! Dispatch loop - pairs queued flushes with ready workers

use contracts::{Flush, FlushHandler};
use tracing::{debug, instrument};

use crate::buffer::{Buffer, FlushWorker};

impl<T, H> Buffer<T, H>
where
    T: Send + 'static,
    H: FlushHandler<T> + Sync + 'static,
{
    /// Run until the latch enters Stopping
    ///
    /// A flush already taken off the queue when the stop signal wins is put back, so
    /// the shutdown drain still sees it.
    #[instrument(name = "buffer_dispatch", skip_all)]
    pub(crate) async fn dispatch(&self, ready: &async_channel::Receiver<FlushWorker<T>>) {
        self.latch.started();

        let mut dispatched: u64 = 0;
        loop {
            let stopping = self.latch.notify_stopping();
            tokio::pin!(stopping);
            if self.latch.is_stopping() {
                break;
            }

            let flush = tokio::select! {
                biased;
                _ = &mut stopping => break,
                flush = self.flushes_rx.recv() => match flush {
                    Ok(flush) => flush,
                    Err(_) => break,
                },
            };

            let worker = tokio::select! {
                biased;
                _ = &mut stopping => {
                    self.requeue(flush);
                    break;
                }
                worker = ready.recv() => match worker {
                    Ok(worker) => worker,
                    Err(_) => {
                        self.requeue(flush);
                        break;
                    }
                },
            };

            if let Err(flush) = worker.enqueue(flush).await {
                self.requeue(flush);
                break;
            }
            dispatched += 1;
        }

        debug!(dispatched, "dispatch loop stopping");
        self.latch.stopped();
    }

    fn requeue(&self, flush: Flush<T>) {
        if let Err(e) = self.flushes_tx.try_send(flush) {
            self.lock_carry_over().push(e.into_inner());
        }
    }
}
