//! Handler used by `autoflush run`: the configured sink plus per-batch statistics.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use autoflush::{FileHandler, LogHandler};
use contracts::{AutoflushError, FlushContext, FlushHandler, HandlerConfig, HandlerKind};
use observability::{record_batch_handled, BatchStatsAggregator};
use serde::Serialize;

/// Item emitted by the synthetic producers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntheticEvent {
    pub producer: usize,
    pub seq: u64,
}

enum Sink {
    Log(LogHandler),
    File(FileHandler),
}

/// Configured sink wrapped with batch accounting
pub struct RunHandler {
    name: &'static str,
    sink: Sink,
    stats: Arc<Mutex<BatchStatsAggregator>>,
}

impl RunHandler {
    /// Build the sink named by `config.kind`
    pub fn from_config(config: &HandlerConfig) -> Result<Self, AutoflushError> {
        let (name, sink) = match config.kind {
            HandlerKind::Log => ("log", Sink::Log(LogHandler::new("log"))),
            HandlerKind::File => (
                "file",
                Sink::File(FileHandler::from_params("file", &config.params)?),
            ),
        };
        Ok(Self {
            name,
            sink,
            stats: Arc::new(Mutex::new(BatchStatsAggregator::new())),
        })
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Shared view of the batch statistics, readable after the buffer is gone
    pub fn stats(&self) -> Arc<Mutex<BatchStatsAggregator>> {
        Arc::clone(&self.stats)
    }
}

impl FlushHandler<SyntheticEvent> for RunHandler {
    async fn handle(
        &self,
        ctx: FlushContext,
        items: Vec<SyntheticEvent>,
    ) -> Result<(), AutoflushError> {
        let count = items.len();
        let start = Instant::now();
        let result = match &self.sink {
            Sink::Log(handler) => handler.handle(ctx, items).await,
            Sink::File(handler) => handler.handle(ctx, items).await,
        };
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        record_batch_handled(self.name, count, elapsed_ms, result.is_ok());
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .update(count, elapsed_ms, result.is_ok());
        result
    }
}
