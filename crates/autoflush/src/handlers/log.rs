//! LogHandler - logs a summary of every flush via tracing

use contracts::{AutoflushError, FlushContext, FlushHandler};
use tracing::{info, instrument};

/// Handler that logs batch summaries, for debugging and dry runs
#[derive(Debug, Clone)]
pub struct LogHandler {
    name: String,
}

impl LogHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Send> FlushHandler<T> for LogHandler {
    #[instrument(
        name = "log_handler_handle",
        skip(self, ctx, items),
        fields(handler = %self.name, items = items.len())
    )]
    async fn handle(&self, ctx: FlushContext, items: Vec<T>) -> Result<(), AutoflushError> {
        info!(
            handler = %self.name,
            items = items.len(),
            tags = ?ctx.tags(),
            remaining_ms = ctx.remaining().map(|d| d.as_millis() as u64),
            "Flush received"
        );
        Ok(())
    }
}
