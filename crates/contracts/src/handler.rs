//! FlushHandler trait - the user-supplied batch consumer
//!
//! Invoked once per flush on a dedicated worker. Errors never reach the producer;
//! they are routed to the buffer's optional errors sink.

use std::future::Future;

use crate::{AutoflushError, FlushContext};

/// Batch handler
///
/// All handler implementations must implement this trait. Plain async closures
/// `Fn(FlushContext, Vec<T>) -> impl Future<Output = Result<(), AutoflushError>>`
/// implement it as well.
#[trait_variant::make(FlushHandler: Send)]
pub trait LocalFlushHandler<T> {
    /// Handle one sealed batch
    ///
    /// `items` is never empty. Honoring cancellation of `ctx` is up to the handler.
    async fn handle(&self, ctx: FlushContext, items: Vec<T>) -> Result<(), AutoflushError>;
}

impl<T, F, Fut> FlushHandler<T> for F
where
    F: Fn(FlushContext, Vec<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), AutoflushError>> + Send,
{
    fn handle(
        &self,
        ctx: FlushContext,
        items: Vec<T>,
    ) -> impl Future<Output = Result<(), AutoflushError>> + Send {
        (self)(ctx, items)
    }
}
