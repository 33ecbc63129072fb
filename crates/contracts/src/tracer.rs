//! Tracer trait - optional span hooks around buffer operations

use crate::{AutoflushError, FlushContext};

/// Closes a span opened by a [`Tracer`]
pub trait TraceFinisher: Send {
    fn finish(self: Box<Self>, err: Option<&AutoflushError>);
}

/// Span hooks for the insertion path and flush execution
pub trait Tracer: Send + Sync {
    /// Brackets a single `add`
    fn start_add(&self, ctx: &FlushContext) -> Box<dyn TraceFinisher>;

    /// Brackets an `add_many`
    fn start_add_many(&self, ctx: &FlushContext) -> Box<dyn TraceFinisher>;

    /// Brackets the submission of a sealed flush to the queue
    fn start_queue_flush(&self, ctx: &FlushContext) -> Box<dyn TraceFinisher>;

    /// Brackets handler execution
    ///
    /// The returned context is the one handed to the handler, so the execution span
    /// can be correlated with the producer span carried by `ctx`.
    fn start_flush(&self, ctx: &FlushContext) -> (FlushContext, Box<dyn TraceFinisher>);
}
