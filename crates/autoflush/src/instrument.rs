//! Instrumentation hooks - optional stats and tracer, no-ops when absent

use std::sync::Arc;
use std::time::Instant;

use contracts::{millis, AutoflushError, FlushContext, StatsCollector, TraceFinisher, Tracer};

pub const METRIC_ADD: &str = "autoflush.add";
pub const METRIC_ADD_ELAPSED: &str = "autoflush.add.elapsed";
pub const METRIC_ADD_MANY: &str = "autoflush.add_many";
pub const METRIC_ADD_MANY_ITEM_COUNT: &str = "autoflush.add_many.item_count";
pub const METRIC_ADD_MANY_ELAPSED: &str = "autoflush.add_many.elapsed";
pub const METRIC_FLUSH: &str = "autoflush.flush";
pub const METRIC_FLUSH_ITEM_COUNT: &str = "autoflush.flush.item_count";
pub const METRIC_FLUSH_QUEUE_LENGTH: &str = "autoflush.flush.queue_length";
pub const METRIC_FLUSH_ENQUEUE_ELAPSED: &str = "autoflush.flush.enqueue.elapsed";
pub const METRIC_FLUSH_HANDLER: &str = "autoflush.flush.handler";
pub const METRIC_FLUSH_HANDLER_ELAPSED: &str = "autoflush.flush.handler.elapsed";
pub const METRIC_BUFFER_LENGTH: &str = "autoflush.buffer.length";

/// Which bracketed operation a span covers
#[derive(Debug, Clone, Copy)]
pub(crate) enum Span {
    Add,
    AddMany,
    QueueFlush,
}

/// Stats collector and tracer shared by the buffer and its workers
#[derive(Clone, Default)]
pub(crate) struct Instruments {
    pub(crate) stats: Option<Arc<dyn StatsCollector>>,
    pub(crate) tracer: Option<Arc<dyn Tracer>>,
}

impl Instruments {
    pub(crate) fn count(&self, ctx: &FlushContext, name: &str, value: usize) {
        if let Some(stats) = &self.stats {
            let _ = stats.count(name, value as i64, &ctx.tags());
        }
    }

    pub(crate) fn gauge(&self, ctx: &FlushContext, name: &str, value: f64) {
        if let Some(stats) = &self.stats {
            let _ = stats.gauge(name, value, &ctx.tags());
        }
    }

    /// Report time since `start` as a gauge, a timing and a distribution sample
    pub(crate) fn elapsed(&self, ctx: &FlushContext, name: &str, start: Instant) {
        if let Some(stats) = &self.stats {
            let elapsed = start.elapsed();
            let tags = ctx.tags();
            let _ = stats.gauge(name, millis(elapsed), &tags);
            let _ = stats.time_in_milliseconds(name, elapsed, &tags);
            let _ = stats.distribution(name, millis(elapsed), &tags);
        }
    }

    pub(crate) fn start(&self, ctx: &FlushContext, span: Span) -> Option<Box<dyn TraceFinisher>> {
        let tracer = self.tracer.as_ref()?;
        Some(match span {
            Span::Add => tracer.start_add(ctx),
            Span::AddMany => tracer.start_add_many(ctx),
            Span::QueueFlush => tracer.start_queue_flush(ctx),
        })
    }

    /// Open the handler span, yielding the context the handler runs under
    pub(crate) fn start_flush(
        &self,
        ctx: FlushContext,
    ) -> (FlushContext, Option<Box<dyn TraceFinisher>>) {
        match &self.tracer {
            Some(tracer) => {
                let (derived, finisher) = tracer.start_flush(&ctx);
                (derived, Some(finisher))
            }
            None => (ctx, None),
        }
    }
}

pub(crate) fn finish(finisher: Option<Box<dyn TraceFinisher>>, err: Option<&AutoflushError>) {
    if let Some(finisher) = finisher {
        finisher.finish(err);
    }
}
