//! SpanTracer - `Tracer` backed by `tracing` spans

use contracts::{AutoflushError, FlushContext, TraceFinisher, Tracer};
use tracing::{field, info_span, warn, Span};

/// Opens one span per bracketed buffer operation
///
/// Spans are children of the span carried by the context, so a flush executed on a
/// worker shows up under the producer call that sealed it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanTracer;

impl SpanTracer {
    pub fn new() -> Self {
        Self
    }
}

struct SpanFinisher {
    span: Span,
}

impl TraceFinisher for SpanFinisher {
    fn finish(self: Box<Self>, err: Option<&AutoflushError>) {
        match err {
            Some(e) => {
                self.span.record("outcome", "error");
                self.span.record("error", field::display(e));
                self.span.in_scope(|| warn!(error = %e, "operation failed"));
            }
            None => {
                self.span.record("outcome", "ok");
            }
        }
    }
}

fn finisher(span: Span) -> Box<dyn TraceFinisher> {
    Box::new(SpanFinisher { span })
}

impl Tracer for SpanTracer {
    fn start_add(&self, ctx: &FlushContext) -> Box<dyn TraceFinisher> {
        finisher(info_span!(
            parent: ctx.span(),
            "autoflush.add",
            tags = ?ctx.tags(),
            outcome = field::Empty,
            error = field::Empty
        ))
    }

    fn start_add_many(&self, ctx: &FlushContext) -> Box<dyn TraceFinisher> {
        finisher(info_span!(
            parent: ctx.span(),
            "autoflush.add_many",
            tags = ?ctx.tags(),
            outcome = field::Empty,
            error = field::Empty
        ))
    }

    fn start_queue_flush(&self, ctx: &FlushContext) -> Box<dyn TraceFinisher> {
        finisher(info_span!(
            parent: ctx.span(),
            "autoflush.queue_flush",
            tags = ?ctx.tags(),
            outcome = field::Empty,
            error = field::Empty
        ))
    }

    fn start_flush(&self, ctx: &FlushContext) -> (FlushContext, Box<dyn TraceFinisher>) {
        let span = info_span!(
            parent: ctx.span(),
            "autoflush.flush",
            tags = ?ctx.tags(),
            outcome = field::Empty,
            error = field::Empty
        );
        (ctx.with_span(span.clone()), finisher(span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_flush_keeps_labels() {
        let tracer = SpanTracer::new();
        let ctx = FlushContext::background().with_label("tenant", "acme");
        let (derived, finisher) = tracer.start_flush(&ctx);
        assert_eq!(derived.labels(), ctx.labels());
        finisher.finish(None);
    }

    #[test]
    fn test_finish_with_error() {
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry());
        let tracer = SpanTracer::new();
        let ctx = FlushContext::background();
        tracer
            .start_queue_flush(&ctx)
            .finish(Some(&AutoflushError::QueueClosed { items: 3 }));
        tracer.start_add(&ctx).finish(None);
        tracer.start_add_many(&ctx).finish(None);
    }
}
