//! FlushContext - cancellation, deadline and correlation data carried by a flush
//!
//! Every flush is sealed with the context active at seal time: the caller's context for
//! size-triggered flushes, the buffer's background context for interval flushes, and the
//! shutdown deadline context for the final drain.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Span;

/// Context passed alongside every flush
#[derive(Clone)]
pub struct FlushContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    labels: Arc<BTreeMap<String, String>>,
    span: Span,
}

impl FlushContext {
    /// Root context: never cancelled unless `cancel` is called, no deadline
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            labels: Arc::new(BTreeMap::new()),
            span: Span::none(),
        }
    }

    /// Derive a child that is cancelled with this context but can be cancelled on its own
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            ..self.clone()
        }
    }

    /// Derive a child whose deadline is at most `timeout` from now
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            ..self.child()
        }
    }

    /// Attach a label (exported as a `key:value` stat tag)
    pub fn with_label(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut labels = (*self.labels).clone();
        labels.insert(key.into(), value.into());
        Self {
            labels: Arc::new(labels),
            ..self.clone()
        }
    }

    /// Attach the span flushes sealed with this context are correlated with
    pub fn with_span(&self, span: Span) -> Self {
        Self {
            span,
            ..self.clone()
        }
    }

    /// Cancel this context and every context derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel this context when the returned guard is dropped
    pub fn cancel_on_drop(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }

    /// Whether the context is cancelled or past its deadline
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` without one
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Labels rendered as `key:value` tags
    pub fn tags(&self) -> Vec<String> {
        self.labels
            .iter()
            .map(|(key, value)| format!("{key}:{value}"))
            .collect()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for FlushContext {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for FlushContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushContext")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .field("labels", &self.labels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_not_done() {
        let ctx = FlushContext::background();
        assert!(!ctx.is_done());
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let parent = FlushContext::background();
        let child = parent.child();
        let grandchild = child.with_timeout(Duration::from_secs(60));

        parent.cancel();
        assert!(child.is_done());
        assert!(grandchild.is_done());
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = FlushContext::background();
        let child = parent.child();
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[test]
    fn test_with_timeout_keeps_earlier_parent_deadline() {
        let parent = FlushContext::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn test_drop_guard_cancels() {
        let ctx = FlushContext::background().child();
        {
            let _guard = ctx.cancel_on_drop();
        }
        assert!(ctx.is_done());
    }

    #[test]
    fn test_labels_render_as_tags() {
        let ctx = FlushContext::background()
            .with_label("tenant", "acme")
            .with_label("region", "eu");
        assert_eq!(ctx.tags(), vec!["region:eu".to_string(), "tenant:acme".to_string()]);
        // deriving does not mutate the original
        assert!(FlushContext::background().labels().is_empty());
    }

    #[tokio::test]
    async fn test_done_resolves_on_deadline() {
        let ctx = FlushContext::background().with_timeout(Duration::from_millis(20));
        tokio::time::timeout(Duration::from_secs(2), ctx.done())
            .await
            .expect("deadline should fire");
        assert!(ctx.is_done());
    }
}
