//! Flush - a sealed batch handed to the flush handler

use crate::FlushContext;

/// An immutable batch of buffered items plus the context active when it was sealed
#[derive(Debug, Clone)]
pub struct Flush<T> {
    context: FlushContext,
    contents: Vec<T>,
}

impl<T> Flush<T> {
    /// Seal a batch
    pub fn new(context: FlushContext, contents: Vec<T>) -> Self {
        Self { context, contents }
    }

    pub fn context(&self) -> &FlushContext {
        &self.context
    }

    pub fn contents(&self) -> &[T] {
        &self.contents
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Consume the flush, yielding its context and contents
    pub fn into_parts(self) -> (FlushContext, Vec<T>) {
        (self.context, self.contents)
    }
}
