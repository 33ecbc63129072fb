//! Layered error definitions
//!
//! Categorized by source: lifecycle / handler / queue / config

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum AutoflushError {
    // ===== Lifecycle Errors =====
    /// Start called while not in a startable state
    #[error("cannot start; already started or starting")]
    CannotStart,

    /// Stop called while not started
    #[error("cannot stop; not started")]
    CannotStop,

    // ===== Handler Errors =====
    /// Handler returned an error for a flush
    #[error("handler error: {message}")]
    Handler {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Handler panicked while processing a flush
    #[error("worker {worker_id} panicked: {message}")]
    Panicked { worker_id: usize, message: String },

    /// Interval action panicked while sealing a time-triggered flush
    #[error("interval action panicked: {message}")]
    IntervalPanicked { message: String },

    // ===== Queue Errors =====
    /// Flush submitted after the queue was closed by shutdown
    #[error("flush queue closed, {items} items discarded")]
    QueueClosed { items: usize },

    /// Worker could not be returned to the ready pool
    #[error("worker {worker_id} could not be returned to the ready pool")]
    WorkerReturn { worker_id: usize },

    // ===== Configuration Errors =====
    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    Config { field: String, message: String },

    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AutoflushError {
    /// Create a handler error from a message
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
            source: None,
        }
    }

    /// Create a handler error wrapping a source error
    pub fn handler_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Handler {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create configuration validation error
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Whether this error signals lifecycle misuse
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::CannotStart | Self::CannotStop)
    }
}
