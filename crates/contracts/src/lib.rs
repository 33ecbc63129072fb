//! # Contracts
//!
//! Frozen interface contracts shared by every crate in the workspace.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Flush Model
//! - Items are opaque (`T`); the pipeline never inspects them
//! - A `Flush` is sealed once and never mutated
//! - Every flush carries the `FlushContext` active when it was sealed

mod config;
mod context;
mod error;
mod flush;
mod handler;
mod stats;
mod tracer;

pub use config::*;
pub use context::FlushContext;
pub use error::*;
pub use flush::Flush;
pub use handler::{FlushHandler, LocalFlushHandler};
pub use stats::{millis, StatsCollector, StatsError};
pub use tracer::{TraceFinisher, Tracer};
