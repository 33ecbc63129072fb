//! Buffer wiring for the `run` command: handler selection, producers and run statistics.

mod handler;
mod producer;
mod stats;

pub use handler::{RunHandler, SyntheticEvent};
pub use producer::{spawn_producers, ProducerConfig};
pub use stats::RunStats;
