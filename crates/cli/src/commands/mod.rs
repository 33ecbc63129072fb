//! Command implementations.

mod run;
mod validate;

pub use run::run_buffer;
pub use validate::run_validate;
