//! Built-in flush handlers
//!
//! Contains LogHandler and FileHandler.

mod file;
mod log;

pub use self::file::{FileHandler, FileHandlerConfig};
pub use self::log::LogHandler;
