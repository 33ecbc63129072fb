//! # Autoflush
//!
//! 自动刷新缓冲模块。
//!
//! 负责：
//! - 累积任意类型的条目，按数量阈值或固定间隔封装为 `Flush`
//! - 通过有界队列与固定数量的 worker 调用用户提供的 handler
//! - 在关闭时于宽限期内排空缓冲、队列与 worker

pub mod buffer;
mod dispatch;
pub mod handlers;
pub mod instrument;
mod shutdown;
pub mod store;

pub use buffer::{Buffer, BufferBuilder, BufferSettings};
pub use contracts::{AutoflushConfig, AutoflushError, Flush, FlushContext, FlushHandler};
pub use handlers::{FileHandler, FileHandlerConfig, LogHandler};
pub use lifecycle::{ErrorSink, Latch, LatchState};
pub use store::ContentStore;
