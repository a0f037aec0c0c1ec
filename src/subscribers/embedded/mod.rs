//! # Built-in subscribers
//!
//! - [`LogWriter`]: renders events as structured `tracing` records.

mod log;

pub use log::LogWriter;
