//! Async I/O adapters.

mod progress;

pub use crate::progress::ProgressReader;
