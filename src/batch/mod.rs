//! Batch Module
//!
//! Registration contract between message dispatchers and the batch manager
//! that seals messages into batches.

mod manager;

pub use manager::{BatchManager, BatchOptions, DispatchHandler};
