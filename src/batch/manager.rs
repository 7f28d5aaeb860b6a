//! Batch Manager Contract
//!
//! The batch manager accumulates sealed messages, groups them into batches
//! and hands each batch to the dispatcher registered for its message type.
//! The grouping and flush policy lives with the batch manager; this module
//! only defines the registration contract dispatchers rely on.

use crate::{Batch, MessageType, context::Context, error::Result};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Batching options supplied by a dispatcher at registration
///
/// # Fields
/// - `batch_max_size`: Maximum number of messages per batch
/// - `batch_timeout`: How long a partial batch waits before it is sealed
/// - `dispose_timeout`: How long an idle batch agent lives before disposal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub batch_max_size: usize,
    pub batch_timeout: Duration,
    pub dispose_timeout: Duration,
}

/// Callback invoked with each sealed batch.
///
/// An error tells the batch manager the batch was not dispatched; retry and
/// backoff are its responsibility.
pub type DispatchHandler = Arc<dyn Fn(Context, Batch) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Registration surface of the batch manager
pub trait BatchManager: Send + Sync {
    /// Route batches of `msg_type` messages to `handler`, batched per `options`
    fn register_dispatcher(&self, msg_type: MessageType, handler: DispatchHandler, options: BatchOptions);
}
