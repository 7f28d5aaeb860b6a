use crate::{Bytes32, context::Context, error::Result};
use async_trait::async_trait;

/// Durable off-chain storage for batch payloads
///
/// Implementations decide whether publishing the same bytes twice yields the
/// same reference; the dispatch pipeline accepts either.
#[async_trait]
pub trait StoragePlugin: Send + Sync {
    /// Plugin name, recorded as the owner of storage operations
    fn name(&self) -> &str;

    /// Publish a payload
    ///
    /// # Returns
    /// The content reference of the stored payload and the storage-specific
    /// identifier used to track the upload
    async fn publish_data(&self, ctx: &Context, payload: Vec<u8>) -> Result<(Bytes32, String)>;
}
