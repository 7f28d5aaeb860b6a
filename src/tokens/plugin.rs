use crate::{JsonObject, TokenPool, context::Context, error::Result};
use async_trait::async_trait;

/// Token connector observing the ledger
pub trait TokensPlugin: Send + Sync {
    fn name(&self) -> &str;
}

/// Notifications a tokens plugin delivers back into the core
#[async_trait]
pub trait TokensCallbacks: Send + Sync {
    /// A token pool was created on the ledger.
    ///
    /// Malformed or conflicting pools are rejected and recorded, not returned
    /// as errors. An error means the notification could not be recorded and
    /// should be redelivered.
    async fn token_pool_created(
        &self,
        ctx: &Context,
        plugin: &dyn TokensPlugin,
        pool: TokenPool,
        tracking_id: &str,
        info: JsonObject,
    ) -> Result<()>;
}
