use crate::{Bytes32, JsonObject, OpStatus, context::Context, error::Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ledger submission anchoring a batch payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPin {
    pub transaction_id: Uuid,
    pub batch_id: Uuid,
    pub batch_payload_ref: Bytes32,
}

/// Ledger the batch pins are written to
#[async_trait]
pub trait LedgerPlugin: Send + Sync {
    /// Plugin name, recorded as the owner of ledger operations
    fn name(&self) -> &str;

    /// Submit a batch pin signed by `author`
    ///
    /// # Returns
    /// The tracking id of the underlying ledger transaction. The outcome is
    /// reported later through [`LedgerCallbacks::transaction_update`].
    async fn submit_batch_pin(&self, ctx: &Context, author: &str, pin: &BatchPin) -> Result<String>;
}

/// Notifications a ledger plugin delivers back into the core
#[async_trait]
pub trait LedgerCallbacks: Send + Sync {
    /// A submitted transaction was mined or failed.
    ///
    /// Returning an error asks the plugin to redeliver the notification later.
    async fn transaction_update(
        &self,
        ctx: &Context,
        plugin: &dyn LedgerPlugin,
        backend_id: &str,
        status: OpStatus,
        error: Option<String>,
        info: JsonObject,
    ) -> Result<()>;
}
