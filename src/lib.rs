//! Off-chain core of a multi-party data exchange: messages are sealed and
//! grouped into batches, each batch is published to public storage and pinned
//! on a ledger, and ledger notifications are confirmed back into local state.
//!
//! Storage, ledger, token connector and persistence backends are plugins
//! behind the traits in their modules.

pub mod types; // Messages, batches, transactions, operations, token pools, events.
pub mod error; // Error taxonomy shared by the core and the plugins.
pub mod context; // Cancellation, deadlines and atomic-group scope.
pub mod config; // Configuration loading.
pub mod batch; // Registration contract with the batch manager.
pub mod storage; // Public storage plugin boundary.
pub mod ledger; // Ledger plugin boundary.
pub mod tokens; // Token connector boundary.
pub mod database; // Persistence plugin boundary and bundled backends.
pub mod validation; // Validation of ledger-reported token pools.
pub mod broadcast; // Message ingress and batch dispatch.
pub mod events; // Confirmation of ledger notifications.

#[cfg(test)]
mod test_utils;

// Re-export commonly used types and entry points for easier access.
pub use types::*;
pub use config::Config;
pub use context::Context;
pub use error::{Error, Result};
pub use broadcast::BroadcastManager;
pub use events::EventManager;
