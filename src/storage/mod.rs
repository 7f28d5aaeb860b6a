//! Public Storage Module
//!
//! Off-chain storage that batch payloads are published to before they are
//! pinned on the ledger.

mod plugin;
pub use plugin::StoragePlugin;
