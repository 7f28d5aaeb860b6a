//! Tokens Module
//!
//! Boundary with the token connectors that report pools created on the ledger.

mod plugin;
pub use plugin::{TokensCallbacks, TokensPlugin};
