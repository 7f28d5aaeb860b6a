//! Ledger Integration Module
//!
//! This module defines the boundary with the ledger that anchors batches:
//! - Submission of batch pins referencing stored payloads
//! - Callbacks through which the ledger reports the outcome of submissions

mod plugin;
pub use plugin::{BatchPin, LedgerCallbacks, LedgerPlugin};
