//! Validation Module
//!
//! This module validates token pools reported by the ledger before they are
//! confirmed. A failed check is a rejection reason, not an error: the caller
//! records it and carries on.

mod validator;
pub use validator::{PoolRejection, PoolValidator};
