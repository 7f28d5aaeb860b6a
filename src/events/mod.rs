//! Events Module
//!
//! Confirmation of ledger notifications into local state:
//! - Token pools created on the ledger are validated and confirmed or rejected
//! - Outcomes of submitted ledger transactions update operations and transactions

mod manager;

#[cfg(test)]
mod tests;

pub use manager::EventManager;
