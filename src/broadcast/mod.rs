//! Broadcast Module
//!
//! Message ingress and the batch dispatch pipeline for messages sent to every
//! member: public storage publish, ledger pin, operation tracking.

mod manager;


pub use manager::{BroadcastManager, BroadcastManagerBuilder};
