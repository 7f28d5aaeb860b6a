//! Database Module
//!
//! Transactional persistence for messages, batches, transactions, operations,
//! token pools and events. The core only talks to the [`Database`] trait;
//! two backends ship with the crate:
//! - `MemoryDatabase`: everything in process memory
//! - `SqliteDatabase`: SQLite through sqlx

mod memory;
mod plugin;
mod rules;
mod sqlite;


pub use memory::MemoryDatabase;
pub use plugin::{BatchUpdate, Database, GroupFn};
pub use sqlite::SqliteDatabase;
