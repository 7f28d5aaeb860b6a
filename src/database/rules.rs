//! Conflict rules shared by the database backends. Each function looks at the
//! stored record (if any) and the incoming one and decides what gets written.

use crate::{
    Message, Operation, TokenPool, Transaction,
    error::{Error, Result},
};
use chrono::Utc;
use tracing::debug;

/// Whether an incoming message should be written over `existing`
pub(crate) fn message_write(existing: Option<&Message>, msg: &Message, allow_existing: bool) -> Result<bool> {
    match existing {
        None => Ok(true),
        Some(_) if allow_existing => Ok(true),
        Some(stored) if stored.hash == msg.hash => Ok(false),
        Some(stored) => Err(Error::HashMismatch {
            entity: "message",
            id: msg.header.id,
            stored: stored.hash.unwrap_or_default(),
            received: msg.hash.unwrap_or_default(),
        }),
    }
}

/// Whether an incoming transaction should be written over `existing`
pub(crate) fn transaction_write(
    existing: Option<&Transaction>,
    tx: &Transaction,
    allow_existing: bool,
) -> Result<bool> {
    match existing {
        None => Ok(true),
        Some(_) if allow_existing => Ok(true),
        Some(stored) if stored.hash == tx.hash => Ok(false),
        Some(stored) => Err(Error::HashMismatch {
            entity: "transaction",
            id: tx.id,
            stored: stored.hash,
            received: tx.hash,
        }),
    }
}

/// The record to store for an incoming operation, or `None` to keep `existing`
pub(crate) fn operation_write(existing: Option<&Operation>, op: &Operation) -> Option<Operation> {
    match existing {
        None => Some(op.clone()),
        Some(stored) if !stored.status.can_transition_to(op.status) => {
            debug!(
                "Ignoring {:?} -> {:?} for finished operation {}",
                stored.status, op.status, stored.id
            );
            None
        }
        Some(stored) => {
            let mut merged = op.clone();
            merged.created = stored.created;
            merged.updated = Some(Utc::now());
            Some(merged)
        }
    }
}

/// Checks the identity of an incoming pool against the stored pool of the same name
pub(crate) fn token_pool_check(existing: Option<&TokenPool>, pool: &TokenPool, allow_existing: bool) -> Result<()> {
    match existing {
        Some(stored) if !allow_existing && stored.id != pool.id => Err(Error::IdentityMismatch {
            namespace: pool.namespace.clone(),
            name: pool.name.clone(),
            stored: stored.id,
            received: pool.id,
        }),
        _ => Ok(()),
    }
}
