//! In-Memory Database
//!
//! Keeps every table in process memory. Atomic groups stage their writes on a
//! private copy of the tables and swap it in on commit; writers are serialized
//! so a commit never overwrites a concurrent write.

use super::plugin::{BatchUpdate, Database, GroupFn};
use super::rules;
use crate::{
    Batch, Event, Message, Operation, TokenPool, Transaction,
    context::{Context, GroupId},
    error::{Error, Result},
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct Tables {
    messages: HashMap<Uuid, Message>,
    batches: HashMap<Uuid, Batch>,
    transactions: HashMap<Uuid, Transaction>,
    operations: HashMap<Uuid, Operation>,
    token_pools: HashMap<(String, String), TokenPool>,
    events: Vec<Event>,
}

/// Database backend holding all records in memory
#[derive(Default)]
pub struct MemoryDatabase {
    committed: Mutex<Tables>,
    /// Staged tables of the in-flight atomic group
    groups: Mutex<HashMap<GroupId, Tables>>,
    /// Held by every writer outside a group, and by a group until it finishes
    writer: Mutex<()>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    async fn write<T, F>(&self, ctx: &Context, apply: F) -> Result<T>
    where
        F: FnOnce(&mut Tables) -> Result<T> + Send,
        T: Send,
    {
        match ctx.group() {
            Some(group) => {
                let mut groups = self.groups.lock().await;
                let tables = groups.get_mut(&group).ok_or_else(|| unknown_group(group))?;
                apply(tables)
            }
            None => {
                let _writer = self.writer.lock().await;
                let mut tables = self.committed.lock().await;
                apply(&mut tables)
            }
        }
    }

    async fn read<T, F>(&self, ctx: &Context, view: F) -> Result<T>
    where
        F: FnOnce(&Tables) -> T + Send,
        T: Send,
    {
        match ctx.group() {
            Some(group) => {
                let groups = self.groups.lock().await;
                let tables = groups.get(&group).ok_or_else(|| unknown_group(group))?;
                Ok(view(tables))
            }
            None => {
                let tables = self.committed.lock().await;
                Ok(view(&tables))
            }
        }
    }
}

fn unknown_group(group: GroupId) -> Error {
    Error::Persistence(format!("atomic group {} is not active", group))
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn run_atomic<'a>(&'a self, ctx: &'a Context, work: GroupFn<'a>) -> Result<()> {
        if ctx.group().is_some() {
            return work(ctx.clone()).await;
        }
        ctx.check()?;

        let _writer = self.writer.lock().await;
        let group = GroupId::new();
        let snapshot = self.committed.lock().await.clone();
        self.groups.lock().await.insert(group, snapshot);

        let result = ctx.run(work(ctx.with_group(group))).await;
        let staged = self.groups.lock().await.remove(&group);

        match (result, staged) {
            (Ok(()), Some(tables)) => {
                *self.committed.lock().await = tables;
                debug!("Atomic group {} committed", group);
                Ok(())
            }
            (Ok(()), None) => Err(unknown_group(group)),
            (Err(err), _) => {
                debug!("Atomic group {} rolled back: {}", group, err);
                Err(err)
            }
        }
    }

    async fn upsert_message(&self, ctx: &Context, msg: &Message, allow_existing: bool) -> Result<()> {
        self.write(ctx, |t| {
            if rules::message_write(t.messages.get(&msg.header.id), msg, allow_existing)? {
                t.messages.insert(msg.header.id, msg.clone());
            }
            Ok(())
        })
        .await
    }

    async fn get_message(&self, ctx: &Context, id: Uuid) -> Result<Option<Message>> {
        self.read(ctx, |t| t.messages.get(&id).cloned()).await
    }

    async fn upsert_batch(&self, ctx: &Context, batch: &Batch) -> Result<()> {
        self.write(ctx, |t| {
            t.batches.insert(batch.id, batch.clone());
            Ok(())
        })
        .await
    }

    async fn update_batch(&self, ctx: &Context, id: Uuid, update: &BatchUpdate) -> Result<()> {
        self.write(ctx, |t| {
            let batch = t
                .batches
                .get_mut(&id)
                .ok_or(Error::NotFound { entity: "batch", id })?;
            update.apply(batch);
            Ok(())
        })
        .await
    }

    async fn get_batch(&self, ctx: &Context, id: Uuid) -> Result<Option<Batch>> {
        self.read(ctx, |t| t.batches.get(&id).cloned()).await
    }

    async fn upsert_transaction(&self, ctx: &Context, tx: &Transaction, allow_existing: bool) -> Result<()> {
        self.write(ctx, |t| {
            if rules::transaction_write(t.transactions.get(&tx.id), tx, allow_existing)? {
                t.transactions.insert(tx.id, tx.clone());
            }
            Ok(())
        })
        .await
    }

    async fn get_transaction(&self, ctx: &Context, id: Uuid) -> Result<Option<Transaction>> {
        self.read(ctx, |t| t.transactions.get(&id).cloned()).await
    }

    async fn upsert_operation(&self, ctx: &Context, op: &Operation) -> Result<()> {
        self.write(ctx, |t| {
            if let Some(record) = rules::operation_write(t.operations.get(&op.id), op) {
                t.operations.insert(record.id, record);
            }
            Ok(())
        })
        .await
    }

    async fn get_operation(&self, ctx: &Context, id: Uuid) -> Result<Option<Operation>> {
        self.read(ctx, |t| t.operations.get(&id).cloned()).await
    }

    async fn get_operations_by_backend_id(
        &self,
        ctx: &Context,
        plugin: &str,
        backend_id: &str,
    ) -> Result<Vec<Operation>> {
        self.read(ctx, |t| {
            let mut ops: Vec<Operation> = t
                .operations
                .values()
                .filter(|op| op.plugin == plugin && op.backend_id == backend_id)
                .cloned()
                .collect();
            ops.sort_by_key(|op| op.created);
            ops
        })
        .await
    }

    async fn upsert_token_pool(&self, ctx: &Context, pool: &TokenPool, allow_existing: bool) -> Result<()> {
        self.write(ctx, |t| {
            let key = (pool.namespace.clone(), pool.name.clone());
            rules::token_pool_check(t.token_pools.get(&key), pool, allow_existing)?;
            t.token_pools.insert(key, pool.clone());
            Ok(())
        })
        .await
    }

    async fn get_token_pool(&self, ctx: &Context, namespace: &str, name: &str) -> Result<Option<TokenPool>> {
        let key = (namespace.to_string(), name.to_string());
        self.read(ctx, |t| t.token_pools.get(&key).cloned()).await
    }

    async fn insert_event(&self, ctx: &Context, event: &Event) -> Result<()> {
        self.write(ctx, |t| {
            t.events.push(event.clone());
            Ok(())
        })
        .await
    }

    async fn get_events(&self, ctx: &Context, namespace: &str) -> Result<Vec<Event>> {
        self.read(ctx, |t| {
            t.events
                .iter()
                .filter(|ev| ev.namespace == namespace)
                .cloned()
                .collect()
        })
        .await
    }
}
