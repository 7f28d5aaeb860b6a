//! Event Manager Module
//!
//! Turns notifications from the ledger-facing plugins into local state.
//! Notifications arrive from outside and may be malformed, conflicting or
//! replayed, so each one ends in a recorded event rather than an error. The
//! only errors returned are failures to write, which the plugin answers by
//! delivering the same notification again.

use crate::{
    Event, EventType, JsonObject, OpStatus, TokenPool, TokenPoolState, TransactionStatus,
    context::Context,
    database::Database,
    error::Result,
    ledger::{LedgerCallbacks, LedgerPlugin},
    tokens::{TokensCallbacks, TokensPlugin},
    validation::PoolValidator,
};
use async_trait::async_trait;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct EventManager {
    database: Arc<dyn Database>,
    validator: PoolValidator,
}

impl EventManager {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self {
            database,
            validator: PoolValidator::new(),
        }
    }

    /// Confirm or reject a token pool reported by a tokens plugin
    ///
    /// # Outcomes
    /// - Missing namespace or name: a `PoolRejected` event is recorded
    /// - Pool name already taken by a pool with another id: `PoolRejected`
    /// - Otherwise the pool is stored as confirmed together with a
    ///   `PoolConfirmed` event
    ///
    /// # Returns
    /// `Ok(())` for every outcome above; `Err` only when the database write
    /// itself failed
    pub async fn token_pool_created(
        &self,
        ctx: &Context,
        plugin: &dyn TokensPlugin,
        mut pool: TokenPool,
        tracking_id: &str,
        info: JsonObject,
    ) -> Result<()> {
        debug!(
            "Token pool {:?} '{}' reported by {} in ledger transaction {}",
            pool.id,
            pool.name,
            plugin.name(),
            tracking_id
        );

        if let Err(reason) = self.validator.validate(&pool) {
            info!("Rejecting token pool {:?}: {}", pool.id, reason);
            return self.reject_pool(ctx, &pool).await;
        }

        for (key, value) in info {
            pool.info.entry(key).or_insert(value);
        }
        pool.state = TokenPoolState::Confirmed;

        let confirmed = &pool;
        let result = self
            .database
            .run_atomic(
                ctx,
                Box::new(move |ctx: Context| {
                    async move {
                        self.database.upsert_token_pool(&ctx, confirmed, false).await?;
                        let event = Event::new(EventType::PoolConfirmed, &confirmed.namespace, confirmed.id);
                        self.database.insert_event(&ctx, &event).await
                    }
                    .boxed()
                }),
            )
            .await;

        match result {
            Ok(()) => {
                info!("Token pool {:?} '{}' confirmed in '{}'", pool.id, pool.name, pool.namespace);
                Ok(())
            }
            Err(err) if err.is_identity_mismatch() => {
                warn!("Rejecting token pool {:?}: {}", pool.id, err);
                self.reject_pool(ctx, &pool).await
            }
            Err(err) => Err(err),
        }
    }

    async fn reject_pool(&self, ctx: &Context, pool: &TokenPool) -> Result<()> {
        let event = Event::new(EventType::PoolRejected, &pool.namespace, pool.id);
        self.database.insert_event(ctx, &event).await
    }

    /// Apply the outcome of a ledger transaction to the operations tracking it
    ///
    /// Operations already finished keep their status. Transactions still
    /// pending move to confirmed or failed and get a matching event. An
    /// unknown `backend_id` is logged and ignored.
    pub async fn transaction_update(
        &self,
        ctx: &Context,
        plugin: &dyn LedgerPlugin,
        backend_id: &str,
        status: OpStatus,
        error: Option<String>,
        info: JsonObject,
    ) -> Result<()> {
        let plugin_name = plugin.name();
        debug!(
            "Ledger transaction {} from {} is {:?} ({} info fields)",
            backend_id,
            plugin_name,
            status,
            info.len()
        );

        let tx_status = match status {
            OpStatus::Pending => None,
            OpStatus::Succeeded => Some(TransactionStatus::Confirmed),
            OpStatus::Failed => Some(TransactionStatus::Failed),
        };
        let error = &error;

        self.database
            .run_atomic(
                ctx,
                Box::new(move |ctx: Context| {
                    async move {
                        let ops = self
                            .database
                            .get_operations_by_backend_id(&ctx, plugin_name, backend_id)
                            .await?;
                        if ops.is_empty() {
                            warn!("No operations tracked by {} under {}", plugin_name, backend_id);
                            return Ok(());
                        }

                        let mut transactions: Vec<Uuid> = Vec::new();
                        for mut op in ops {
                            if !op.status.can_transition_to(status) {
                                warn!(
                                    "Operation {} is already {:?}, ignoring {:?}",
                                    op.id, op.status, status
                                );
                                continue;
                            }
                            op.status = status;
                            op.error = error.clone();
                            self.database.upsert_operation(&ctx, &op).await?;
                            if !transactions.contains(&op.transaction) {
                                transactions.push(op.transaction);
                            }
                        }

                        let Some(tx_status) = tx_status else {
                            return Ok(());
                        };
                        for id in transactions {
                            let Some(mut tx) = self.database.get_transaction(&ctx, id).await? else {
                                warn!("Transaction {} of ledger transaction {} not found", id, backend_id);
                                continue;
                            };
                            if tx.status != TransactionStatus::Pending {
                                continue;
                            }
                            tx.status = tx_status;
                            self.database.upsert_transaction(&ctx, &tx, true).await?;

                            let event_type = match tx_status {
                                TransactionStatus::Failed => EventType::TransactionFailed,
                                _ => EventType::TransactionConfirmed,
                            };
                            let event = Event::new(event_type, &tx.subject.namespace, Some(tx.id));
                            self.database.insert_event(&ctx, &event).await?;
                            info!("Transaction {} is {}", tx.id, tx_status.as_str());
                        }
                        Ok(())
                    }
                    .boxed()
                }),
            )
            .await
    }
}

#[async_trait]
impl TokensCallbacks for EventManager {
    async fn token_pool_created(
        &self,
        ctx: &Context,
        plugin: &dyn TokensPlugin,
        pool: TokenPool,
        tracking_id: &str,
        info: JsonObject,
    ) -> Result<()> {
        EventManager::token_pool_created(self, ctx, plugin, pool, tracking_id, info).await
    }
}

#[async_trait]
impl LedgerCallbacks for EventManager {
    async fn transaction_update(
        &self,
        ctx: &Context,
        plugin: &dyn LedgerPlugin,
        backend_id: &str,
        status: OpStatus,
        error: Option<String>,
        info: JsonObject,
    ) -> Result<()> {
        EventManager::transaction_update(self, ctx, plugin, backend_id, status, error, info).await
    }
}
