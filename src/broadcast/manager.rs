//! Broadcast Manager Module
//!
//! Sends broadcast and definition messages to every member of the network.
//!
//! # Architecture Flow
//! 1. `broadcast_message` seals a message and stores it; the batch manager
//!    picks it up from there and groups it into a batch
//! 2. The batch manager hands the sealed batch to `dispatch_batch`
//! 3. The serialized batch is published to public storage (outside any
//!    database transaction)
//! 4. In one atomic group: the pin transaction is recorded, the batch gets
//!    its payload reference, the pin is submitted to the ledger and the
//!    per-message operations are recorded

use crate::{
    Batch, Bytes32, Message, MessageType, OpStatus, OpType, Operation, Transaction,
    batch::{BatchManager, BatchOptions, DispatchHandler},
    config::BroadcastConfig,
    context::Context,
    database::{BatchUpdate, Database},
    error::{Error, Result},
    ledger::{BatchPin, LedgerPlugin},
    storage::StoragePlugin,
};
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, info};

/// Dispatcher for broadcast and definition batches
pub struct BroadcastManager {
    database: Arc<dyn Database>,
    ledger: Arc<dyn LedgerPlugin>,
    storage: Arc<dyn StoragePlugin>,
    options: BatchOptions,
}

/// Collects the collaborators of a [`BroadcastManager`]
#[derive(Default)]
pub struct BroadcastManagerBuilder {
    database: Option<Arc<dyn Database>>,
    ledger: Option<Arc<dyn LedgerPlugin>>,
    storage: Option<Arc<dyn StoragePlugin>>,
    batch_manager: Option<Arc<dyn BatchManager>>,
    options: Option<BatchOptions>,
}

impl BroadcastManagerBuilder {
    pub fn database(mut self, database: Arc<dyn Database>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn LedgerPlugin>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StoragePlugin>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn batch_manager(mut self, batch_manager: Arc<dyn BatchManager>) -> Self {
        self.batch_manager = Some(batch_manager);
        self
    }

    /// Batching options to register with. Defaults to [`BroadcastConfig::default`].
    pub fn options(mut self, options: BatchOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Creates the manager and registers it as the dispatcher for broadcast
    /// and definition messages
    ///
    /// # Returns
    /// * `Err(Error::MissingDependency)` if a collaborator was not supplied
    pub fn build(self) -> Result<Arc<BroadcastManager>> {
        let database = self.database.ok_or(Error::MissingDependency("database"))?;
        let ledger = self.ledger.ok_or(Error::MissingDependency("ledger"))?;
        let storage = self.storage.ok_or(Error::MissingDependency("storage"))?;
        let batch_manager = self.batch_manager.ok_or(Error::MissingDependency("batch manager"))?;
        let options = self
            .options
            .unwrap_or_else(|| BatchOptions::from(&BroadcastConfig::default()));

        let bm = Arc::new(BroadcastManager {
            database,
            ledger,
            storage,
            options,
        });

        for msg_type in [MessageType::Broadcast, MessageType::Definition] {
            batch_manager.register_dispatcher(msg_type, bm.dispatcher(), options);
        }
        info!(
            "Broadcast dispatcher registered: batch_max_size={}, batch_timeout={:?}, dispose_timeout={:?}",
            options.batch_max_size, options.batch_timeout, options.dispose_timeout
        );
        Ok(bm)
    }
}

impl BroadcastManager {
    pub fn builder() -> BroadcastManagerBuilder {
        BroadcastManagerBuilder::default()
    }

    pub fn options(&self) -> BatchOptions {
        self.options
    }

    fn dispatcher(self: &Arc<Self>) -> DispatchHandler {
        let bm = Arc::clone(self);
        Arc::new(move |ctx: Context, batch: Batch| {
            let bm = Arc::clone(&bm);
            async move { bm.dispatch_batch(&ctx, batch).await }.boxed()
        })
    }

    /// Seal a message and store it for batching
    ///
    /// Storing the message is what makes the batch manager pick it up.
    /// Replaying an already stored message is a no-op.
    ///
    /// # Returns
    /// * `Err(Error::Seal)` if the message cannot be sealed
    /// * `Err` from the database if the message cannot be stored
    pub async fn broadcast_message(&self, ctx: &Context, msg: &mut Message) -> Result<()> {
        msg.seal()?;
        debug!("Sealed message {} ({:?})", msg.header.id, msg.hash);

        self.database.upsert_message(ctx, msg, false).await
    }

    /// Dispatch a sealed batch
    ///
    /// Safe to call again with the same batch after a failure or restart:
    /// the transaction and operations converge on the records written by
    /// the earlier attempt. Errors are returned untouched; retrying is up to
    /// the batch manager.
    pub async fn dispatch_batch(&self, ctx: &Context, mut batch: Batch) -> Result<()> {
        // Serialize the full payload, which the batch manager already sealed
        let payload = serde_json::to_vec(&batch)?;

        // Publish to public storage to get the payload reference. This happens
        // outside the database transaction, so a failure further down leaves an
        // unreferenced payload behind.
        let (payload_ref, storage_id) = ctx.run(self.storage.publish_data(ctx, payload)).await?;
        batch.payload_ref = Some(payload_ref);
        debug!(
            "Batch {} published to {} as {:?} ({})",
            batch.id,
            self.storage.name(),
            payload_ref,
            storage_id
        );

        let batch = &batch;
        let storage_id = storage_id.as_str();
        self.database
            .run_atomic(
                ctx,
                Box::new(move |ctx: Context| {
                    async move {
                        self.submit_tx_and_update_db(&ctx, batch, payload_ref, storage_id)
                            .await
                    }
                    .boxed()
                }),
            )
            .await?;

        info!(
            "Batch {} pinned with {} messages",
            batch.id,
            batch.payload.messages.len()
        );
        Ok(())
    }

    async fn submit_tx_and_update_db(
        &self,
        ctx: &Context,
        batch: &Batch,
        payload_ref: Bytes32,
        storage_id: &str,
    ) -> Result<()> {
        // Step 1: Record the transaction, to collect submission updates.
        // It should be new, or an idempotent replay.
        let tx = Transaction::for_batch(batch)?;
        self.database.upsert_transaction(ctx, &tx, false).await?;

        // Step 2: Store the payload reference on the batch
        self.database
            .update_batch(ctx, batch.id, &BatchUpdate::new().set_payload_ref(payload_ref))
            .await?;

        // Step 3: Pin the batch on the ledger
        let pin = BatchPin {
            transaction_id: tx.id,
            batch_id: batch.id,
            batch_payload_ref: payload_ref,
        };
        let ledger_id = self.ledger.submit_batch_pin(ctx, &batch.author, &pin).await?;
        debug!("Batch {} submitted to {} as {}", batch.id, self.ledger.name(), ledger_id);

        // Step 4: Record the operations for each message
        for msg in &batch.payload.messages {
            // The pending ledger transaction
            let op = Operation::new_message_op(
                self.ledger.name(),
                &ledger_id,
                msg,
                tx.id,
                OpType::BlockchainBatchPin,
                OpStatus::Pending,
                None,
            );
            self.database.upsert_operation(ctx, &op).await?;

            // The completed upload; it was performed synchronously above
            let op = Operation::new_message_op(
                self.storage.name(),
                storage_id,
                msg,
                tx.id,
                OpType::PublicStorageBatchBroadcast,
                OpStatus::Succeeded,
                None,
            );
            self.database.upsert_operation(ctx, &op).await?;
        }

        Ok(())
    }
}
