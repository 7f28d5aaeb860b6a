use crate::{
    Batch, Bytes32, Event, Message, Operation, TokenPool, Transaction,
    context::Context,
    error::Result,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Work executed inside one atomic group. It receives the group-scoped
/// context, which must be passed to every database call made inside it.
pub type GroupFn<'a> = Box<dyn FnOnce(Context) -> BoxFuture<'a, Result<()>> + Send + 'a>;

/// Field patch applied to a stored batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchUpdate {
    pub payload_ref: Option<Bytes32>,
}

impl BatchUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_payload_ref(mut self, payload_ref: Bytes32) -> Self {
        self.payload_ref = Some(payload_ref);
        self
    }

    pub fn apply(&self, batch: &mut Batch) {
        if let Some(payload_ref) = self.payload_ref {
            batch.payload_ref = Some(payload_ref);
        }
    }
}

/// Transactional store for the domain records
///
/// Upserts called with `allow_existing = false` accept either a new record or
/// an idempotent replay of the stored one; anything else is a conflict.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run `work` as one atomic unit. Either every write made through the
    /// group context commits, or none does. Called with a context that is
    /// already inside a group, the work joins that group.
    async fn run_atomic<'a>(&'a self, ctx: &'a Context, work: GroupFn<'a>) -> Result<()>;

    /// # Returns
    /// * `Err(Error::HashMismatch)` if `allow_existing` is false and a message
    ///   with the same id but a different hash is stored
    async fn upsert_message(&self, ctx: &Context, msg: &Message, allow_existing: bool) -> Result<()>;

    async fn get_message(&self, ctx: &Context, id: Uuid) -> Result<Option<Message>>;

    async fn upsert_batch(&self, ctx: &Context, batch: &Batch) -> Result<()>;

    /// # Returns
    /// * `Err(Error::NotFound)` if no batch with that id is stored
    async fn update_batch(&self, ctx: &Context, id: Uuid, update: &BatchUpdate) -> Result<()>;

    async fn get_batch(&self, ctx: &Context, id: Uuid) -> Result<Option<Batch>>;

    /// # Returns
    /// * `Err(Error::HashMismatch)` if `allow_existing` is false and a
    ///   transaction with the same id but a different hash is stored
    async fn upsert_transaction(&self, ctx: &Context, tx: &Transaction, allow_existing: bool) -> Result<()>;

    async fn get_transaction(&self, ctx: &Context, id: Uuid) -> Result<Option<Transaction>>;

    /// Insert or update an operation. An update that would move a finished
    /// operation to a different status is ignored.
    async fn upsert_operation(&self, ctx: &Context, op: &Operation) -> Result<()>;

    async fn get_operation(&self, ctx: &Context, id: Uuid) -> Result<Option<Operation>>;

    /// Operations owned by `plugin` and tracked under `backend_id`
    async fn get_operations_by_backend_id(
        &self,
        ctx: &Context,
        plugin: &str,
        backend_id: &str,
    ) -> Result<Vec<Operation>>;

    /// Insert or update a token pool, keyed by namespace and name.
    ///
    /// # Returns
    /// * `Err(Error::IdentityMismatch)` if `allow_existing` is false and the
    ///   stored pool of that name has a different id
    async fn upsert_token_pool(&self, ctx: &Context, pool: &TokenPool, allow_existing: bool) -> Result<()>;

    async fn get_token_pool(&self, ctx: &Context, namespace: &str, name: &str) -> Result<Option<TokenPool>>;

    /// Append an event. Events are never updated.
    async fn insert_event(&self, ctx: &Context, event: &Event) -> Result<()>;

    /// Events of a namespace in insertion order
    async fn get_events(&self, ctx: &Context, namespace: &str) -> Result<Vec<Event>>;
}
