//! Fake plugins shared by the unit tests

use crate::{
    Batch, Bytes32, DataRef, Event, Message, MessageType, Operation, TokenPool, Transaction,
    batch::{BatchManager, BatchOptions, DispatchHandler},
    config::DatabaseConfig,
    context::Context,
    database::{BatchUpdate, Database, GroupFn, MemoryDatabase, SqliteDatabase},
    error::{Error, Result},
    ledger::{BatchPin, LedgerPlugin},
    storage::StoragePlugin,
    tokens::TokensPlugin,
};
use async_trait::async_trait;
use ethers::types::H256;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A sealed message carrying `n` data items
pub fn sealed_message(namespace: &str, n: u8) -> Message {
    let data = (0..n)
        .map(|i| DataRef {
            id: Uuid::new_v4(),
            hash: Some(H256::repeat_byte(i + 1)),
        })
        .collect();
    let mut msg = Message::new(MessageType::Broadcast, namespace, "0x12345", data);
    msg.seal().expect("seal test message");
    msg
}

/// A batch of `n` sealed messages
pub fn test_batch(namespace: &str, n: usize) -> Batch {
    let messages = (0..n).map(|_| sealed_message(namespace, 2)).collect();
    Batch::new(namespace, "0x12345", messages)
}

/// A fresh in-memory SQLite database
pub async fn sqlite_database() -> SqliteDatabase {
    SqliteDatabase::connect(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
    })
    .await
    .expect("open in-memory sqlite")
}

/// Database file in the temp directory, deleted on drop
pub struct TempDbFile(PathBuf);

impl Drop for TempDbFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
        for ext in ["db-journal", "db-wal", "db-shm"] {
            let _ = std::fs::remove_file(self.0.with_extension(ext));
        }
    }
}

/// A fresh file-backed SQLite database with a pool of `max_connections`
pub async fn file_sqlite_database(max_connections: u32) -> (SqliteDatabase, TempDbFile) {
    let path = std::env::temp_dir().join(format!("batchpin-{}.db", Uuid::new_v4()));
    let db = SqliteDatabase::connect(&DatabaseConfig {
        url: format!("sqlite://{}", path.display()),
        max_connections,
    })
    .await
    .expect("open file sqlite");
    (db, TempDbFile(path))
}

/// Storage that hands out a fresh reference for every publish
#[derive(Default)]
pub struct MockStorage {
    pub fail: AtomicBool,
    pub published: Mutex<Vec<Vec<u8>>>,
    counter: AtomicU64,
}

#[async_trait]
impl StoragePlugin for MockStorage {
    fn name(&self) -> &str {
        "ipfs"
    }

    async fn publish_data(&self, _ctx: &Context, payload: Vec<u8>) -> Result<(Bytes32, String)> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Storage("ipfs unreachable".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.published.lock().unwrap().push(payload);
        Ok((H256::from_low_u64_be(n), format!("Qm{:04}", n)))
    }
}

/// Ledger recording every submitted pin
#[derive(Default)]
pub struct MockLedger {
    pub fail: AtomicBool,
    /// Milliseconds each submission takes
    pub delay_ms: AtomicU64,
    pub submitted: Mutex<Vec<(String, BatchPin)>>,
    counter: AtomicU64,
}

#[async_trait]
impl LedgerPlugin for MockLedger {
    fn name(&self) -> &str {
        "ethereum"
    }

    async fn submit_batch_pin(&self, _ctx: &Context, author: &str, pin: &BatchPin) -> Result<String> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Ledger("transaction reverted".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.submitted.lock().unwrap().push((author.to_string(), pin.clone()));
        Ok(format!("0x{:04x}", n))
    }
}

pub struct MockTokens;

impl TokensPlugin for MockTokens {
    fn name(&self) -> &str {
        "erc1155"
    }
}

/// Batch manager that only records registrations
#[derive(Default)]
pub struct RecordingBatchManager {
    pub registrations: Mutex<Vec<(MessageType, BatchOptions)>>,
    pub handlers: Mutex<Vec<DispatchHandler>>,
}

impl BatchManager for RecordingBatchManager {
    fn register_dispatcher(&self, msg_type: MessageType, handler: DispatchHandler, options: BatchOptions) {
        self.registrations.lock().unwrap().push((msg_type, options));
        self.handlers.lock().unwrap().push(handler);
    }
}

/// Database wrapper that counts calls and fails chosen operations with "pop"
pub struct FaultyDatabase {
    pub inner: Arc<dyn Database>,
    failing: Mutex<HashSet<&'static str>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl FaultyDatabase {
    /// Wraps a fresh memory database
    pub fn new() -> Self {
        Self::wrapping(Arc::new(MemoryDatabase::new()))
    }

    pub fn wrapping(inner: Arc<dyn Database>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail_on(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn calls(&self, op: &'static str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    fn enter(&self, op: &'static str) -> Result<()> {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;
        if self.failing.lock().unwrap().contains(op) {
            return Err(Error::Persistence("pop".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Database for FaultyDatabase {
    async fn run_atomic<'a>(&'a self, ctx: &'a Context, work: GroupFn<'a>) -> Result<()> {
        self.enter("run_atomic")?;
        self.inner.run_atomic(ctx, work).await
    }

    async fn upsert_message(&self, ctx: &Context, msg: &Message, allow_existing: bool) -> Result<()> {
        self.enter("upsert_message")?;
        self.inner.upsert_message(ctx, msg, allow_existing).await
    }

    async fn get_message(&self, ctx: &Context, id: Uuid) -> Result<Option<Message>> {
        self.inner.get_message(ctx, id).await
    }

    async fn upsert_batch(&self, ctx: &Context, batch: &Batch) -> Result<()> {
        self.enter("upsert_batch")?;
        self.inner.upsert_batch(ctx, batch).await
    }

    async fn update_batch(&self, ctx: &Context, id: Uuid, update: &BatchUpdate) -> Result<()> {
        self.enter("update_batch")?;
        self.inner.update_batch(ctx, id, update).await
    }

    async fn get_batch(&self, ctx: &Context, id: Uuid) -> Result<Option<Batch>> {
        self.inner.get_batch(ctx, id).await
    }

    async fn upsert_transaction(&self, ctx: &Context, tx: &Transaction, allow_existing: bool) -> Result<()> {
        self.enter("upsert_transaction")?;
        self.inner.upsert_transaction(ctx, tx, allow_existing).await
    }

    async fn get_transaction(&self, ctx: &Context, id: Uuid) -> Result<Option<Transaction>> {
        self.inner.get_transaction(ctx, id).await
    }

    async fn upsert_operation(&self, ctx: &Context, op: &Operation) -> Result<()> {
        self.enter("upsert_operation")?;
        self.inner.upsert_operation(ctx, op).await
    }

    async fn get_operation(&self, ctx: &Context, id: Uuid) -> Result<Option<Operation>> {
        self.inner.get_operation(ctx, id).await
    }

    async fn get_operations_by_backend_id(
        &self,
        ctx: &Context,
        plugin: &str,
        backend_id: &str,
    ) -> Result<Vec<Operation>> {
        self.inner.get_operations_by_backend_id(ctx, plugin, backend_id).await
    }

    async fn upsert_token_pool(&self, ctx: &Context, pool: &TokenPool, allow_existing: bool) -> Result<()> {
        self.enter("upsert_token_pool")?;
        self.inner.upsert_token_pool(ctx, pool, allow_existing).await
    }

    async fn get_token_pool(&self, ctx: &Context, namespace: &str, name: &str) -> Result<Option<TokenPool>> {
        self.inner.get_token_pool(ctx, namespace, name).await
    }

    async fn insert_event(&self, ctx: &Context, event: &Event) -> Result<()> {
        self.enter("insert_event")?;
        self.inner.insert_event(ctx, event).await
    }

    async fn get_events(&self, ctx: &Context, namespace: &str) -> Result<Vec<Event>> {
        self.inner.get_events(ctx, namespace).await
    }
}
