//! SQLite Database
//!
//! Persists every record as a JSON body next to the columns it is looked up
//! by. Atomic groups map onto SQLite transactions; calls made outside a group
//! each run in their own short transaction.

use super::plugin::{BatchUpdate, Database, GroupFn};
use super::rules;
use crate::{
    Batch, Event, Message, Operation, TokenPool, Transaction,
    config::DatabaseConfig,
    context::{Context, GroupId},
    error::{Error, Result},
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        namespace TEXT NOT NULL,
        body TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS batches (
        id TEXT PRIMARY KEY,
        namespace TEXT NOT NULL,
        body TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        body TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS operations (
        id TEXT PRIMARY KEY,
        plugin TEXT NOT NULL,
        backend_id TEXT NOT NULL,
        created TEXT NOT NULL,
        body TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS operations_backend ON operations (plugin, backend_id)",
    "CREATE TABLE IF NOT EXISTS tokenpools (
        namespace TEXT NOT NULL,
        name TEXT NOT NULL,
        body TEXT NOT NULL,
        PRIMARY KEY (namespace, name)
    )",
    "CREATE TABLE IF NOT EXISTS events (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL,
        namespace TEXT NOT NULL,
        body TEXT NOT NULL
    )",
];

/// Database backend on SQLite via sqlx
pub struct SqliteDatabase {
    pool: SqlitePool,
    /// Open transactions of the in-flight atomic groups
    groups: Mutex<HashMap<GroupId, GroupConn>>,
    /// Held by every write outside a group, and by a group until it finishes
    writer: Mutex<()>,
}

type GroupConn = Arc<Mutex<sqlx::Transaction<'static, Sqlite>>>;

/// Runs `$body` against the connection the context is scoped to: the group's
/// transaction inside an atomic group, otherwise a fresh transaction that
/// commits when `$body` succeeds. Writes outside a group wait for the writer
/// lock so they never race an open group for the database lock.
macro_rules! with_conn {
    (@writer $self:ident, read) => {
        None::<tokio::sync::MutexGuard<'_, ()>>
    };
    (@writer $self:ident, write) => {
        Some($self.writer.lock().await)
    };
    ($self:ident, $ctx:expr, $access:ident, |$conn:ident| $body:expr) => {{
        match $ctx.group() {
            Some(group) => {
                let group_conn = $self.group_conn(group).await?;
                let mut group_tx = group_conn.lock().await;
                let $conn: &mut SqliteConnection = &mut **group_tx;
                $body.await
            }
            None => {
                let _writer = with_conn!(@writer $self, $access);
                let mut local_tx = $self.pool.begin().await?;
                let result = {
                    let $conn: &mut SqliteConnection = &mut *local_tx;
                    $body.await
                };
                if result.is_ok() {
                    local_tx.commit().await?;
                }
                result
            }
        }
    }};
}

impl SqliteDatabase {
    /// Open the database described by `config` and create missing tables
    ///
    /// An in-memory database only exists on the connection that created it,
    /// so it always gets a single connection that is never recycled.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new();
        if is_memory_url(&config.url) {
            if config.max_connections > 1 {
                debug!(
                    "In-memory database {} uses one connection instead of {}",
                    config.url, config.max_connections
                );
            }
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            pool_options = pool_options.max_connections(config.max_connections);
        }
        let pool = pool_options.connect_with(options).await?;

        let db = Self {
            pool,
            groups: Mutex::new(HashMap::new()),
            writer: Mutex::new(()),
        };
        db.init_schema().await?;
        info!("SQLite database ready at {}", config.url);
        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn group_conn(&self, group: GroupId) -> Result<GroupConn> {
        self.groups
            .lock()
            .await
            .get(&group)
            .cloned()
            .ok_or_else(|| unknown_group(group))
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn unknown_group(group: GroupId) -> Error {
    Error::Persistence(format!("atomic group {} is not active", group))
}

async fn fetch_one_body<T: DeserializeOwned + Send>(
    conn: &mut SqliteConnection,
    sql: &str,
    keys: &[&str],
) -> Result<Option<T>> {
    let mut query = sqlx::query(sql);
    for key in keys {
        query = query.bind(*key);
    }
    match query.fetch_optional(&mut *conn).await? {
        Some(row) => {
            let body: String = row.try_get("body")?;
            Ok(Some(serde_json::from_str(&body)?))
        }
        None => Ok(None),
    }
}

async fn fetch_all_bodies<T: DeserializeOwned + Send>(
    conn: &mut SqliteConnection,
    sql: &str,
    keys: &[&str],
) -> Result<Vec<T>> {
    let mut query = sqlx::query(sql);
    for key in keys {
        query = query.bind(*key);
    }
    let rows = query.fetch_all(&mut *conn).await?;
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let body: String = row.try_get("body")?;
        records.push(serde_json::from_str(&body)?);
    }
    Ok(records)
}

async fn get_message(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Message>> {
    let id = id.to_string();
    fetch_one_body(conn, "SELECT body FROM messages WHERE id = ?1", &[id.as_str()]).await
}

async fn upsert_message(conn: &mut SqliteConnection, msg: &Message, allow_existing: bool) -> Result<()> {
    let existing = get_message(conn, msg.header.id).await?;
    if !rules::message_write(existing.as_ref(), msg, allow_existing)? {
        return Ok(());
    }
    sqlx::query(
        "INSERT INTO messages (id, namespace, body) VALUES (?1, ?2, ?3)
         ON CONFLICT (id) DO UPDATE SET namespace = excluded.namespace, body = excluded.body",
    )
    .bind(msg.header.id.to_string())
    .bind(&msg.header.namespace)
    .bind(serde_json::to_string(msg)?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn get_batch(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Batch>> {
    let id = id.to_string();
    fetch_one_body(conn, "SELECT body FROM batches WHERE id = ?1", &[id.as_str()]).await
}

async fn upsert_batch(conn: &mut SqliteConnection, batch: &Batch) -> Result<()> {
    sqlx::query(
        "INSERT INTO batches (id, namespace, body) VALUES (?1, ?2, ?3)
         ON CONFLICT (id) DO UPDATE SET namespace = excluded.namespace, body = excluded.body",
    )
    .bind(batch.id.to_string())
    .bind(&batch.namespace)
    .bind(serde_json::to_string(batch)?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn update_batch(conn: &mut SqliteConnection, id: Uuid, update: &BatchUpdate) -> Result<()> {
    let mut batch = get_batch(conn, id)
        .await?
        .ok_or(Error::NotFound { entity: "batch", id })?;
    update.apply(&mut batch);
    upsert_batch(conn, &batch).await
}

async fn get_transaction(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Transaction>> {
    let id = id.to_string();
    fetch_one_body(conn, "SELECT body FROM transactions WHERE id = ?1", &[id.as_str()]).await
}

async fn upsert_transaction(conn: &mut SqliteConnection, tx: &Transaction, allow_existing: bool) -> Result<()> {
    let existing = get_transaction(conn, tx.id).await?;
    if !rules::transaction_write(existing.as_ref(), tx, allow_existing)? {
        return Ok(());
    }
    sqlx::query(
        "INSERT INTO transactions (id, status, body) VALUES (?1, ?2, ?3)
         ON CONFLICT (id) DO UPDATE SET status = excluded.status, body = excluded.body",
    )
    .bind(tx.id.to_string())
    .bind(tx.status.as_str())
    .bind(serde_json::to_string(tx)?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn get_operation(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Operation>> {
    let id = id.to_string();
    fetch_one_body(conn, "SELECT body FROM operations WHERE id = ?1", &[id.as_str()]).await
}

async fn upsert_operation(conn: &mut SqliteConnection, op: &Operation) -> Result<()> {
    let existing = get_operation(conn, op.id).await?;
    let Some(record) = rules::operation_write(existing.as_ref(), op) else {
        return Ok(());
    };
    sqlx::query(
        "INSERT INTO operations (id, plugin, backend_id, created, body) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (id) DO UPDATE SET
            plugin = excluded.plugin, backend_id = excluded.backend_id, body = excluded.body",
    )
    .bind(record.id.to_string())
    .bind(&record.plugin)
    .bind(&record.backend_id)
    .bind(record.created.to_rfc3339())
    .bind(serde_json::to_string(&record)?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn get_token_pool(conn: &mut SqliteConnection, namespace: &str, name: &str) -> Result<Option<TokenPool>> {
    fetch_one_body(
        conn,
        "SELECT body FROM tokenpools WHERE namespace = ?1 AND name = ?2",
        &[namespace, name],
    )
    .await
}

async fn upsert_token_pool(conn: &mut SqliteConnection, pool: &TokenPool, allow_existing: bool) -> Result<()> {
    let existing = get_token_pool(conn, &pool.namespace, &pool.name).await?;
    rules::token_pool_check(existing.as_ref(), pool, allow_existing)?;
    sqlx::query(
        "INSERT INTO tokenpools (namespace, name, body) VALUES (?1, ?2, ?3)
         ON CONFLICT (namespace, name) DO UPDATE SET body = excluded.body",
    )
    .bind(&pool.namespace)
    .bind(&pool.name)
    .bind(serde_json::to_string(pool)?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_event(conn: &mut SqliteConnection, event: &Event) -> Result<()> {
    sqlx::query("INSERT INTO events (id, namespace, body) VALUES (?1, ?2, ?3)")
        .bind(event.id.to_string())
        .bind(&event.namespace)
        .bind(serde_json::to_string(event)?)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn run_atomic<'a>(&'a self, ctx: &'a Context, work: GroupFn<'a>) -> Result<()> {
        if ctx.group().is_some() {
            return work(ctx.clone()).await;
        }
        ctx.check()?;

        let _writer = ctx.run(async { Ok(self.writer.lock().await) }).await?;
        let group = GroupId::new();
        let tx = self.pool.begin().await?;
        self.groups.lock().await.insert(group, Arc::new(Mutex::new(tx)));

        let result = ctx.run(work(ctx.with_group(group))).await;
        let group_conn = self
            .groups
            .lock()
            .await
            .remove(&group)
            .ok_or_else(|| unknown_group(group))?;
        let tx = Arc::try_unwrap(group_conn)
            .map_err(|_| Error::Persistence(format!("atomic group {} is still in use", group)))?
            .into_inner();

        match result {
            Ok(()) => {
                tx.commit().await?;
                debug!("Atomic group {} committed", group);
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback of atomic group {} failed: {}", group, rollback_err);
                }
                debug!("Atomic group {} rolled back: {}", group, err);
                Err(err)
            }
        }
    }

    async fn upsert_message(&self, ctx: &Context, msg: &Message, allow_existing: bool) -> Result<()> {
        with_conn!(self, ctx, write, |conn| upsert_message(conn, msg, allow_existing))
    }

    async fn get_message(&self, ctx: &Context, id: Uuid) -> Result<Option<Message>> {
        with_conn!(self, ctx, read, |conn| get_message(conn, id))
    }

    async fn upsert_batch(&self, ctx: &Context, batch: &Batch) -> Result<()> {
        with_conn!(self, ctx, write, |conn| upsert_batch(conn, batch))
    }

    async fn update_batch(&self, ctx: &Context, id: Uuid, update: &BatchUpdate) -> Result<()> {
        with_conn!(self, ctx, write, |conn| update_batch(conn, id, update))
    }

    async fn get_batch(&self, ctx: &Context, id: Uuid) -> Result<Option<Batch>> {
        with_conn!(self, ctx, read, |conn| get_batch(conn, id))
    }

    async fn upsert_transaction(&self, ctx: &Context, tx: &Transaction, allow_existing: bool) -> Result<()> {
        with_conn!(self, ctx, write, |conn| upsert_transaction(conn, tx, allow_existing))
    }

    async fn get_transaction(&self, ctx: &Context, id: Uuid) -> Result<Option<Transaction>> {
        with_conn!(self, ctx, read, |conn| get_transaction(conn, id))
    }

    async fn upsert_operation(&self, ctx: &Context, op: &Operation) -> Result<()> {
        with_conn!(self, ctx, write, |conn| upsert_operation(conn, op))
    }

    async fn get_operation(&self, ctx: &Context, id: Uuid) -> Result<Option<Operation>> {
        with_conn!(self, ctx, read, |conn| get_operation(conn, id))
    }

    async fn get_operations_by_backend_id(
        &self,
        ctx: &Context,
        plugin: &str,
        backend_id: &str,
    ) -> Result<Vec<Operation>> {
        with_conn!(self, ctx, read, |conn| fetch_all_bodies(
            conn,
            "SELECT body FROM operations WHERE plugin = ?1 AND backend_id = ?2 ORDER BY created",
            &[plugin, backend_id],
        ))
    }

    async fn upsert_token_pool(&self, ctx: &Context, pool: &TokenPool, allow_existing: bool) -> Result<()> {
        with_conn!(self, ctx, write, |conn| upsert_token_pool(conn, pool, allow_existing))
    }

    async fn get_token_pool(&self, ctx: &Context, namespace: &str, name: &str) -> Result<Option<TokenPool>> {
        with_conn!(self, ctx, read, |conn| get_token_pool(conn, namespace, name))
    }

    async fn insert_event(&self, ctx: &Context, event: &Event) -> Result<()> {
        with_conn!(self, ctx, write, |conn| insert_event(conn, event))
    }

    async fn get_events(&self, ctx: &Context, namespace: &str) -> Result<Vec<Event>> {
        with_conn!(self, ctx, read, |conn| fetch_all_bodies(
            conn,
            "SELECT body FROM events WHERE namespace = ?1 ORDER BY seq",
            &[namespace],
        ))
    }
}
