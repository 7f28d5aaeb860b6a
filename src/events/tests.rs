//! Tests for ledger notification handling

use crate::{
    EventType, JsonObject, OpStatus, OpType, Operation, TokenPool, TokenPoolState, Transaction,
    TransactionStatus,
    context::Context,
    database::Database,
    error::Error,
    events::EventManager,
    test_utils::{FaultyDatabase, MockLedger, MockTokens, init_logging, sqlite_database, test_batch},
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn new_test_event_manager() -> (EventManager, Arc<FaultyDatabase>) {
    new_test_event_manager_on(FaultyDatabase::new())
}

async fn new_sqlite_event_manager() -> (EventManager, Arc<FaultyDatabase>) {
    new_test_event_manager_on(FaultyDatabase::wrapping(Arc::new(sqlite_database().await)))
}

fn new_test_event_manager_on(db: FaultyDatabase) -> (EventManager, Arc<FaultyDatabase>) {
    init_logging();
    let db = Arc::new(db);
    (EventManager::new(db.clone()), db)
}

fn info() -> JsonObject {
    let mut info = JsonObject::new();
    info.insert("some".to_string(), json!("info"));
    info
}

fn my_pool(id: Option<Uuid>) -> TokenPool {
    TokenPool {
        id,
        namespace: "test-ns".to_string(),
        name: "my-pool".to_string(),
        protocol_id: "F1".to_string(),
        ..TokenPool::default()
    }
}

#[tokio::test]
async fn test_token_pool_created_success() {
    let (em, db) = new_test_event_manager();
    check_token_pool_created_success(&em, &db).await;
}

#[tokio::test]
async fn test_token_pool_created_success_sqlite() {
    let (em, db) = new_sqlite_event_manager().await;
    check_token_pool_created_success(&em, &db).await;
}

async fn check_token_pool_created_success(em: &EventManager, db: &FaultyDatabase) {
    let ctx = Context::background();
    let pool = my_pool(Some(Uuid::new_v4()));

    em.token_pool_created(&ctx, &MockTokens, pool.clone(), "0x12345", info())
        .await
        .unwrap();

    let events = db.get_events(&ctx, "test-ns").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::PoolConfirmed);
    assert_eq!(events[0].reference, pool.id);
    assert_eq!(events[0].namespace, pool.namespace);

    let stored = db.get_token_pool(&ctx, "test-ns", "my-pool").await.unwrap().unwrap();
    assert_eq!(stored.id, pool.id);
    assert_eq!(stored.state, TokenPoolState::Confirmed);
    assert_eq!(stored.info.get("some"), Some(&json!("info")));
}

#[tokio::test]
async fn test_token_pool_bad_namespace() {
    let (em, db) = new_test_event_manager();
    let ctx = Context::background();
    let pool = TokenPool::default();

    em.token_pool_created(&ctx, &MockTokens, pool.clone(), "0x12345", info())
        .await
        .unwrap();

    assert_eq!(db.calls("upsert_token_pool"), 0);
    let events = db.get_events(&ctx, "").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::PoolRejected);
    assert_eq!(events[0].reference, None);
    assert_eq!(events[0].namespace, "");
}

#[tokio::test]
async fn test_token_pool_bad_name() {
    let (em, db) = new_test_event_manager();
    let ctx = Context::background();
    let pool = TokenPool {
        namespace: "test-ns".to_string(),
        ..TokenPool::default()
    };

    em.token_pool_created(&ctx, &MockTokens, pool, "0x12345", info())
        .await
        .unwrap();

    assert_eq!(db.calls("upsert_token_pool"), 0);
    let events = db.get_events(&ctx, "test-ns").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::PoolRejected);
    assert_eq!(events[0].namespace, "test-ns");
}

#[tokio::test]
async fn test_token_pool_id_mismatch() {
    let (em, db) = new_test_event_manager();
    check_token_pool_id_mismatch(&em, &db).await;
}

#[tokio::test]
async fn test_token_pool_id_mismatch_sqlite() {
    let (em, db) = new_sqlite_event_manager().await;
    check_token_pool_id_mismatch(&em, &db).await;
}

async fn check_token_pool_id_mismatch(em: &EventManager, db: &FaultyDatabase) {
    let ctx = Context::background();
    let existing = my_pool(Some(Uuid::new_v4()));
    db.upsert_token_pool(&ctx, &existing, true).await.unwrap();

    let pool = my_pool(Some(Uuid::new_v4()));
    em.token_pool_created(&ctx, &MockTokens, pool.clone(), "0x12345", info())
        .await
        .unwrap();

    let events = db.get_events(&ctx, "test-ns").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::PoolRejected);
    assert_eq!(events[0].reference, pool.id);
    assert_eq!(events[0].namespace, "test-ns");

    // The stored pool is left alone
    let stored = db.get_token_pool(&ctx, "test-ns", "my-pool").await.unwrap().unwrap();
    assert_eq!(stored.id, existing.id);
    assert_eq!(stored.state, TokenPoolState::Pending);
}

#[tokio::test]
async fn test_token_pool_missing_id_mismatch() {
    let (em, db) = new_test_event_manager();
    let ctx = Context::background();
    db.upsert_token_pool(&ctx, &my_pool(Some(Uuid::new_v4())), true)
        .await
        .unwrap();

    em.token_pool_created(&ctx, &MockTokens, my_pool(None), "0x12345", info())
        .await
        .unwrap();

    let events = db.get_events(&ctx, "test-ns").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::PoolRejected);
    assert_eq!(events[0].reference, None);
}

#[tokio::test]
async fn test_token_pool_upsert_fail() {
    let (em, db) = new_test_event_manager();
    let ctx = Context::background();
    db.fail_on("upsert_token_pool");

    let err = em
        .token_pool_created(&ctx, &MockTokens, my_pool(Some(Uuid::new_v4())), "0x12345", info())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Persistence(ref msg) if msg == "pop"));
    assert!(db.get_events(&ctx, "test-ns").await.unwrap().is_empty());
    assert_eq!(db.calls("insert_event"), 0);
}

#[tokio::test]
async fn test_token_pool_rejection_insert_fail() {
    let (em, db) = new_test_event_manager();
    let ctx = Context::background();
    db.fail_on("insert_event");

    let err = em
        .token_pool_created(&ctx, &MockTokens, TokenPool::default(), "0x12345", info())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));
}

#[tokio::test]
async fn test_token_pool_confirm_event_failure_rolls_back() {
    let (em, db) = new_test_event_manager();
    let ctx = Context::background();
    db.fail_on("insert_event");

    let err = em
        .token_pool_created(&ctx, &MockTokens, my_pool(Some(Uuid::new_v4())), "0x12345", info())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Persistence(_)));
    assert!(db.get_token_pool(&ctx, "test-ns", "my-pool").await.unwrap().is_none());
}

#[tokio::test]
async fn test_token_pool_replay() {
    let (em, db) = new_test_event_manager();
    let ctx = Context::background();
    let pool = my_pool(Some(Uuid::new_v4()));

    em.token_pool_created(&ctx, &MockTokens, pool.clone(), "0x12345", info())
        .await
        .unwrap();
    em.token_pool_created(&ctx, &MockTokens, pool.clone(), "0x12345", info())
        .await
        .unwrap();

    let events = db.get_events(&ctx, "test-ns").await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|ev| ev.event_type == EventType::PoolConfirmed));
}

/// A pending pin transaction with its two operations per message, as left by a dispatch
async fn pending_pin(db: &FaultyDatabase, ledger_id: &str) -> (Transaction, Vec<Uuid>) {
    let ctx = Context::background();
    let batch = test_batch("ns1", 2);
    let tx = Transaction::for_batch(&batch).unwrap();
    db.upsert_transaction(&ctx, &tx, false).await.unwrap();

    let mut pins = Vec::new();
    for msg in &batch.payload.messages {
        let pin = Operation::new_message_op(
            "ethereum", ledger_id, msg, tx.id,
            OpType::BlockchainBatchPin, OpStatus::Pending, None,
        );
        db.upsert_operation(&ctx, &pin).await.unwrap();
        pins.push(pin.id);

        let upload = Operation::new_message_op(
            "ipfs", "Qm0001", msg, tx.id,
            OpType::PublicStorageBatchBroadcast, OpStatus::Succeeded, None,
        );
        db.upsert_operation(&ctx, &upload).await.unwrap();
    }
    (tx, pins)
}

#[tokio::test]
async fn test_transaction_update_confirms() {
    let (em, db) = new_test_event_manager();
    check_transaction_update_confirms(&em, &db).await;
}

#[tokio::test]
async fn test_transaction_update_confirms_sqlite() {
    let (em, db) = new_sqlite_event_manager().await;
    check_transaction_update_confirms(&em, &db).await;
}

async fn check_transaction_update_confirms(em: &EventManager, db: &FaultyDatabase) {
    let ctx = Context::background();
    let (tx, pins) = pending_pin(db, "0x0001").await;

    em.transaction_update(&ctx, &MockLedger::default(), "0x0001", OpStatus::Succeeded, None, info())
        .await
        .unwrap();

    for id in pins {
        let op = db.get_operation(&ctx, id).await.unwrap().unwrap();
        assert_eq!(op.status, OpStatus::Succeeded);
        assert!(op.updated.is_some());
    }
    let stored = db.get_transaction(&ctx, tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Confirmed);
    assert_eq!(stored.hash, tx.hash);

    let events = db.get_events(&ctx, "ns1").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::TransactionConfirmed);
    assert_eq!(events[0].reference, Some(tx.id));
}

#[tokio::test]
async fn test_transaction_update_fails() {
    let (em, db) = new_test_event_manager();
    let ctx = Context::background();
    let (tx, pins) = pending_pin(&db, "0x0001").await;

    em.transaction_update(
        &ctx,
        &MockLedger::default(),
        "0x0001",
        OpStatus::Failed,
        Some("out of gas".to_string()),
        info(),
    )
    .await
    .unwrap();

    let op = db.get_operation(&ctx, pins[0]).await.unwrap().unwrap();
    assert_eq!(op.status, OpStatus::Failed);
    assert_eq!(op.error.as_deref(), Some("out of gas"));

    let stored = db.get_transaction(&ctx, tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
    let events = db.get_events(&ctx, "ns1").await.unwrap();
    assert_eq!(events[0].event_type, EventType::TransactionFailed);
}

#[tokio::test]
async fn test_transaction_update_never_regresses() {
    let (em, db) = new_test_event_manager();
    let ctx = Context::background();
    let ledger = MockLedger::default();
    let (tx, pins) = pending_pin(&db, "0x0001").await;

    em.transaction_update(&ctx, &ledger, "0x0001", OpStatus::Succeeded, None, info())
        .await
        .unwrap();
    em.transaction_update(&ctx, &ledger, "0x0001", OpStatus::Failed, Some("late".to_string()), info())
        .await
        .unwrap();

    let op = db.get_operation(&ctx, pins[1]).await.unwrap().unwrap();
    assert_eq!(op.status, OpStatus::Succeeded);
    assert_eq!(op.error, None);
    let stored = db.get_transaction(&ctx, tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Confirmed);
    assert_eq!(db.get_events(&ctx, "ns1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_transaction_update_unknown_backend_id() {
    let (em, db) = new_test_event_manager();
    let ctx = Context::background();
    pending_pin(&db, "0x0001").await;

    em.transaction_update(&ctx, &MockLedger::default(), "0x9999", OpStatus::Succeeded, None, info())
        .await
        .unwrap();

    assert!(db.get_events(&ctx, "ns1").await.unwrap().is_empty());
    assert_eq!(db.calls("upsert_transaction"), 1);
}

#[tokio::test]
async fn test_transaction_update_write_failure() {
    let (em, db) = new_test_event_manager();
    let ctx = Context::background();
    let (tx, pins) = pending_pin(&db, "0x0001").await;
    db.fail_on("insert_event");

    let err = em
        .transaction_update(&ctx, &MockLedger::default(), "0x0001", OpStatus::Succeeded, None, info())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));

    // Nothing from the update is kept, so a redelivery applies it again
    let op = db.get_operation(&ctx, pins[0]).await.unwrap().unwrap();
    assert_eq!(op.status, OpStatus::Pending);
    let stored = db.get_transaction(&ctx, tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_event_manager_as_callbacks() {
    use crate::tokens::TokensCallbacks;

    let (em, db) = new_test_event_manager();
    let ctx = Context::background();
    let callbacks: Arc<dyn TokensCallbacks> = Arc::new(em);

    callbacks
        .token_pool_created(&ctx, &MockTokens, my_pool(Some(Uuid::new_v4())), "0x12345", info())
        .await
        .unwrap();

    let events = db.get_events(&ctx, "test-ns").await.unwrap();
    assert_eq!(events[0].event_type, EventType::PoolConfirmed);
}
