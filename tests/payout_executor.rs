mod common;

use common::*;
use kios::model::{ChainKind, ChainSpec, OrderStatus, Token};
use kios::order::{CreateOrderRequest, process_order};
use kios::price::PriceSource;
use kios::store::{chains, inventory, tokens};
use kios::wallet::keys;
use rust_decimal_macros::dec;

async fn paid_order(env: &TestEnv) -> kios::model::Order {
    let order = env
        .engine
        .create_order(CreateOrderRequest {
            user_id: BUYER.to_string(),
            chain: "bsc".into(),
            amount_idr: 100_000,
            wallet_address: DEST.to_string(),
            voucher_code: None,
        })
        .await
        .unwrap();
    exec(
        &env.db,
        "UPDATE orders SET status = 'PAID', paid_at = ?1 WHERE id = ?2",
        rusqlite::params![chrono::Utc::now().timestamp(), order.id],
    )
    .await;
    order_row(&env.db, &order.id).await
}

#[tokio::test]
async fn repeated_invocation_sends_once() {
    let env = test_env().await;
    let order = paid_order(&env).await;

    process_order(&env.deps, &order.id).await.unwrap();
    process_order(&env.deps, &order.id).await.unwrap();
    process_order(&env.deps, &order.id).await.unwrap();

    assert_eq!(env.chain.send_count(), 1);
    assert_eq!(
        order_row(&env.db, &order.id).await.status,
        OrderStatus::Success
    );
}

#[tokio::test]
async fn concurrent_consumers_send_once() {
    let env = test_env().await;
    let order = paid_order(&env).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let deps = env.deps.clone();
        let id = order.id.clone();
        handles.push(tokio::spawn(async move { process_order(&deps, &id).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert_eq!(env.chain.send_count(), 1);
    assert_eq!(
        order_row(&env.db, &order.id).await.status,
        OrderStatus::Success
    );
}

#[tokio::test]
async fn fresh_processing_lock_is_respected() {
    let env = test_env().await;
    let order = paid_order(&env).await;
    exec(
        &env.db,
        "UPDATE orders SET status = 'PROCESSING', updated_at = ?1 WHERE id = ?2",
        rusqlite::params![chrono::Utc::now().timestamp(), order.id],
    )
    .await;

    process_order(&env.deps, &order.id).await.unwrap();
    assert_eq!(env.chain.send_count(), 0);
    assert_eq!(
        order_row(&env.db, &order.id).await.status,
        OrderStatus::Processing
    );
}

#[tokio::test]
async fn zombie_lock_is_stolen() {
    let env = test_env().await;
    let order = paid_order(&env).await;
    let stale = chrono::Utc::now().timestamp() - 12 * 60;
    exec(
        &env.db,
        "UPDATE orders SET status = 'PROCESSING', updated_at = ?1 WHERE id = ?2",
        rusqlite::params![stale, order.id],
    )
    .await;

    process_order(&env.deps, &order.id).await.unwrap();
    assert_eq!(env.chain.send_count(), 1);
    assert_eq!(
        order_row(&env.db, &order.id).await.status,
        OrderStatus::Success
    );

    // A second thief guarding on the same stale timestamp matches zero
    // rows.
    let conn = env.db.lock().await;
    assert!(!kios::store::orders::steal_processing(
        &conn,
        &order.id,
        stale,
        chrono::Utc::now().timestamp()
    )
    .unwrap());
}

#[tokio::test]
async fn broadcast_ambiguity_finalizes_and_never_resends() {
    let env = test_env().await;
    let order = paid_order(&env).await;
    env.chain.set(SendBehavior::Broadcast);

    process_order(&env.deps, &order.id).await.unwrap();

    let done = order_row(&env.db, &order.id).await;
    assert_eq!(done.status, OrderStatus::Success);
    assert!(done.tx_hash.as_deref().unwrap().starts_with("0xdef"));
    assert_eq!(inventory_row(&env.db).await.reserved, dec!(0));

    // Any later consumer routes through recovery because tx_hash != NULL.
    env.chain.set(SendBehavior::Confirm);
    process_order(&env.deps, &order.id).await.unwrap();
    assert_eq!(env.chain.send_count(), 1);
}

#[tokio::test]
async fn crashed_worker_with_hash_recovers_without_sending() {
    let env = test_env().await;
    let order = paid_order(&env).await;
    exec(
        &env.db,
        "UPDATE orders SET status = 'PROCESSING', tx_hash = '0x1234' WHERE id = ?1",
        rusqlite::params![order.id],
    )
    .await;

    process_order(&env.deps, &order.id).await.unwrap();

    let done = order_row(&env.db, &order.id).await;
    assert_eq!(done.status, OrderStatus::Success);
    assert_eq!(done.tx_hash.as_deref(), Some("0x1234"));
    assert_eq!(env.chain.send_count(), 0);
    // Recovery deducts exactly once.
    let inv = inventory_row(&env.db).await;
    assert_eq!(inv.balance, dec!(10) - order.amount_token);
}

#[tokio::test]
async fn safe_failure_refunds_reservations() {
    let env = test_env().await;
    let order = paid_order(&env).await;
    env.chain.set(SendBehavior::Fail(
        "insufficient funds for gas * price + value".into(),
    ));

    process_order(&env.deps, &order.id).await.unwrap();

    let failed = order_row(&env.db, &order.id).await;
    assert_eq!(failed.status, OrderStatus::Failed);
    assert!(failed.tx_hash.is_none());
    let inv = inventory_row(&env.db).await;
    assert_eq!(inv.reserved, dec!(0));
    assert_eq!(inv.balance, dec!(10));
}

#[tokio::test]
async fn non_evm_chain_fails_safely() {
    let env = test_env().await;
    {
        let conn = env.db.lock().await;
        chains::insert(
            &conn,
            &ChainSpec {
                slug: "solana".into(),
                kind: ChainKind::Solana,
                rpc_url: "http://127.0.0.1:1".into(),
                explorer_url: None,
                chain_id: None,
                encrypted_key: keys::encrypt_key_blob(TEST_KEY, PASSWORD).unwrap(),
                confirmations: 1,
                active: true,
            },
        )
        .unwrap();
        tokens::insert(
            &conn,
            &Token {
                chain: "solana".into(),
                symbol: "SOL".into(),
                is_native: true,
                decimals: 9,
                markup_percent: None,
                active: true,
            },
        )
        .unwrap();
        inventory::set_balance(&conn, "solana", "SOL", dec!(100)).unwrap();
    }
    env.prices.upsert("SOL", dec!(150), PriceSource::Ws);

    let order = env
        .engine
        .create_order(CreateOrderRequest {
            user_id: BUYER.to_string(),
            chain: "solana".into(),
            amount_idr: 100_000,
            wallet_address: "GsbwXfJraMomNxBcjYLcG3mxkBUiyWXAB32fGbSMQRdW".into(),
            voucher_code: None,
        })
        .await
        .unwrap();
    exec(
        &env.db,
        "UPDATE orders SET status = 'PAID', paid_at = ?1 WHERE id = ?2",
        rusqlite::params![chrono::Utc::now().timestamp(), order.id],
    )
    .await;

    // No signer exists for the chain; the send must fail as a safe
    // failure, not freeze the order for an operator.
    process_order(&env.deps, &order.id).await.unwrap();

    let failed = order_row(&env.db, &order.id).await;
    assert_eq!(failed.status, OrderStatus::Failed);
    assert!(failed.tx_hash.is_none());
    assert_eq!(env.chain.send_count(), 0);

    let conn = env.db.lock().await;
    let inv = inventory::get(&conn, "solana", "SOL").unwrap().unwrap();
    assert_eq!(inv.reserved, dec!(0));
    assert_eq!(inv.balance, dec!(100));

    let fatal_audits: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM audit_log WHERE tag = 'payout_ambiguous_error' AND order_id = ?1",
            rusqlite::params![order.id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(fatal_audits, 0);
}

#[tokio::test]
async fn ambiguous_failure_freezes_then_zombie_retry_completes() {
    let env = test_env().await;
    let order = paid_order(&env).await;
    env.chain
        .set(SendBehavior::Fail("connection reset by peer".into()));

    assert!(process_order(&env.deps, &order.id).await.is_err());

    let frozen = order_row(&env.db, &order.id).await;
    assert_eq!(frozen.status, OrderStatus::Processing);
    assert!(frozen.tx_hash.is_none());
    {
        let conn = env.db.lock().await;
        let audits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM audit_log WHERE tag = 'payout_ambiguous_error' AND order_id = ?1",
                rusqlite::params![order.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(audits, 1);
    }

    // Ten minutes later the lock is stale; the steal path retries.
    exec(
        &env.db,
        "UPDATE orders SET updated_at = ?1 WHERE id = ?2",
        rusqlite::params![chrono::Utc::now().timestamp() - 11 * 60, order.id],
    )
    .await;
    env.chain.set(SendBehavior::Confirm);
    process_order(&env.deps, &order.id).await.unwrap();
    assert_eq!(
        order_row(&env.db, &order.id).await.status,
        OrderStatus::Success
    );
}
