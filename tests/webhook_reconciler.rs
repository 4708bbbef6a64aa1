mod common;

use common::*;
use kios::model::{OrderStatus, PaymentMethod};
use kios::order::{CreateOrderRequest, WebhookDisposition};
use rust_decimal_macros::dec;

async fn paid_pending_order(env: &TestEnv) -> (kios::model::Order, String) {
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
    let pay = env
        .engine
        .create_payment(&order.id, PaymentMethod::Qris)
        .await
        .unwrap();
    (order, pay.midtrans_id)
}

#[tokio::test]
async fn unknown_gateway_id_is_ignored() {
    let env = test_env().await;
    let disp = env
        .engine
        .apply_webhook(&webhook_payload("KIOS-never-existed", "settlement", "100000"))
        .await
        .unwrap();
    assert!(matches!(disp, WebhookDisposition::Ignored(_)));
}

#[tokio::test]
async fn amount_mismatch_is_fraud_and_leaves_order_untouched() {
    let env = test_env().await;
    let (order, midtrans_id) = paid_pending_order(&env).await;

    let disp = env
        .engine
        .apply_webhook(&webhook_payload(&midtrans_id, "settlement", "150000.00"))
        .await
        .unwrap();
    assert_eq!(disp, WebhookDisposition::Fraud);
    assert_eq!(
        order_row(&env.db, &order.id).await.status,
        OrderStatus::Pending
    );

    let conn = env.db.lock().await;
    let audits: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM audit_log WHERE tag = 'webhook_amount_mismatch'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(audits, 1);
}

#[tokio::test]
async fn amount_inside_tolerance_is_accepted() {
    let env = test_env().await;
    let (order, midtrans_id) = paid_pending_order(&env).await;

    // 1000 IDR floor dominates 0.5% of 100k.
    let disp = env
        .engine
        .apply_webhook(&webhook_payload(&midtrans_id, "settlement", "100900.00"))
        .await
        .unwrap();
    assert_eq!(disp, WebhookDisposition::Applied);
    assert_eq!(order_row(&env.db, &order.id).await.status, OrderStatus::Paid);
}

#[tokio::test]
async fn gateway_failure_status_cancels_and_releases() {
    let env = test_env().await;
    let (order, midtrans_id) = paid_pending_order(&env).await;
    assert!(inventory_row(&env.db).await.reserved > dec!(0));

    let disp = env
        .engine
        .apply_webhook(&webhook_payload(&midtrans_id, "expire", "100000"))
        .await
        .unwrap();
    assert_eq!(disp, WebhookDisposition::Applied);
    assert_eq!(
        order_row(&env.db, &order.id).await.status,
        OrderStatus::Cancelled
    );
    assert_eq!(inventory_row(&env.db).await.reserved, dec!(0));
}

#[tokio::test]
async fn pending_status_is_a_noop() {
    let env = test_env().await;
    let (order, midtrans_id) = paid_pending_order(&env).await;

    let disp = env
        .engine
        .apply_webhook(&webhook_payload(&midtrans_id, "pending", "100000"))
        .await
        .unwrap();
    assert!(matches!(disp, WebhookDisposition::Ignored(_)));
    assert_eq!(
        order_row(&env.db, &order.id).await.status,
        OrderStatus::Pending
    );
}

#[tokio::test]
async fn repayment_orphans_previous_webhook() {
    let mut env = test_env().await;
    let (order, first_mid) = paid_pending_order(&env).await;

    // The user regenerates payment; the gateway id is overwritten.
    let second = env
        .engine
        .create_payment(&order.id, PaymentMethod::Va)
        .await
        .unwrap();
    assert_ne!(first_mid, second.midtrans_id);

    // The old attempt's webhook no longer matches any order.
    let disp = env
        .engine
        .apply_webhook(&webhook_payload(&first_mid, "settlement", "100000"))
        .await
        .unwrap();
    assert!(matches!(disp, WebhookDisposition::Ignored(_)));
    assert_eq!(
        order_row(&env.db, &order.id).await.status,
        OrderStatus::Pending
    );

    // The fresh attempt settles normally (VA fee included).
    let disp = env
        .engine
        .apply_webhook(&webhook_payload(&second.midtrans_id, "settlement", "104000"))
        .await
        .unwrap();
    assert_eq!(disp, WebhookDisposition::Applied);
    assert_eq!(env.payout_rx.recv().await.unwrap(), order.id);
}

#[tokio::test]
async fn sync_promotes_order_from_gateway() {
    let env = test_env().await;
    let (order, midtrans_id) = paid_pending_order(&env).await;
    env.gateway.set_status(&midtrans_id, "settlement");

    let status = env.engine.sync_order(&order.id).await.unwrap();
    assert_eq!(status, OrderStatus::Paid);
}
