mod common;

use std::time::Duration;

use common::*;
use kios::convo::{ConvoService, Reply, Step};
use kios::error::EngineError;
use kios::model::OrderStatus;
use kios::order::CreateOrderRequest;
use kios::price::PriceSource;
use rust_decimal_macros::dec;

const CHAT: &str = "chat-user-1";

fn convo(env: &TestEnv) -> ConvoService {
    ConvoService::new(
        env.kv.clone(),
        env.db.clone(),
        env.engine.clone(),
        env.quotes.clone(),
    )
}

#[tokio::test]
async fn full_checkout_flow() {
    let env = test_env().await;
    let convo = convo(&env);

    match convo.begin_buy(CHAT).await.unwrap() {
        Reply::ChainPrompt { chains } => assert!(chains.contains(&"bsc".to_string())),
        other => panic!("expected chain prompt, got {other:?}"),
    }

    assert!(matches!(
        convo.advance(CHAT, BUYER, "bsc").await.unwrap(),
        Reply::AmountPrompt { .. }
    ));
    assert!(matches!(
        convo.advance(CHAT, BUYER, "100.000").await.unwrap(),
        Reply::WalletPrompt
    ));
    assert!(matches!(
        convo
            .advance(CHAT, BUYER, &DEST.to_lowercase())
            .await
            .unwrap(),
        Reply::VoucherPrompt
    ));

    match convo.advance(CHAT, BUYER, "skip").await.unwrap() {
        Reply::Summary {
            quote, amount_idr, ..
        } => {
            assert_eq!(amount_idr, 100_000);
            assert_eq!(quote.token_amount, dec!(0.00925024));
        }
        other => panic!("expected summary, got {other:?}"),
    }

    let order_id = match convo.advance(CHAT, BUYER, "yes").await.unwrap() {
        Reply::PaymentMethodPrompt { order } => {
            assert_eq!(order.status, OrderStatus::Pending);
            // The checksum-normalized address went onto the order.
            assert_eq!(order.wallet_address, DEST);
            order.id
        }
        other => panic!("expected payment method prompt, got {other:?}"),
    };

    match convo.advance(CHAT, BUYER, "QRIS").await.unwrap() {
        Reply::Payment(info) => {
            assert_eq!(info.order_id, order_id);
            assert_eq!(info.fee_idr, 0);
        }
        other => panic!("expected payment, got {other:?}"),
    }

    // Flow completion resets the conversation.
    assert_eq!(convo.load(CHAT).await.step, Step::Idle);
}

#[tokio::test]
async fn invalid_inputs_reprompt_without_losing_step() {
    let env = test_env().await;
    let convo = convo(&env);
    convo.begin_buy(CHAT).await.unwrap();

    assert!(matches!(
        convo.advance(CHAT, BUYER, "dogechain").await.unwrap(),
        Reply::Invalid(_)
    ));
    assert_eq!(convo.load(CHAT).await.step, Step::AwaitingChain);

    convo.advance(CHAT, BUYER, "bsc").await.unwrap();
    assert!(matches!(
        convo.advance(CHAT, BUYER, "abc").await.unwrap(),
        Reply::Invalid(_)
    ));
    assert_eq!(convo.load(CHAT).await.step, Step::AwaitingAmount);

    convo.advance(CHAT, BUYER, "100000").await.unwrap();
    // Wrong checksum case is rejected, never corrected.
    let bad_case = DEST.replace("aA", "Aa");
    assert!(matches!(
        convo.advance(CHAT, BUYER, &bad_case).await.unwrap(),
        Reply::Invalid(_)
    ));
    assert_eq!(convo.load(CHAT).await.step, Step::AwaitingWallet);
}

#[tokio::test]
async fn slippage_aborts_confirmation() {
    let env = test_env().await;
    let convo = convo(&env);
    convo.begin_buy(CHAT).await.unwrap();
    convo.advance(CHAT, BUYER, "bsc").await.unwrap();
    convo.advance(CHAT, BUYER, "100000").await.unwrap();
    convo.advance(CHAT, BUYER, DEST).await.unwrap();
    convo.advance(CHAT, BUYER, "skip").await.unwrap();

    // Price moves ~10% between summary and confirmation.
    env.prices.upsert("BNB", dec!(720), PriceSource::Ws);

    let err = convo.advance(CHAT, BUYER, "yes").await.unwrap_err();
    assert!(matches!(err, EngineError::Slippage { .. }));
    // Error resets the conversation.
    assert_eq!(convo.load(CHAT).await.step, Step::Idle);
    // And no order was created.
    let conn = env.db.lock().await;
    assert!(kios::store::orders::pending_by_user(&conn, BUYER)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn pending_order_recheck_inside_critical_section() {
    let env = test_env().await;
    let convo = convo(&env);
    convo.begin_buy(CHAT).await.unwrap();
    convo.advance(CHAT, BUYER, "bsc").await.unwrap();
    convo.advance(CHAT, BUYER, "100000").await.unwrap();
    convo.advance(CHAT, BUYER, DEST).await.unwrap();
    convo.advance(CHAT, BUYER, "skip").await.unwrap();

    // Another surface creates an order meanwhile.
    env.engine
        .create_order(CreateOrderRequest {
            user_id: BUYER.to_string(),
            chain: "bsc".into(),
            amount_idr: 50_000,
            wallet_address: DEST.to_string(),
            voucher_code: None,
        })
        .await
        .unwrap();

    let err = convo.advance(CHAT, BUYER, "yes").await.unwrap_err();
    assert!(matches!(err, EngineError::PendingOrderExists { .. }));
}

#[tokio::test]
async fn create_order_lock_contention_is_surfaced() {
    let env = test_env().await;
    let convo = convo(&env);
    convo.begin_buy(CHAT).await.unwrap();
    convo.advance(CHAT, BUYER, "bsc").await.unwrap();
    convo.advance(CHAT, BUYER, "100000").await.unwrap();
    convo.advance(CHAT, BUYER, DEST).await.unwrap();
    convo.advance(CHAT, BUYER, "skip").await.unwrap();

    env.kv
        .set(
            &format!("lock:user:{BUYER}:create_order"),
            "someone-else",
            Duration::from_secs(30),
        )
        .await;

    let err = convo.advance(CHAT, BUYER, "yes").await.unwrap_err();
    assert!(matches!(err, EngineError::LockContention));
}

#[tokio::test]
async fn malformed_blob_resets_to_idle() {
    let env = test_env().await;
    let convo = convo(&env);

    env.kv
        .set(
            &format!("convo:{CHAT}"),
            r#"{"step":"awaiting_wallet","surprise":true,"created_at":1}"#,
            Duration::from_secs(60),
        )
        .await;

    assert_eq!(convo.load(CHAT).await.step, Step::Idle);
}

#[tokio::test]
async fn stale_conversation_resets_to_idle() {
    let env = test_env().await;
    let convo = convo(&env);

    let old = chrono::Utc::now().timestamp() - 31 * 60;
    env.kv
        .set(
            &format!("convo:{CHAT}"),
            &format!(r#"{{"step":"awaiting_amount","chain":"bsc","created_at":{old}}}"#),
            Duration::from_secs(3600),
        )
        .await;

    assert_eq!(convo.load(CHAT).await.step, Step::Idle);
}
