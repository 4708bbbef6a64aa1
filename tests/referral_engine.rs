mod common;

use common::*;
use kios::model::{Order, OrderStatus, Referral, Role, User};
use kios::store::{orders, referrals, users};
use rust_decimal_macros::dec;
use uuid::Uuid;

async fn seed_referral(env: &TestEnv, referrer: &str, referee: &str) -> Referral {
    let conn = env.db.lock().await;
    let now = chrono::Utc::now().timestamp();
    for (id, referred_by) in [(referrer, None), (referee, Some(referrer.to_string()))] {
        if users::get(&conn, id).unwrap().is_none() {
            users::insert(
                &conn,
                &User {
                    id: id.into(),
                    email: None,
                    chat_id: None,
                    referral_code: format!("CODE-{id}"),
                    referred_by,
                    role: Role::User,
                    created_at: now,
                },
            )
            .unwrap();
        }
    }
    let referral = Referral {
        id: Uuid::new_v4().to_string(),
        referrer_id: referrer.into(),
        referee_id: referee.into(),
        is_valid: false,
        reward_given: false,
        validated_at: None,
        created_at: now,
    };
    referrals::create(&conn, &referral).unwrap();
    referral
}

async fn seed_success_order(env: &TestEnv, user_id: &str) {
    let conn = env.db.lock().await;
    let now = chrono::Utc::now().timestamp();
    orders::insert(
        &conn,
        &Order {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            chain: "bsc".into(),
            symbol: "BNB".into(),
            amount_idr: 100_000,
            amount_token: dec!(0.009),
            markup_percent: dec!(5),
            wallet_address: DEST.into(),
            voucher_id: None,
            status: OrderStatus::Success,
            payment_method: None,
            fee_idr: 0,
            total_pay: 100_000,
            tx_hash: Some("0xseed".into()),
            midtrans_id: None,
            payment_url: None,
            created_at: now,
            updated_at: now,
            paid_at: Some(now),
            completed_at: Some(now),
        },
    )
    .unwrap();
}

async fn referrer_vouchers(env: &TestEnv, referrer: &str) -> Vec<(String, i64)> {
    let conn = env.db.lock().await;
    let mut stmt = conn
        .prepare("SELECT code, value_idr FROM vouchers WHERE owner_user_id = ?1 ORDER BY code")
        .unwrap();
    let rows = stmt
        .query_map(rusqlite::params![referrer], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    rows.collect::<Result<_, _>>().unwrap()
}

#[tokio::test]
async fn reward_granted_exactly_once() {
    let env = test_env().await;
    let referral = seed_referral(&env, "ref-a", "referee-a").await;
    seed_success_order(&env, "referee-a").await;

    env.referrals.validate_referee("referee-a").await.unwrap();
    env.referrals.validate_referee("referee-a").await.unwrap();

    let conn = env.db.lock().await;
    let row = referrals::get(&conn, &referral.id).unwrap().unwrap();
    assert!(row.is_valid);
    assert!(row.reward_given);
    assert!(row.validated_at.is_some());
    drop(conn);

    let vouchers = referrer_vouchers(&env, "ref-a").await;
    assert_eq!(vouchers.len(), 1);
    assert!(vouchers[0].0.starts_with("REF-"));
    assert_eq!(vouchers[0].1, 10_000);
}

#[tokio::test]
async fn below_threshold_changes_nothing() {
    let env = test_env().await;
    let referral = seed_referral(&env, "ref-b", "referee-b").await;
    // No successful orders yet.

    env.referrals.validate_referee("referee-b").await.unwrap();

    let conn = env.db.lock().await;
    let row = referrals::get(&conn, &referral.id).unwrap().unwrap();
    assert!(!row.is_valid);
    assert!(!row.reward_given);
}

#[tokio::test]
async fn user_without_referral_is_a_noop() {
    let env = test_env().await;
    seed_success_order(&env, BUYER).await;
    env.referrals.validate_referee(BUYER).await.unwrap();
}

#[tokio::test]
async fn milestone_grants_bonus_voucher() {
    // bonus_every = 2 in the fixture config.
    let env = test_env().await;
    seed_referral(&env, "ref-c", "referee-c1").await;
    seed_referral(&env, "ref-c", "referee-c2").await;
    seed_success_order(&env, "referee-c1").await;
    seed_success_order(&env, "referee-c2").await;

    env.referrals.validate_referee("referee-c1").await.unwrap();
    env.referrals.validate_referee("referee-c2").await.unwrap();

    let vouchers = referrer_vouchers(&env, "ref-c").await;
    // Two per-referral rewards plus one milestone bonus.
    assert_eq!(vouchers.len(), 3);
    let bonus: Vec<_> = vouchers
        .iter()
        .filter(|(code, _)| code.starts_with("REFBONUS-"))
        .collect();
    assert_eq!(bonus.len(), 1);
    assert_eq!(bonus[0].1, 50_000);
}

#[tokio::test]
async fn sweep_settles_pending_referrals() {
    let env = test_env().await;
    let referral = seed_referral(&env, "ref-d", "referee-d").await;
    seed_success_order(&env, "referee-d").await;

    env.referrals.sweep().await.unwrap();

    let conn = env.db.lock().await;
    let row = referrals::get(&conn, &referral.id).unwrap().unwrap();
    assert!(row.is_valid && row.reward_given);
}
