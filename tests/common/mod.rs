//! Shared fixture: in-memory database, mock chain client, mock payment
//! gateway, and a fully wired order engine.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

use kios::chains::{ChainClient, ChainError};
use kios::db::{self, Db};
use kios::gateway::{ChargeRequest, ChargeResponse, GatewayStatus, PaymentGateway};
use kios::kv::Kv;
use kios::model::{ChainKind, ChainSpec, Role, Token, User};
use kios::notify::LogNotifier;
use kios::order::{OrderEngine, PayoutDeps, PayoutSender};
use kios::price::{FxService, PriceCache, PriceRest, PriceSource};
use kios::quote::QuoteService;
use kios::referral::{ReferralConfig, ReferralEngine};
use kios::store::{chains, inventory, settings, tokens, users};
use kios::wallet::{HotWallet, keys};

pub const PASSWORD: &str = "test-wallet-password-32-characters!!";
pub const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
pub const BUYER: &str = "user-1";
pub const BUYER_2: &str = "user-2";
pub const DEST: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

// ── Mock chain ──────────────────────────────────────────────────────

#[derive(Clone)]
pub enum SendBehavior {
    /// Send succeeds and confirms.
    Confirm,
    /// Broadcast observed but confirmation times out.
    Broadcast,
    /// Submission fails with this error text.
    Fail(String),
}

pub struct MockChain {
    behavior: std::sync::Mutex<SendBehavior>,
    pub sends: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            behavior: std::sync::Mutex::new(SendBehavior::Confirm),
            sends: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, behavior: SendBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn native_balance(
        &self,
        _chain: &ChainSpec,
        _address: &str,
        _decimals: u8,
    ) -> Result<Decimal, ChainError> {
        Ok(dec!(10))
    }

    async fn gas_price(&self, _chain: &ChainSpec) -> Result<u128, ChainError> {
        Ok(1_000_000_000)
    }

    async fn send_native(
        &self,
        _chain: &ChainSpec,
        _signer: &alloy::signers::local::PrivateKeySigner,
        _to: &str,
        _amount: Decimal,
        _decimals: u8,
    ) -> Result<String, ChainError> {
        let n = self.sends.fetch_add(1, Ordering::SeqCst);
        match self.behavior.lock().unwrap().clone() {
            SendBehavior::Confirm => Ok(format!("0xabc{n:061x}")),
            SendBehavior::Broadcast => Err(ChainError::Broadcasted {
                tx_hash: format!("0xdef{n:061x}"),
            }),
            SendBehavior::Fail(text) => Err(ChainError::Submit(text)),
        }
    }
}

// ── Mock gateway ────────────────────────────────────────────────────

pub struct MockGateway {
    statuses: std::sync::Mutex<HashMap<String, GatewayStatus>>,
    pub unreachable: AtomicBool,
    pub charges: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            statuses: std::sync::Mutex::new(HashMap::new()),
            unreachable: AtomicBool::new(false),
            charges: AtomicUsize::new(0),
        }
    }

    pub fn set_status(&self, midtrans_id: &str, transaction_status: &str) {
        self.statuses.lock().unwrap().insert(
            midtrans_id.to_string(),
            GatewayStatus {
                transaction_status: transaction_status.to_string(),
                fraud_status: None,
                status_code: Some("200".into()),
                gross_amount: None,
            },
        );
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn charge(&self, req: &ChargeRequest) -> kios::error::EngineResult<ChargeResponse> {
        self.charges.fetch_add(1, Ordering::SeqCst);
        Ok(ChargeResponse {
            payment_url: Some(format!("https://pay.example/{}", req.midtrans_id)),
            qr_url: Some(format!("https://pay.example/{}/qr", req.midtrans_id)),
            va_number: None,
            expiry_time: Some("2026-01-01 00:00:00".into()),
        })
    }

    async fn status(&self, midtrans_id: &str) -> kios::error::EngineResult<GatewayStatus> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(kios::error::EngineError::External(
                "gateway timeout".into(),
            ));
        }
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(midtrans_id)
            .cloned()
            .unwrap_or(GatewayStatus {
                transaction_status: "pending".into(),
                fraud_status: None,
                status_code: Some("201".into()),
                gross_amount: None,
            }))
    }
}

// ── Environment ─────────────────────────────────────────────────────

pub struct TestEnv {
    pub db: Db,
    pub kv: Arc<Kv>,
    pub engine: Arc<OrderEngine>,
    pub deps: Arc<PayoutDeps>,
    pub chain: Arc<MockChain>,
    pub gateway: Arc<MockGateway>,
    pub prices: PriceCache,
    pub quotes: QuoteService,
    pub referrals: Arc<ReferralEngine>,
    pub payout_rx: mpsc::UnboundedReceiver<String>,
}

pub async fn test_env() -> TestEnv {
    let db = db::open_in_memory().expect("in-memory db");
    seed(&db).await;

    let kv = Arc::new(Kv::new());
    let rest = PriceRest::new("http://127.0.0.1:1".into());
    let prices = PriceCache::new(kv.clone(), rest);
    prices.upsert("BNB", dec!(650), PriceSource::Ws);

    let fx = FxService::new(db.clone(), "http://127.0.0.1:1".into(), dec!(15800));
    let quotes = QuoteService::new(db.clone(), prices.clone(), fx, dec!(5));

    let gateway = Arc::new(MockGateway::new());
    let (payouts, payout_rx) = PayoutSender::channel();
    let engine = Arc::new(OrderEngine::new(
        db.clone(),
        gateway.clone(),
        quotes.clone(),
        payouts,
    ));

    let chain = Arc::new(MockChain::new());
    let wallet = Arc::new(HotWallet::new(kv.clone(), chain.clone()));
    wallet.init(&db, PASSWORD).await.expect("wallet init");

    let notifier = Arc::new(LogNotifier);
    let referrals = Arc::new(ReferralEngine::new(
        db.clone(),
        notifier.clone(),
        ReferralConfig {
            reward_idr: 10_000,
            threshold: 1,
            bonus_every: 2,
        },
    ));
    let deps = Arc::new(PayoutDeps {
        db: db.clone(),
        wallet,
        notifier,
        referrals: referrals.clone(),
    });

    TestEnv {
        db,
        kv,
        engine,
        deps,
        chain,
        gateway,
        prices,
        quotes,
        referrals,
        payout_rx,
    }
}

async fn seed(db: &Db) {
    let conn = db.lock().await;
    let now = chrono::Utc::now().timestamp();

    for (id, code) in [(BUYER, "ALICE1"), (BUYER_2, "CAROL1")] {
        users::insert(
            &conn,
            &User {
                id: id.into(),
                email: None,
                chat_id: Some(format!("chat-{id}")),
                referral_code: code.into(),
                referred_by: None,
                role: Role::User,
                created_at: now,
            },
        )
        .unwrap();
    }

    chains::insert(
        &conn,
        &ChainSpec {
            slug: "bsc".into(),
            kind: ChainKind::Evm,
            rpc_url: "http://127.0.0.1:1".into(),
            explorer_url: None,
            chain_id: Some(56),
            encrypted_key: keys::encrypt_key_blob(TEST_KEY, PASSWORD).unwrap(),
            confirmations: 3,
            active: true,
        },
    )
    .unwrap();

    tokens::insert(
        &conn,
        &Token {
            chain: "bsc".into(),
            symbol: "BNB".into(),
            is_native: true,
            decimals: 18,
            markup_percent: None,
            active: true,
        },
    )
    .unwrap();

    inventory::set_balance(&conn, "bsc", "BNB", dec!(10)).unwrap();
    settings::set(&conn, "usd_idr_rate", "15800").unwrap();
}

// ── Helpers ─────────────────────────────────────────────────────────

pub async fn order_row(db: &Db, id: &str) -> kios::model::Order {
    let conn = db.lock().await;
    kios::store::orders::get(&conn, id).unwrap().expect("order")
}

pub async fn inventory_row(db: &Db) -> inventory::InventoryRow {
    let conn = db.lock().await;
    inventory::get(&conn, "bsc", "BNB").unwrap().expect("row")
}

pub async fn exec(db: &Db, sql: &str, params: impl rusqlite::Params) {
    let conn = db.lock().await;
    conn.execute(sql, params).unwrap();
}

/// Apply a webhook body the way the reconciler would after signature
/// verification.
pub fn webhook_payload(
    midtrans_id: &str,
    transaction_status: &str,
    gross_amount: &str,
) -> kios::gateway::webhook::WebhookPayload {
    kios::gateway::webhook::WebhookPayload {
        order_id: midtrans_id.to_string(),
        status_code: "200".into(),
        gross_amount: gross_amount.to_string(),
        signature_key: "verified-upstream".into(),
        transaction_status: transaction_status.to_string(),
        fraud_status: None,
    }
}
