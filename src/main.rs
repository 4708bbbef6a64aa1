use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use kios::api::{self, state::{AppState, Limits}};
use kios::chains::evm::EvmClient;
use kios::config::Config;
use kios::convo::ConvoService;
use kios::gateway::Midtrans;
use kios::jobs::{self, JobContext};
use kios::kv::Kv;
use kios::notify::LogNotifier;
use kios::order::{OrderEngine, PayoutDeps, PayoutSender};
use kios::price::{FxService, PriceCache, PriceRest, Tracked, stream};
use kios::quote::QuoteService;
use kios::referral::{ReferralConfig, ReferralEngine};
use kios::wallet::HotWallet;

mod cli;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = cli::Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        cli::Command::Serve => rt.block_on(serve()),
        cli::Command::SweepExpired => rt.block_on(sweep_once()),
        cli::Command::EncryptKey => encrypt_key(),
    }
}

async fn serve() -> Result<()> {
    let cfg = Config::from_env().context("loading configuration")?;
    let db = kios::db::open(&cfg.db_path)?;
    let kv = Arc::new(Kv::new());

    // Price pipeline.
    let rest = PriceRest::new(cfg.price_rest_base.clone());
    let prices = PriceCache::new(kv.clone(), rest.clone());
    let tracked = Tracked::new();
    tracked.refresh_from_db(&db).await?;
    tokio::spawn(stream::run(
        prices.clone(),
        tracked.clone(),
        cfg.price_ws_url.clone(),
    ));
    let fx = FxService::new(db.clone(), cfg.fx_url.clone(), cfg.default_usd_idr);

    // Hot wallet.
    let wallet = Arc::new(HotWallet::new(kv.clone(), Arc::new(EvmClient)));
    wallet.init(&db, &cfg.wallet_password).await?;

    // Engines.
    let notifier = Arc::new(LogNotifier);
    let referrals = Arc::new(ReferralEngine::new(
        db.clone(),
        notifier.clone(),
        ReferralConfig {
            reward_idr: cfg.referral_reward_idr,
            threshold: cfg.referral_threshold,
            bonus_every: cfg.referral_bonus_every,
        },
    ));
    let gateway = Arc::new(Midtrans::new(
        &cfg.midtrans_server_key,
        cfg.midtrans_production,
    ));
    let quotes = QuoteService::new(
        db.clone(),
        prices.clone(),
        fx.clone(),
        cfg.default_markup_percent,
    );
    let (payouts, payout_rx) = PayoutSender::channel();
    let engine = Arc::new(OrderEngine::new(
        db.clone(),
        gateway,
        quotes.clone(),
        payouts,
    ));
    let convo = Arc::new(ConvoService::new(
        kv.clone(),
        db.clone(),
        engine.clone(),
        quotes.clone(),
    ));

    jobs::spawn_payout_consumer(
        payout_rx,
        Arc::new(PayoutDeps {
            db: db.clone(),
            wallet: wallet.clone(),
            notifier,
            referrals: referrals.clone(),
        }),
    );
    jobs::spawn_all(JobContext {
        db: db.clone(),
        prices,
        rest,
        tracked,
        wallet,
        engine: engine.clone(),
        referrals,
    });

    let state = AppState {
        db,
        engine,
        quotes,
        convo,
        midtrans_server_key: cfg.midtrans_server_key.clone(),
        jwt_secret: cfg.jwt_secret.clone(),
        limits: Arc::new(Limits::new()),
    };
    api::serve(state, &cfg.bind_addr, &cfg.cors_origins).await
}

async fn sweep_once() -> Result<()> {
    let cfg = Config::from_env().context("loading configuration")?;
    let db = kios::db::open(&cfg.db_path)?;
    let kv = Arc::new(Kv::new());

    let rest = PriceRest::new(cfg.price_rest_base.clone());
    let prices = PriceCache::new(kv, rest);
    let fx = FxService::new(db.clone(), cfg.fx_url.clone(), cfg.default_usd_idr);
    let quotes = QuoteService::new(db.clone(), prices, fx, cfg.default_markup_percent);
    let gateway = Arc::new(Midtrans::new(
        &cfg.midtrans_server_key,
        cfg.midtrans_production,
    ));
    let (payouts, _rx) = PayoutSender::channel();
    let engine = OrderEngine::new(db, gateway, quotes, payouts);

    let expired = kios::order::expiry::expire_sweep(&engine).await?;
    info!(expired, "one-shot expiry sweep finished");
    Ok(())
}

fn encrypt_key() -> Result<()> {
    let cfg = Config::from_env().context("loading configuration")?;
    let mut key = String::new();
    std::io::stdin()
        .read_to_string(&mut key)
        .context("reading key from stdin")?;
    let blob = kios::wallet::keys::encrypt_key_blob(key.trim(), &cfg.wallet_password)?;
    println!("{blob}");
    Ok(())
}
