use std::str::FromStr;

use anyhow::{Context, Result, bail};
use rust_decimal::Decimal;

/// Process configuration, loaded once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: std::path::PathBuf,
    pub bind_addr: String,
    pub cors_origins: Vec<String>,

    /// Key-derivation password for signing-key blobs. Minimum 32 chars.
    pub wallet_password: String,

    pub midtrans_server_key: String,
    pub midtrans_production: bool,

    pub price_rest_base: String,
    pub price_ws_url: String,
    pub fx_url: String,

    pub default_markup_percent: Decimal,
    pub default_usd_idr: Decimal,

    pub referral_reward_idr: i64,
    pub referral_threshold: i64,
    pub referral_bonus_every: i64,

    pub jwt_secret: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let wallet_password =
            required("WALLET_KEY_PASSWORD").context("reading WALLET_KEY_PASSWORD")?;
        if wallet_password.len() < 32 {
            bail!("WALLET_KEY_PASSWORD must be at least 32 characters");
        }

        let cfg = Config {
            db_path: std::env::var("KIOS_DB_PATH")
                .unwrap_or_else(|_| "kios.db".into())
                .into(),
            bind_addr: std::env::var("KIOS_BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8080".into()),
            cors_origins: std::env::var("KIOS_CORS_ORIGINS")
                .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
                .unwrap_or_default(),
            wallet_password,
            midtrans_server_key: required("MIDTRANS_SERVER_KEY")?,
            midtrans_production: env_bool("MIDTRANS_PRODUCTION", false),
            price_rest_base: std::env::var("PRICE_REST_BASE")
                .unwrap_or_else(|_| "https://api.binance.com".into()),
            price_ws_url: std::env::var("PRICE_WS_URL")
                .unwrap_or_else(|_| "wss://stream.binance.com:9443/ws/!miniTicker@arr".into()),
            fx_url: std::env::var("FX_URL")
                .unwrap_or_else(|_| "https://open.er-api.com/v6/latest/USD".into()),
            default_markup_percent: env_decimal("DEFAULT_MARKUP_PERCENT", "5")?,
            default_usd_idr: env_decimal("DEFAULT_USD_IDR", "15800")?,
            referral_reward_idr: env_i64("REFERRAL_REWARD_IDR", 10_000)?,
            referral_threshold: env_i64("REFERRAL_THRESHOLD", 1)?,
            referral_bonus_every: env_i64("REFERRAL_BONUS_EVERY", 20)?,
            jwt_secret: required("JWT_SECRET")?,
        };
        Ok(cfg)
    }
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set"))
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> Result<i64> {
    match std::env::var(name) {
        Ok(v) => v.parse().with_context(|| format!("parsing {name}")),
        Err(_) => Ok(default),
    }
}

fn env_decimal(name: &str, default: &str) -> Result<Decimal> {
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(&raw).with_context(|| format!("parsing {name}"))
}
