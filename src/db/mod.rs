use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tokio::sync::Mutex;

pub type Db = Arc<Mutex<Connection>>;

pub fn open(path: &std::path::Path) -> Result<Db> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("creating db directory")?;
        }
    }

    let conn = Connection::open(path)
        .with_context(|| format!("opening sqlite at {}", path.display()))?;

    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
    migrate(&conn)?;

    Ok(Arc::new(Mutex::new(conn)))
}

/// In-memory database for tests.
pub fn open_in_memory() -> Result<Db> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    migrate(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id             TEXT PRIMARY KEY,
            email          TEXT UNIQUE,
            chat_id        TEXT UNIQUE,
            referral_code  TEXT UNIQUE NOT NULL,
            referred_by    TEXT REFERENCES users(id),
            role           TEXT NOT NULL DEFAULT 'USER',
            created_at     INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS chains (
            slug           TEXT PRIMARY KEY,
            kind           TEXT NOT NULL,
            rpc_url        TEXT NOT NULL,
            explorer_url   TEXT,
            chain_id       INTEGER,
            encrypted_key  TEXT NOT NULL,
            confirmations  INTEGER NOT NULL DEFAULT 1,
            active         INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS tokens (
            chain           TEXT NOT NULL REFERENCES chains(slug),
            symbol          TEXT NOT NULL,
            is_native       INTEGER NOT NULL DEFAULT 0,
            decimals        INTEGER NOT NULL,
            markup_percent  TEXT,
            active          INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (chain, symbol)
        );

        CREATE TABLE IF NOT EXISTS inventory (
            chain     TEXT NOT NULL,
            symbol    TEXT NOT NULL,
            balance   TEXT NOT NULL DEFAULT '0',
            reserved  TEXT NOT NULL DEFAULT '0',
            PRIMARY KEY (chain, symbol)
        );

        CREATE TABLE IF NOT EXISTS vouchers (
            id              TEXT PRIMARY KEY,
            code            TEXT UNIQUE NOT NULL,
            owner_user_id   TEXT REFERENCES users(id),
            value_idr       INTEGER NOT NULL,
            min_amount_idr  INTEGER NOT NULL DEFAULT 0,
            max_usage       INTEGER NOT NULL DEFAULT 1,
            usage_count     INTEGER NOT NULL DEFAULT 0,
            active          INTEGER NOT NULL DEFAULT 1,
            expires_at      INTEGER,
            created_at      INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS orders (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL REFERENCES users(id),
            chain           TEXT NOT NULL,
            symbol          TEXT NOT NULL,
            amount_idr      INTEGER NOT NULL,
            amount_token    TEXT NOT NULL,
            markup_percent  TEXT NOT NULL,
            wallet_address  TEXT NOT NULL,
            voucher_id      TEXT REFERENCES vouchers(id),
            status          TEXT NOT NULL,
            payment_method  TEXT,
            fee_idr         INTEGER NOT NULL DEFAULT 0,
            total_pay       INTEGER NOT NULL DEFAULT 0,
            tx_hash         TEXT,
            midtrans_id     TEXT,
            payment_url     TEXT,
            created_at      INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at      INTEGER NOT NULL DEFAULT (unixepoch()),
            paid_at         INTEGER,
            completed_at    INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_orders_user_status ON orders(user_id, status);
        CREATE INDEX IF NOT EXISTS idx_orders_status_created ON orders(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_orders_midtrans ON orders(midtrans_id);

        CREATE TABLE IF NOT EXISTS referrals (
            id            TEXT PRIMARY KEY,
            referrer_id   TEXT NOT NULL REFERENCES users(id),
            referee_id    TEXT UNIQUE NOT NULL REFERENCES users(id),
            is_valid      INTEGER NOT NULL DEFAULT 0,
            reward_given  INTEGER NOT NULL DEFAULT 0,
            validated_at  INTEGER,
            created_at    INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS settings (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            updated_at INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            at        INTEGER NOT NULL DEFAULT (unixepoch()),
            level     TEXT NOT NULL,
            tag       TEXT NOT NULL,
            order_id  TEXT,
            detail    TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}
