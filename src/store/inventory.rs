use rusqlite::{Connection, OptionalExtension, params};
use rust_decimal::Decimal;
use tracing::error;

use super::{audit, dec_from_sql};
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone)]
pub struct InventoryRow {
    pub chain: String,
    pub symbol: String,
    pub balance: Decimal,
    pub reserved: Decimal,
}

impl InventoryRow {
    pub fn available(&self) -> Decimal {
        self.balance - self.reserved
    }
}

pub fn ensure_row(conn: &Connection, chain: &str, symbol: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO inventory (chain, symbol) VALUES (?1, ?2)",
        params![chain, symbol],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, chain: &str, symbol: &str) -> rusqlite::Result<Option<InventoryRow>> {
    conn.query_row(
        "SELECT chain, symbol, balance, reserved FROM inventory WHERE chain = ?1 AND symbol = ?2",
        params![chain, symbol],
        |row| {
            Ok(InventoryRow {
                chain: row.get(0)?,
                symbol: row.get(1)?,
                balance: dec_from_sql(&row.get::<_, String>(2)?)?,
                reserved: dec_from_sql(&row.get::<_, String>(3)?)?,
            })
        },
    )
    .optional()
}

/// Reserve `amount` if `balance − reserved` covers it.
///
/// Must run inside the caller's write transaction: the read and write pair
/// is atomic only under the transaction, which also couples the
/// reservation to order insertion so rollback releases both.
pub fn reserve(
    conn: &Connection,
    chain: &str,
    symbol: &str,
    amount: Decimal,
) -> EngineResult<bool> {
    let Some(row) = get(conn, chain, symbol)? else {
        return Ok(false);
    };
    if row.available() < amount {
        return Ok(false);
    }
    let next = row.reserved + amount;
    conn.execute(
        "UPDATE inventory SET reserved = ?3 WHERE chain = ?1 AND symbol = ?2",
        params![chain, symbol, next.to_string()],
    )?;
    Ok(true)
}

/// Release a reservation, floored at zero. A negative residue means a
/// concurrent anomaly: reset to zero and record it at fatal level.
pub fn release(
    conn: &Connection,
    chain: &str,
    symbol: &str,
    amount: Decimal,
) -> EngineResult<()> {
    let Some(row) = get(conn, chain, symbol)? else {
        return Ok(());
    };

    if row.reserved < Decimal::ZERO {
        error!(chain, symbol, reserved = %row.reserved, anomaly = "negative_reserved",
               "inventory reserved below zero, resetting");
        audit::record(conn, "FATAL", "inventory_negative_reserved", None,
                      &format!("{chain}/{symbol} reserved={}", row.reserved))?;
        conn.execute(
            "UPDATE inventory SET reserved = '0' WHERE chain = ?1 AND symbol = ?2",
            params![chain, symbol],
        )?;
        return Ok(());
    }

    let next = (row.reserved - amount).max(Decimal::ZERO);
    conn.execute(
        "UPDATE inventory SET reserved = ?3 WHERE chain = ?1 AND symbol = ?2",
        params![chain, symbol, next.to_string()],
    )?;
    Ok(())
}

/// Decrement both `balance` and `reserved` after a send. Never rolled
/// back: the money already left the wallet. Negative post-state is a
/// fatal audit event only.
pub fn deduct(
    conn: &Connection,
    chain: &str,
    symbol: &str,
    amount: Decimal,
) -> EngineResult<()> {
    let Some(row) = get(conn, chain, symbol)? else {
        return Err(EngineError::Critical(format!(
            "deduct on missing inventory row {chain}/{symbol}"
        )));
    };

    let balance = row.balance - amount;
    let reserved = row.reserved - amount;
    conn.execute(
        "UPDATE inventory SET balance = ?3, reserved = ?4 WHERE chain = ?1 AND symbol = ?2",
        params![chain, symbol, balance.to_string(), reserved.to_string()],
    )?;

    if balance < Decimal::ZERO || reserved < Decimal::ZERO {
        error!(chain, symbol, %balance, %reserved, anomaly = "negative_inventory",
               "inventory negative after deduct");
        audit::record(conn, "FATAL", "inventory_negative_after_deduct", None,
                      &format!("{chain}/{symbol} balance={balance} reserved={reserved}"))?;
    }
    Ok(())
}

/// Overwrite `balance` from the observed on-chain hot-wallet balance.
/// `reserved` is untouched.
pub fn set_balance(
    conn: &Connection,
    chain: &str,
    symbol: &str,
    balance: Decimal,
) -> rusqlite::Result<()> {
    ensure_row(conn, chain, symbol)?;
    conn.execute(
        "UPDATE inventory SET balance = ?3 WHERE chain = ?1 AND symbol = ?2",
        params![chain, symbol, balance.to_string()],
    )?;
    Ok(())
}
