use rusqlite::{Connection, OptionalExtension, params};

use super::now_ts;
use crate::error::{EngineError, EngineResult};
use crate::model::Voucher;

fn map_voucher(row: &rusqlite::Row<'_>) -> rusqlite::Result<Voucher> {
    Ok(Voucher {
        id: row.get(0)?,
        code: row.get(1)?,
        owner_user_id: row.get(2)?,
        value_idr: row.get(3)?,
        min_amount_idr: row.get(4)?,
        max_usage: row.get(5)?,
        usage_count: row.get(6)?,
        active: row.get::<_, i64>(7)? != 0,
        expires_at: row.get(8)?,
    })
}

const COLS: &str =
    "id, code, owner_user_id, value_idr, min_amount_idr, max_usage, usage_count, active, expires_at";

pub fn get_by_code(conn: &Connection, code: &str) -> rusqlite::Result<Option<Voucher>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM vouchers WHERE code = ?1"),
        params![code],
        map_voucher,
    )
    .optional()
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Voucher>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM vouchers WHERE id = ?1"),
        params![id],
        map_voucher,
    )
    .optional()
}

pub fn create(conn: &Connection, v: &Voucher) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO vouchers (id, code, owner_user_id, value_idr, min_amount_idr, max_usage,
                               usage_count, active, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            v.id,
            v.code,
            v.owner_user_id,
            v.value_idr,
            v.min_amount_idr,
            v.max_usage,
            v.usage_count,
            v.active as i64,
            v.expires_at,
        ],
    )?;
    Ok(())
}

/// Run every validation without consuming quota. Used by UIs before
/// confirmation, and as the first half of `validate_and_reserve`.
pub fn peek(
    conn: &Connection,
    code: &str,
    user_id: &str,
    order_amount_idr: i64,
) -> EngineResult<Voucher> {
    let voucher = get_by_code(conn, code)?
        .ok_or_else(|| EngineError::VoucherRejected("unknown voucher code".into()))?;

    if !voucher.active {
        return Err(EngineError::VoucherRejected("voucher is inactive".into()));
    }
    if voucher.is_expired(now_ts()) {
        return Err(EngineError::VoucherRejected("voucher has expired".into()));
    }
    if let Some(owner) = &voucher.owner_user_id {
        if owner != user_id {
            return Err(EngineError::VoucherRejected(
                "voucher belongs to another user".into(),
            ));
        }
    }
    if order_amount_idr < voucher.min_amount_idr {
        return Err(EngineError::VoucherRejected(format!(
            "minimum order is {} IDR",
            voucher.min_amount_idr
        )));
    }

    // Public multi-use vouchers: one successful redemption per user, and no
    // doubling up while an order holding the voucher is still in flight.
    if voucher.owner_user_id.is_none() {
        let redeemed: i64 = conn.query_row(
            "SELECT COUNT(*) FROM orders WHERE voucher_id = ?1 AND user_id = ?2 AND status = 'SUCCESS'",
            params![voucher.id, user_id],
            |row| row.get(0),
        )?;
        if redeemed > 0 {
            return Err(EngineError::VoucherRejected(
                "voucher already redeemed".into(),
            ));
        }
        let in_flight: i64 = conn.query_row(
            "SELECT COUNT(*) FROM orders WHERE voucher_id = ?1 AND user_id = ?2
             AND status IN ('PENDING', 'PAID', 'PROCESSING')",
            params![voucher.id, user_id],
            |row| row.get(0),
        )?;
        if in_flight > 0 {
            return Err(EngineError::VoucherRejected(
                "an order with this voucher is already in progress".into(),
            ));
        }
    }

    Ok(voucher)
}

/// Validate and consume one use. The increment is conditional on
/// `usage_count < max_usage`; a zero-row update means the quota ran out
/// between read and write.
pub fn validate_and_reserve(
    conn: &Connection,
    code: &str,
    user_id: &str,
    order_amount_idr: i64,
) -> EngineResult<Voucher> {
    let voucher = peek(conn, code, user_id, order_amount_idr)?;

    let changed = conn.execute(
        "UPDATE vouchers SET usage_count = usage_count + 1
         WHERE id = ?1 AND usage_count < max_usage",
        params![voucher.id],
    )?;
    if changed == 0 {
        return Err(EngineError::VoucherQuotaExceeded);
    }
    Ok(voucher)
}

/// Atomic decrement with a floor predicate; a zero-row update is ignored.
pub fn release(conn: &Connection, voucher_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE vouchers SET usage_count = usage_count - 1
         WHERE id = ?1 AND usage_count > 0",
        params![voucher_id],
    )?;
    Ok(())
}

/// Deactivate vouchers past their expiry. Returns how many were swept.
pub fn deactivate_expired(conn: &Connection, now: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE vouchers SET active = 0
         WHERE active = 1 AND expires_at IS NOT NULL AND expires_at < ?1",
        params![now],
    )
}
