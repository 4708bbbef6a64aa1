use rusqlite::{Connection, OptionalExtension, Row, params};

use super::dec_from_sql;
use crate::model::{Order, OrderStatus, PaymentMethod};

const COLS: &str = "id, user_id, chain, symbol, amount_idr, amount_token, markup_percent, \
                    wallet_address, voucher_id, status, payment_method, fee_idr, total_pay, \
                    tx_hash, midtrans_id, payment_url, created_at, updated_at, paid_at, completed_at";

fn map_order(row: &Row<'_>) -> rusqlite::Result<Order> {
    let status_raw: String = row.get(9)?;
    let method_raw: Option<String> = row.get(10)?;
    Ok(Order {
        id: row.get(0)?,
        user_id: row.get(1)?,
        chain: row.get(2)?,
        symbol: row.get(3)?,
        amount_idr: row.get(4)?,
        amount_token: dec_from_sql(&row.get::<_, String>(5)?)?,
        markup_percent: dec_from_sql(&row.get::<_, String>(6)?)?,
        wallet_address: row.get(7)?,
        voucher_id: row.get(8)?,
        status: OrderStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                9,
                rusqlite::types::Type::Text,
                format!("unknown order status {status_raw}").into(),
            )
        })?,
        payment_method: method_raw.as_deref().and_then(PaymentMethod::parse),
        fee_idr: row.get(11)?,
        total_pay: row.get(12)?,
        tx_hash: row.get(13)?,
        midtrans_id: row.get(14)?,
        payment_url: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
        paid_at: row.get(18)?,
        completed_at: row.get(19)?,
    })
}

pub fn insert(conn: &Connection, o: &Order) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO orders (id, user_id, chain, symbol, amount_idr, amount_token, markup_percent,
                             wallet_address, voucher_id, status, fee_idr, total_pay,
                             created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            o.id,
            o.user_id,
            o.chain,
            o.symbol,
            o.amount_idr,
            o.amount_token.to_string(),
            o.markup_percent.to_string(),
            o.wallet_address,
            o.voucher_id,
            o.status.as_str(),
            o.fee_idr,
            o.total_pay,
            o.created_at,
            o.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Order>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM orders WHERE id = ?1"),
        params![id],
        map_order,
    )
    .optional()
}

pub fn find_by_midtrans(conn: &Connection, midtrans_id: &str) -> rusqlite::Result<Option<Order>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM orders WHERE midtrans_id = ?1"),
        params![midtrans_id],
        map_order,
    )
    .optional()
}

pub fn pending_by_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<Order>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM orders WHERE user_id = ?1 AND status = 'PENDING' LIMIT 1"),
        params![user_id],
        map_order,
    )
    .optional()
}

pub fn count_success_by_user(conn: &Connection, user_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM orders WHERE user_id = ?1 AND status = 'SUCCESS'",
        params![user_id],
        |row| row.get(0),
    )
}

// ── Conditional transitions ─────────────────────────────────────────
// Each returns whether this caller effected the transition. A `false`
// means another writer got there first; callers never retry blindly.

/// Attach a freshly charged payment instrument. Only while PENDING.
pub fn attach_payment(
    conn: &Connection,
    id: &str,
    midtrans_id: &str,
    payment_url: Option<&str>,
    method: PaymentMethod,
    fee_idr: i64,
    total_pay: i64,
    now: i64,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE orders SET midtrans_id = ?2, payment_url = ?3, payment_method = ?4,
                           fee_idr = ?5, total_pay = ?6, updated_at = ?7
         WHERE id = ?1 AND status = 'PENDING'",
        params![id, midtrans_id, payment_url, method.as_str(), fee_idr, total_pay, now],
    )?;
    Ok(changed > 0)
}

pub fn mark_paid(conn: &Connection, id: &str, now: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE orders SET status = 'PAID', paid_at = ?2, updated_at = ?2
         WHERE id = ?1 AND status = 'PENDING'",
        params![id, now],
    )?;
    Ok(changed > 0)
}

pub fn mark_cancelled(conn: &Connection, id: &str, now: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE orders SET status = 'CANCELLED', updated_at = ?2
         WHERE id = ?1 AND status = 'PENDING'",
        params![id, now],
    )?;
    Ok(changed > 0)
}

pub fn mark_expired(conn: &Connection, id: &str, now: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE orders SET status = 'EXPIRED', updated_at = ?2
         WHERE id = ?1 AND status = 'PENDING'",
        params![id, now],
    )?;
    Ok(changed > 0)
}

/// The payout lock: `{PAID, tx_hash NULL} → PROCESSING`. Winning this
/// update is the only way to own the send for an order.
pub fn claim_processing(conn: &Connection, id: &str, now: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE orders SET status = 'PROCESSING', updated_at = ?2
         WHERE id = ?1 AND status = 'PAID' AND tx_hash IS NULL",
        params![id, now],
    )?;
    Ok(changed > 0)
}

/// Steal a zombie PROCESSING lock, guarded on the exact `updated_at` the
/// caller observed. Optimistic: a second thief matches zero rows.
pub fn steal_processing(
    conn: &Connection,
    id: &str,
    seen_updated_at: i64,
    now: i64,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE orders SET updated_at = ?3
         WHERE id = ?1 AND status = 'PROCESSING' AND updated_at = ?2",
        params![id, seen_updated_at, now],
    )?;
    Ok(changed > 0)
}

/// Finalize to SUCCESS with the send hash. Accepts PAID as the prior
/// state too so the recovery and operator paths share one barrier.
pub fn finalize_success(
    conn: &Connection,
    id: &str,
    tx_hash: &str,
    now: i64,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE orders SET status = 'SUCCESS', tx_hash = ?2, completed_at = ?3, updated_at = ?3
         WHERE id = ?1 AND status IN ('PROCESSING', 'PAID')",
        params![id, tx_hash, now],
    )?;
    Ok(changed > 0)
}

pub fn mark_failed(conn: &Connection, id: &str, now: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE orders SET status = 'FAILED', updated_at = ?2
         WHERE id = ?1 AND status = 'PROCESSING'",
        params![id, now],
    )?;
    Ok(changed > 0)
}

pub fn list_by_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<Order>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM orders WHERE user_id = ?1 ORDER BY created_at DESC"
    ))?;
    let rows = stmt.query_map(params![user_id], map_order)?;
    rows.collect()
}

// ── Sweep queries ───────────────────────────────────────────────────

pub fn list_pending_older_than(conn: &Connection, cutoff: i64) -> rusqlite::Result<Vec<Order>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM orders WHERE status = 'PENDING' AND created_at < ?1"
    ))?;
    let rows = stmt.query_map(params![cutoff], map_order)?;
    rows.collect()
}

/// PAID orders that never made it into the payout queue: paid before
/// `cutoff` and still without a tx hash.
pub fn list_paid_unsent(conn: &Connection, cutoff: i64) -> rusqlite::Result<Vec<Order>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM orders
         WHERE status = 'PAID' AND tx_hash IS NULL AND paid_at < ?1"
    ))?;
    let rows = stmt.query_map(params![cutoff], map_order)?;
    rows.collect()
}
