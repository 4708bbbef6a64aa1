use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::model::Referral;

const COLS: &str = "id, referrer_id, referee_id, is_valid, reward_given, validated_at, created_at";

fn map_referral(row: &Row<'_>) -> rusqlite::Result<Referral> {
    Ok(Referral {
        id: row.get(0)?,
        referrer_id: row.get(1)?,
        referee_id: row.get(2)?,
        is_valid: row.get::<_, i64>(3)? != 0,
        reward_given: row.get::<_, i64>(4)? != 0,
        validated_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub fn create(conn: &Connection, r: &Referral) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO referrals (id, referrer_id, referee_id, is_valid, reward_given, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            r.id,
            r.referrer_id,
            r.referee_id,
            r.is_valid as i64,
            r.reward_given as i64,
            r.created_at,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Referral>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM referrals WHERE id = ?1"),
        params![id],
        map_referral,
    )
    .optional()
}

pub fn get_by_referee(conn: &Connection, referee_id: &str) -> rusqlite::Result<Option<Referral>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM referrals WHERE referee_id = ?1"),
        params![referee_id],
        map_referral,
    )
    .optional()
}

/// Conditional `is_valid false → true`.
pub fn mark_valid(conn: &Connection, id: &str, now: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE referrals SET is_valid = 1, validated_at = ?2
         WHERE id = ?1 AND is_valid = 0",
        params![id, now],
    )?;
    Ok(changed > 0)
}

/// Conditional `reward_given false → true` — the single atomic barrier
/// deciding who owns the reward grant.
pub fn mark_reward_given(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE referrals SET reward_given = 1 WHERE id = ?1 AND reward_given = 0",
        params![id],
    )?;
    Ok(changed > 0)
}

pub fn count_valid_by_referrer(conn: &Connection, referrer_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM referrals WHERE referrer_id = ?1 AND is_valid = 1",
        params![referrer_id],
        |row| row.get(0),
    )
}

/// Referrals that still need validation or granting, for the sweep.
pub fn list_unsettled(conn: &Connection) -> rusqlite::Result<Vec<Referral>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM referrals WHERE is_valid = 0 OR reward_given = 0"
    ))?;
    let rows = stmt.query_map([], map_referral)?;
    rows.collect()
}
