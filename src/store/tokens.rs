use rusqlite::{Connection, OptionalExtension, Row, params};

use super::dec_from_sql;
use crate::model::Token;

const COLS: &str = "chain, symbol, is_native, decimals, markup_percent, active";

fn map_token(row: &Row<'_>) -> rusqlite::Result<Token> {
    let markup: Option<String> = row.get(4)?;
    Ok(Token {
        chain: row.get(0)?,
        symbol: row.get(1)?,
        is_native: row.get::<_, i64>(2)? != 0,
        decimals: row.get::<_, i64>(3)? as u8,
        markup_percent: markup.as_deref().map(dec_from_sql).transpose()?,
        active: row.get::<_, i64>(5)? != 0,
    })
}

pub fn insert(conn: &Connection, t: &Token) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO tokens (chain, symbol, is_native, decimals, markup_percent, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            t.chain,
            t.symbol,
            t.is_native as i64,
            t.decimals as i64,
            t.markup_percent.map(|d| d.to_string()),
            t.active as i64,
        ],
    )?;
    Ok(())
}

/// The chain's native token, if registered. At most one exists.
pub fn get_native(conn: &Connection, chain: &str) -> rusqlite::Result<Option<Token>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM tokens WHERE chain = ?1 AND is_native = 1 AND active = 1"),
        params![chain],
        map_token,
    )
    .optional()
}

/// Distinct native symbols across active chains, for price tracking.
pub fn native_symbols(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT symbol FROM tokens WHERE is_native = 1 AND active = 1",
    )?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}
