use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::model::{ChainKind, ChainSpec};

const COLS: &str = "slug, kind, rpc_url, explorer_url, chain_id, encrypted_key, confirmations, active";

fn map_chain(row: &Row<'_>) -> rusqlite::Result<ChainSpec> {
    let slug: String = row.get(0)?;
    let kind_raw: String = row.get(1)?;
    let stored_confirmations: i64 = row.get(6)?;
    Ok(ChainSpec {
        kind: ChainKind::parse(&kind_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown chain kind {kind_raw}").into(),
            )
        })?,
        rpc_url: row.get(2)?,
        explorer_url: row.get(3)?,
        chain_id: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        encrypted_key: row.get(5)?,
        confirmations: if stored_confirmations > 0 {
            stored_confirmations as u64
        } else {
            ChainSpec::default_confirmations(&slug)
        },
        active: row.get::<_, i64>(7)? != 0,
        slug,
    })
}

pub fn insert(conn: &Connection, c: &ChainSpec) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO chains (slug, kind, rpc_url, explorer_url, chain_id, encrypted_key,
                             confirmations, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            c.slug,
            c.kind.as_str(),
            c.rpc_url,
            c.explorer_url,
            c.chain_id.map(|v| v as i64),
            c.encrypted_key,
            c.confirmations as i64,
            c.active as i64,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, slug: &str) -> rusqlite::Result<Option<ChainSpec>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM chains WHERE slug = ?1"),
        params![slug],
        map_chain,
    )
    .optional()
}

pub fn list_active(conn: &Connection) -> rusqlite::Result<Vec<ChainSpec>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLS} FROM chains WHERE active = 1"))?;
    let rows = stmt.query_map([], map_chain)?;
    rows.collect()
}
