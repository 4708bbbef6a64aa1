use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::model::{Role, User};

const COLS: &str = "id, email, chat_id, referral_code, referred_by, role, created_at";

fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let role_raw: String = row.get(5)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        chat_id: row.get(2)?,
        referral_code: row.get(3)?,
        referred_by: row.get(4)?,
        role: Role::parse(&role_raw).unwrap_or(Role::User),
        created_at: row.get(6)?,
    })
}

pub fn insert(conn: &Connection, u: &User) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO users (id, email, chat_id, referral_code, referred_by, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            u.id,
            u.email,
            u.chat_id,
            u.referral_code,
            u.referred_by,
            u.role.as_str(),
            u.created_at,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM users WHERE id = ?1"),
        params![id],
        map_user,
    )
    .optional()
}

pub fn get_by_chat_id(conn: &Connection, chat_id: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM users WHERE chat_id = ?1"),
        params![chat_id],
        map_user,
    )
    .optional()
}

pub fn get_by_referral_code(conn: &Connection, code: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM users WHERE referral_code = ?1"),
        params![code],
        map_user,
    )
    .optional()
}
