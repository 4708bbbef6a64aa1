use rusqlite::{Connection, params};

/// Append a row to the audit channel. Fatal fund anomalies land here so an
/// operator can reconcile them even if log output is lost.
pub fn record(
    conn: &Connection,
    level: &str,
    tag: &str,
    order_id: Option<&str>,
    detail: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO audit_log (level, tag, order_id, detail) VALUES (?1, ?2, ?3, ?4)",
        params![level, tag, order_id, detail],
    )?;
    Ok(())
}
