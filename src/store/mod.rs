//! Data access over SQLite. Functions take `&Connection` so they compose
//! inside a caller's transaction as well as standalone. State transitions
//! that decide ownership are conditional `UPDATE`s whose changed-row count
//! is the verdict.

pub mod audit;
pub mod chains;
pub mod inventory;
pub mod orders;
pub mod referrals;
pub mod settings;
pub mod tokens;
pub mod users;
pub mod vouchers;

use std::str::FromStr;

use rust_decimal::Decimal;

/// Decimals are persisted as canonical strings.
pub(crate) fn dec_from_sql(s: &str) -> rusqlite::Result<Decimal> {
    Decimal::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
