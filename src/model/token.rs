use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A sellable token on a chain. At most one native token per chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub chain: String,
    pub symbol: String,
    pub is_native: bool,
    pub decimals: u8,
    /// Per-token markup override; `None` falls back to the global setting.
    pub markup_percent: Option<Decimal>,
    pub active: bool,
}
