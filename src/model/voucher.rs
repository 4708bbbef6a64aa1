use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
    pub id: String,
    pub code: String,
    /// Owner-scoped vouchers are usable only by this user; `None` means
    /// public.
    pub owner_user_id: Option<String>,
    pub value_idr: i64,
    pub min_amount_idr: i64,
    pub max_usage: i64,
    pub usage_count: i64,
    pub active: bool,
    pub expires_at: Option<i64>,
}

impl Voucher {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|t| t < now)
    }
}
