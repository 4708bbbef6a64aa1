use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Where a chat user is in the interactive checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Idle,
    AwaitingChain,
    AwaitingAmount,
    AwaitingCustomAmount,
    AwaitingWallet,
    AwaitingVoucher,
    AwaitingConfirmation,
    AwaitingPaymentMethod,
    AwaitingEmail,
    AwaitingOtp,
}

/// Per chat-user conversation blob, persisted in the key/value store with
/// a 30-minute TTL. Parsed strictly on read: any shape mismatch discards
/// the blob and the conversation restarts from idle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConvoState {
    pub step: Step,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_idr: Option<i64>,
    /// Pinned at confirmation time for the slippage guard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voucher_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub created_at: i64,
}

impl ConvoState {
    pub fn idle() -> Self {
        Self {
            step: Step::Idle,
            chain: None,
            amount_idr: None,
            token_amount: None,
            wallet_address: None,
            voucher_code: None,
            order_id: None,
            session_token: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_stale(&self, now: i64, ttl_secs: i64) -> bool {
        self.step != Step::Idle && now - self.created_at > ttl_secs
    }
}
