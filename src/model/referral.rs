use serde::{Deserialize, Serialize};

/// One row per referee, created at registration when a valid referral code
/// was presented. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Referral {
    pub id: String,
    pub referrer_id: String,
    pub referee_id: String,
    pub is_valid: bool,
    pub reward_given: bool,
    pub validated_at: Option<i64>,
    pub created_at: i64,
}
