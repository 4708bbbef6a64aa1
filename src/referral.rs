use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::db::Db;
use crate::error::EngineResult;
use crate::model::{Referral, Voucher};
use crate::notify::Notifier;
use crate::store::{now_ts, orders, referrals, vouchers};

const REWARD_EXPIRY_SECS: i64 = 90 * 24 * 3600;
const BONUS_EXPIRY_SECS: i64 = 30 * 24 * 3600;

#[derive(Debug, Clone)]
pub struct ReferralConfig {
    /// Voucher value granted per validated referral.
    pub reward_idr: i64,
    /// Successful orders a referee needs before their referral counts.
    pub threshold: i64,
    /// A bonus voucher every N validated referrals.
    pub bonus_every: i64,
}

/// Validates referrals once a referee completes orders and grants reward
/// vouchers. Owns all referral mutations.
pub struct ReferralEngine {
    db: Db,
    notifier: Arc<dyn Notifier>,
    cfg: ReferralConfig,
}

impl ReferralEngine {
    pub fn new(db: Db, notifier: Arc<dyn Notifier>, cfg: ReferralConfig) -> Self {
        Self { db, notifier, cfg }
    }

    /// Invoked on referee order success, on the 10-minute sweep, and on
    /// login of a user with a pending referral. Idempotent throughout.
    pub async fn validate_referee(&self, referee_id: &str) -> EngineResult<()> {
        let referral = {
            let conn = self.db.lock().await;
            referrals::get_by_referee(&conn, referee_id)?
        };
        let Some(referral) = referral else {
            return Ok(());
        };
        if referral.is_valid && referral.reward_given {
            return Ok(());
        }

        {
            let conn = self.db.lock().await;
            let successes = orders::count_success_by_user(&conn, referee_id)?;
            if successes < self.cfg.threshold {
                return Ok(());
            }
            referrals::mark_valid(&conn, &referral.id, now_ts())?;
        }

        self.grant(&referral).await
    }

    /// The conditional `reward_given false → true` update is the single
    /// barrier deciding who owns the grant; losers return silently.
    async fn grant(&self, referral: &Referral) -> EngineResult<()> {
        let reward_code;
        let valid_count;
        {
            let conn = self.db.lock().await;
            if !referrals::mark_reward_given(&conn, &referral.id)? {
                return Ok(());
            }

            let now = now_ts();
            reward_code = format!("REF-{}", short_code());
            vouchers::create(
                &conn,
                &Voucher {
                    id: Uuid::new_v4().to_string(),
                    code: reward_code.clone(),
                    owner_user_id: Some(referral.referrer_id.clone()),
                    value_idr: self.cfg.reward_idr,
                    min_amount_idr: 0,
                    max_usage: 1,
                    usage_count: 0,
                    active: true,
                    expires_at: Some(now + REWARD_EXPIRY_SECS),
                },
            )?;

            valid_count = referrals::count_valid_by_referrer(&conn, &referral.referrer_id)?;
            if valid_count > 0 && valid_count % self.cfg.bonus_every == 0 {
                let bonus_code = format!("REFBONUS-{}", short_code());
                vouchers::create(
                    &conn,
                    &Voucher {
                        id: Uuid::new_v4().to_string(),
                        code: bonus_code.clone(),
                        owner_user_id: Some(referral.referrer_id.clone()),
                        value_idr: self.cfg.reward_idr * 5,
                        min_amount_idr: 0,
                        max_usage: 1,
                        usage_count: 0,
                        active: true,
                        expires_at: Some(now + BONUS_EXPIRY_SECS),
                    },
                )?;
                info!(referrer = %referral.referrer_id, valid_count, code = %bonus_code,
                      "milestone bonus voucher granted");
            }
        }

        info!(referrer = %referral.referrer_id, referee = %referral.referee_id,
              code = %reward_code, "referral reward granted");
        self.notifier
            .referral_reward(&referral.referrer_id, &reward_code, self.cfg.reward_idr)
            .await;
        Ok(())
    }

    /// The 10-minute sweep over unsettled referrals.
    pub async fn sweep(&self) -> EngineResult<usize> {
        let unsettled = {
            let conn = self.db.lock().await;
            referrals::list_unsettled(&conn)?
        };
        let mut processed = 0;
        for referral in unsettled {
            if let Err(e) = self.validate_referee(&referral.referee_id).await {
                warn!(referral = %referral.id, error = %e, "referral sweep entry failed");
            } else {
                processed += 1;
            }
        }
        Ok(processed)
    }
}

fn short_code() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}
