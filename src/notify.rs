use async_trait::async_trait;
use tracing::{error, info};

use crate::model::Order;

/// Outbound notification seam. The chat and email surfaces live outside
/// this crate; the engine only emits through this trait.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn order_success(&self, order: &Order);
    async fn order_failed(&self, order: &Order, reason: &str);
    async fn referral_reward(&self, referrer_id: &str, voucher_code: &str, value_idr: i64);
    async fn operator_alert(&self, order_id: &str, message: &str);
}

/// Default sink: structured log lines only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn order_success(&self, order: &Order) {
        info!(order_id = %order.id, tx_hash = ?order.tx_hash, "order success notification");
    }

    async fn order_failed(&self, order: &Order, reason: &str) {
        info!(order_id = %order.id, reason, "order failed notification");
    }

    async fn referral_reward(&self, referrer_id: &str, voucher_code: &str, value_idr: i64) {
        info!(referrer_id, voucher_code, value_idr, "referral reward notification");
    }

    async fn operator_alert(&self, order_id: &str, message: &str) {
        error!(order_id, message, "operator alert");
    }
}
