use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::db::Db;
use crate::error::{EngineError, EngineResult};
use crate::model::{Order, OrderStatus};
use crate::notify::Notifier;
use crate::referral::ReferralEngine;
use crate::store::{audit, chains, inventory, now_ts, orders, tokens};
use crate::wallet::HotWallet;

use super::engine::release_holds;

/// A PROCESSING lock older than this belongs to a dead worker.
const ZOMBIE_AFTER_SECS: i64 = 600;
const CLAIM_ATTEMPTS: u32 = 3;

/// Error texts that prove no transfer left the wallet.
const SAFE_FAILURE_PATTERNS: &[&str] = &[
    "insufficient funds",
    "gas limit",
    "reverted",
    "nonce too low",
    "replacement fee too low",
];

/// Handle for enqueueing payout jobs. The consumer attempts each order
/// exactly once; a blockchain send is never retried automatically.
#[derive(Clone)]
pub struct PayoutSender {
    tx: mpsc::UnboundedSender<String>,
}

impl PayoutSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, order_id: &str) {
        if self.tx.send(order_id.to_string()).is_err() {
            error!(order_id, "payout queue closed, order will need the rescue sweep");
        }
    }
}

pub struct PayoutDeps {
    pub db: Db,
    pub wallet: Arc<HotWallet>,
    pub notifier: Arc<dyn Notifier>,
    pub referrals: Arc<ReferralEngine>,
}

/// The payout executor.
///
/// At-most-once send is carried entirely by conditional updates: the
/// `{PAID, tx_hash NULL} → PROCESSING` claim, the `updated_at`-guarded
/// zombie steal, and the finalize barrier.
pub async fn process_order(deps: &PayoutDeps, order_id: &str) -> EngineResult<()> {
    let Some(order) = claim(deps, order_id).await? else {
        return Ok(()); // idempotent no-op, or recovered via tx_hash
    };

    let (chain, token) = {
        let conn = deps.db.lock().await;
        let chain = chains::get(&conn, &order.chain)?.ok_or_else(|| {
            EngineError::Critical(format!("order {} references unknown chain", order.id))
        })?;
        let token = tokens::get_native(&conn, &order.chain)?.ok_or_else(|| {
            EngineError::Critical(format!("no native token for chain {}", order.chain))
        })?;
        (chain, token)
    };

    let sent = deps
        .wallet
        .send_native(&chain, &order.wallet_address, order.amount_token, token.decimals)
        .await;

    let tx_hash = match sent {
        Ok(hash) => hash,
        // Money may be in flight: finalize with the broadcast hash so
        // every future consumer routes through the recovery path instead
        // of sending again.
        Err(EngineError::TxBroadcasted { tx_hash }) => {
            warn!(order_id = %order.id, %tx_hash, "confirmation not observed, finalizing on broadcast hash");
            tx_hash
        }
        Err(EngineError::LockAcquisition(slug)) => {
            // Nothing was sent. Leave the order in PROCESSING; the zombie
            // steal or an admin retry picks it up.
            warn!(order_id = %order.id, chain = %slug, "chain lock unavailable, payout deferred");
            return Err(EngineError::LockAcquisition(slug));
        }
        Err(err) if is_safe_failure(&err) => {
            info!(order_id = %order.id, error = %err, "send failed safely, refunding reservations");
            {
                let mut conn = deps.db.lock().await;
                let tx = conn.transaction()?;
                if orders::mark_failed(&tx, &order.id, now_ts())? {
                    release_holds(&tx, &order)?;
                }
                tx.commit()?;
            }
            deps.notifier.order_failed(&order, &err.to_string()).await;
            return Ok(());
        }
        Err(err) => {
            // Ambiguous: we cannot prove whether a transfer happened.
            // Freeze in PROCESSING for operator attention.
            error!(order_id = %order.id, error = %err, double_spend_risk = true,
                   "ambiguous send error, order left in PROCESSING");
            {
                let conn = deps.db.lock().await;
                audit::record(
                    &conn,
                    "FATAL",
                    "payout_ambiguous_error",
                    Some(&order.id),
                    &err.to_string(),
                )?;
            }
            deps.notifier
                .operator_alert(&order.id, &format!("ambiguous send error: {err}"))
                .await;
            return Err(err);
        }
    };

    finalize(deps, &order, &tx_hash).await?;

    if let Err(e) = deps.referrals.validate_referee(&order.user_id).await {
        warn!(order_id = %order.id, error = %e, "referral validation failed");
    }
    let completed = {
        let conn = deps.db.lock().await;
        orders::get(&conn, &order.id)?
    };
    if let Some(completed) = completed {
        deps.notifier.order_success(&completed).await;
    }
    Ok(())
}

/// Step 1: win the PROCESSING lock, or decide this call is a no-op.
async fn claim(deps: &PayoutDeps, order_id: &str) -> EngineResult<Option<Order>> {
    for _ in 0..CLAIM_ATTEMPTS {
        let now = now_ts();
        {
            let conn = deps.db.lock().await;
            if orders::claim_processing(&conn, order_id, now)? {
                return orders::get(&conn, order_id).map_err(Into::into);
            }
        }

        let order = {
            let conn = deps.db.lock().await;
            orders::get(&conn, order_id)?
        }
        .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;

        if order.status == OrderStatus::Success {
            return Ok(None);
        }
        if order.tx_hash.is_some() {
            // A previous run already sent: recover by finalizing, never
            // by sending again.
            info!(order_id, tx_hash = ?order.tx_hash, "recovering order with existing tx hash");
            let hash = order.tx_hash.clone().expect("checked above");
            finalize(deps, &order, &hash).await?;
            return Ok(None);
        }

        match order.status {
            OrderStatus::Processing => {
                if now - order.updated_at > ZOMBIE_AFTER_SECS {
                    let stolen = {
                        let conn = deps.db.lock().await;
                        orders::steal_processing(&conn, order_id, order.updated_at, now)?
                    };
                    if stolen {
                        warn!(order_id, stale_secs = now - order.updated_at,
                              "stole zombie payout lock");
                        let conn = deps.db.lock().await;
                        return orders::get(&conn, order_id).map_err(Into::into);
                    }
                    // Another thief won; observe the fresh state and retry.
                    continue;
                }
                // A live worker owns it.
                return Ok(None);
            }
            OrderStatus::Paid => continue, // raced the claim, try again
            _ => return Ok(None),
        }
    }
    Ok(None)
}

/// Step 3: one transaction setting SUCCESS + tx_hash + completed_at and
/// deducting inventory. Retried once after 1 s; a second failure is the
/// supported manual-reconciliation state.
async fn finalize(deps: &PayoutDeps, order: &Order, tx_hash: &str) -> EngineResult<()> {
    for attempt in 0..2 {
        let result: EngineResult<()> = {
            let mut conn = deps.db.lock().await;
            let tx = conn.transaction()?;
            let effected = orders::finalize_success(&tx, &order.id, tx_hash, now_ts())?;
            if effected {
                inventory::deduct(&tx, &order.chain, &order.symbol, order.amount_token)?;
            }
            tx.commit()?;
            Ok(())
        };
        match result {
            Ok(()) => return Ok(()),
            Err(e) if attempt == 0 => {
                warn!(order_id = %order.id, error = %e, "finalize failed, retrying once");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => {
                error!(order_id = %order.id, %tx_hash, error = %e,
                       "finalize failed after send, manual reconciliation required");
                return Err(EngineError::Critical(format!(
                    "order {} sent as {tx_hash} but finalize failed: {e}",
                    order.id
                )));
            }
        }
    }
    Ok(())
}

fn is_safe_failure(err: &EngineError) -> bool {
    match err {
        // No signer/support means nothing could have been sent.
        EngineError::UnsupportedChain(_) => true,
        EngineError::External(text) => {
            let lower = text.to_lowercase();
            SAFE_FAILURE_PATTERNS.iter().any(|p| lower.contains(p))
        }
        _ => false,
    }
}
