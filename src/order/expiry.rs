use tracing::{info, warn};

use crate::error::EngineResult;
use crate::gateway::PaymentOutcome;
use crate::store::{now_ts, orders};

use super::engine::{OrderEngine, release_holds};

/// PENDING orders older than this are expiry candidates.
const EXPIRE_AFTER_SECS: i64 = 15 * 60;
/// Orders the gateway still reports pending get this long before expiry.
const GRACE_SECS: i64 = 70 * 60;

/// The 5-minute expiry sweep.
///
/// An order with a gateway id is never expired blind: a successful
/// payment diverts to the success path, a pending one inside the grace
/// window is skipped, and an unreachable gateway defers the decision —
/// the payment may have completed.
pub async fn expire_sweep(engine: &OrderEngine) -> EngineResult<usize> {
    let now = now_ts();
    let candidates = {
        let conn = engine.db.lock().await;
        orders::list_pending_older_than(&conn, now - EXPIRE_AFTER_SECS)?
    };

    let mut expired = 0;
    for order in candidates {
        if let Some(midtrans_id) = &order.midtrans_id {
            match engine.gateway.status(midtrans_id).await {
                Ok(status) => match status.outcome() {
                    PaymentOutcome::Success => {
                        info!(order_id = %order.id, "late payment found by sweep, rescuing");
                        engine.handle_payment_success(&order.id).await?;
                        continue;
                    }
                    PaymentOutcome::Pending if now - order.created_at < GRACE_SECS => continue,
                    PaymentOutcome::Pending | PaymentOutcome::Failed => {}
                },
                Err(e) => {
                    warn!(order_id = %order.id, error = %e,
                          "gateway unreachable, deferring expiry");
                    continue;
                }
            }
        }

        let mut conn = engine.db.lock().await;
        let tx = conn.transaction()?;
        if orders::mark_expired(&tx, &order.id, now)? {
            release_holds(&tx, &order)?;
            tx.commit()?;
            expired += 1;
        }
    }

    if expired > 0 {
        info!(expired, "expiry sweep done");
    }
    Ok(expired)
}

/// Decide expiry for a single order, for the delayed per-order check.
///
/// Returns true when the order reached a settled state (expired, rescued,
/// or no longer PENDING), false when the decision was deferred to the
/// sweep. Gateway errors propagate so the caller can retry.
pub async fn expire_single(engine: &OrderEngine, order_id: &str) -> EngineResult<bool> {
    let now = now_ts();
    let order = {
        let conn = engine.db.lock().await;
        orders::get(&conn, order_id)?
    };
    let Some(order) = order else { return Ok(true) };
    if order.status != crate::model::OrderStatus::Pending {
        return Ok(true);
    }
    if now - order.created_at < EXPIRE_AFTER_SECS {
        return Ok(false);
    }

    if let Some(midtrans_id) = &order.midtrans_id {
        match engine.gateway.status(midtrans_id).await?.outcome() {
            PaymentOutcome::Success => {
                info!(order_id = %order.id, "late payment found at expiry deadline, rescuing");
                engine.handle_payment_success(&order.id).await?;
                return Ok(true);
            }
            PaymentOutcome::Pending if now - order.created_at < GRACE_SECS => {
                return Ok(false);
            }
            PaymentOutcome::Pending | PaymentOutcome::Failed => {}
        }
    }

    let mut conn = engine.db.lock().await;
    let tx = conn.transaction()?;
    if orders::mark_expired(&tx, &order.id, now)? {
        release_holds(&tx, &order)?;
        tx.commit()?;
    }
    Ok(true)
}

/// Rescue sweep for PAID orders that never reached the payout queue
/// (e.g. the process died between webhook and enqueue).
pub async fn paid_rescue_sweep(engine: &OrderEngine, older_than_secs: i64) -> EngineResult<usize> {
    let stuck = {
        let conn = engine.db.lock().await;
        orders::list_paid_unsent(&conn, now_ts() - older_than_secs)?
    };
    let count = stuck.len();
    for order in stuck {
        warn!(order_id = %order.id, "PAID order without payout, re-enqueueing");
        engine.payouts.enqueue(&order.id);
    }
    Ok(count)
}
