use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::Db;
use crate::error::EngineResult;
use crate::model::ChainKind;
use crate::order::{OrderEngine, PayoutDeps, expiry, process_order};
use crate::price::{PriceCache, PriceRest, Tracked, rest};
use crate::referral::ReferralEngine;
use crate::store::{chains, inventory, now_ts, tokens, vouchers};
use crate::wallet::HotWallet;

const PRICE_REFRESH: Duration = Duration::from_secs(60);
const INVENTORY_SYNC: Duration = Duration::from_secs(60);
const EXPIRY_SWEEP: Duration = Duration::from_secs(5 * 60);
const REFERRAL_SWEEP: Duration = Duration::from_secs(10 * 60);
const VOUCHER_SWEEP: Duration = Duration::from_secs(3600);
const PAID_RESCUE_SWEEP: Duration = Duration::from_secs(5 * 60);
/// PAID orders older than this without a payout get re-enqueued.
const PAID_RESCUE_AGE_SECS: i64 = 10 * 60;
/// Payout jobs running at once, across chains. Per-chain serialization is
/// the hot wallet's chain mutex.
const PAYOUT_CONCURRENCY: usize = 20;

#[derive(Clone)]
pub struct JobContext {
    pub db: Db,
    pub prices: PriceCache,
    pub rest: PriceRest,
    pub tracked: Tracked,
    pub wallet: Arc<HotWallet>,
    pub engine: Arc<OrderEngine>,
    pub referrals: Arc<ReferralEngine>,
}

/// Register every recurring job. There is exactly one registration point,
/// so a restart can never double-schedule.
pub fn spawn_all(ctx: JobContext) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    {
        let ctx = ctx.clone();
        handles.push(spawn_recurring("price_refresh", PRICE_REFRESH, move || {
            let ctx = ctx.clone();
            async move {
                ctx.tracked.refresh_from_db(&ctx.db).await?;
                let updated = rest::refresh_all(&ctx.rest, &ctx.prices, &ctx.tracked).await?;
                info!(updated, "price refresh");
                Ok(())
            }
        }));
    }

    {
        let ctx = ctx.clone();
        handles.push(spawn_recurring("inventory_sync", INVENTORY_SYNC, move || {
            let ctx = ctx.clone();
            async move { sync_inventory(&ctx).await }
        }));
    }

    {
        let ctx = ctx.clone();
        handles.push(spawn_recurring("order_expiry", EXPIRY_SWEEP, move || {
            let ctx = ctx.clone();
            async move {
                expiry::expire_sweep(&ctx.engine).await?;
                Ok(())
            }
        }));
    }

    {
        let ctx = ctx.clone();
        handles.push(spawn_recurring("referral_sweep", REFERRAL_SWEEP, move || {
            let ctx = ctx.clone();
            async move {
                ctx.referrals.sweep().await?;
                Ok(())
            }
        }));
    }

    {
        let ctx = ctx.clone();
        handles.push(spawn_recurring("voucher_expiry", VOUCHER_SWEEP, move || {
            let ctx = ctx.clone();
            async move {
                let swept = {
                    let conn = ctx.db.lock().await;
                    vouchers::deactivate_expired(&conn, now_ts())?
                };
                if swept > 0 {
                    info!(swept, "vouchers expired");
                }
                Ok(())
            }
        }));
    }

    {
        let ctx = ctx.clone();
        handles.push(spawn_recurring("paid_rescue", PAID_RESCUE_SWEEP, move || {
            let ctx = ctx.clone();
            async move {
                expiry::paid_rescue_sweep(&ctx.engine, PAID_RESCUE_AGE_SECS).await?;
                Ok(())
            }
        }));
    }

    handles
}

/// Overwrite inventory balances from the on-chain hot wallet balances.
async fn sync_inventory(ctx: &JobContext) -> EngineResult<()> {
    let specs = {
        let conn = ctx.db.lock().await;
        chains::list_active(&conn)?
    };
    for spec in specs {
        if spec.kind != ChainKind::Evm {
            continue;
        }
        let token = {
            let conn = ctx.db.lock().await;
            tokens::get_native(&conn, &spec.slug)?
        };
        let Some(token) = token else { continue };

        match ctx.wallet.native_balance(&spec, token.decimals).await {
            Ok(balance) => {
                let conn = ctx.db.lock().await;
                inventory::set_balance(&conn, &spec.slug, &token.symbol, balance)?;
            }
            Err(e) => warn!(chain = %spec.slug, error = %e, "inventory sync skipped"),
        }
    }
    Ok(())
}

/// How long after creation an order's dedicated expiry check fires.
const SINGLE_EXPIRY_DELAY: Duration = Duration::from_secs(15 * 60);
const SINGLE_EXPIRY_ATTEMPTS: u32 = 3;

/// Delayed one-shot expiry for a single order. The recurring sweep is the
/// safety net for restarts; this gives each order a prompt decision.
/// Retries gateway failures 3 times with exponential backoff.
pub fn spawn_single_expiry(engine: Arc<OrderEngine>, order_id: String) {
    tokio::spawn(async move {
        tokio::time::sleep(SINGLE_EXPIRY_DELAY).await;
        for attempt in 0..SINGLE_EXPIRY_ATTEMPTS {
            match expiry::expire_single(&engine, &order_id).await {
                Ok(_) => return,
                Err(e) => {
                    warn!(order_id = %order_id, attempt, error = %e, "single expiry check failed");
                    tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                }
            }
        }
    });
}

/// Consume the payout queue: up to 20 in flight, each order attempted
/// exactly once. Automatic retry of a blockchain send is forbidden; the
/// zombie steal and admin retry are the only second chances.
pub fn spawn_payout_consumer(
    mut rx: mpsc::UnboundedReceiver<String>,
    deps: Arc<PayoutDeps>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(PAYOUT_CONCURRENCY));
        while let Some(order_id) = rx.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let deps = deps.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = process_order(&deps, &order_id).await {
                    error!(order_id = %order_id, error = %e, "payout attempt failed");
                }
            });
        }
    })
}

fn spawn_recurring<F, Fut>(name: &'static str, period: Duration, job: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = EngineResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = job().await {
                error!(job = name, error = %e, "scheduled job failed");
            }
        }
    })
}
