use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::Db;
use crate::error::{EngineError, EngineResult};
use crate::gateway::webhook::{self, WebhookPayload};
use crate::gateway::{ChargeRequest, PaymentGateway, PaymentOutcome};
use crate::model::{ChainKind, Order, OrderStatus, PaymentMethod};
use crate::quote::QuoteService;
use crate::store::{audit, chains, inventory, now_ts, orders, vouchers};
use crate::util::address::normalize_evm_address;

use super::payout::PayoutSender;

#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub chain: String,
    pub amount_idr: i64,
    pub wallet_address: String,
    pub voucher_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub order_id: String,
    pub midtrans_id: String,
    pub payment_url: Option<String>,
    pub qr_url: Option<String>,
    pub va_number: Option<String>,
    pub fee_idr: i64,
    pub total_pay: i64,
    pub expiry_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDisposition {
    Applied,
    Ignored(&'static str),
    Fraud,
}

/// Owns every mutation of orders and of the inventory and voucher
/// reservations coupled to them.
pub struct OrderEngine {
    pub db: Db,
    pub gateway: Arc<dyn PaymentGateway>,
    pub quotes: QuoteService,
    pub payouts: PayoutSender,
}

impl OrderEngine {
    pub fn new(
        db: Db,
        gateway: Arc<dyn PaymentGateway>,
        quotes: QuoteService,
        payouts: PayoutSender,
    ) -> Self {
        Self {
            db,
            gateway,
            quotes,
            payouts,
        }
    }

    /// One transaction: pending-order check, inventory reservation,
    /// voucher reservation, order insert. Rollback releases everything.
    pub async fn create_order(&self, req: CreateOrderRequest) -> EngineResult<Order> {
        let chain = {
            let conn = self.db.lock().await;
            chains::get(&conn, &req.chain)?
        }
        .filter(|c| c.active)
        .ok_or_else(|| EngineError::Validation(format!("unknown chain {}", req.chain)))?;

        let wallet_address = match chain.kind {
            ChainKind::Evm => normalize_evm_address(&req.wallet_address)?,
            _ => {
                let trimmed = req.wallet_address.trim();
                if trimmed.is_empty() {
                    return Err(EngineError::Validation("wallet address required".into()));
                }
                trimmed.to_string()
            }
        };

        // Quote before the transaction: no awaits while the write
        // transaction is open.
        let quote = self.quotes.quote(&req.chain, req.amount_idr).await?;

        let now = now_ts();
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;

        if let Some(pending) = orders::pending_by_user(&tx, &req.user_id)? {
            return Err(EngineError::PendingOrderExists {
                order_id: pending.id,
            });
        }

        if !inventory::reserve(&tx, &req.chain, &quote.symbol, quote.token_amount)? {
            return Err(EngineError::InsufficientInventory {
                chain: req.chain.clone(),
                symbol: quote.symbol.clone(),
            });
        }

        let mut voucher_id = None;
        let mut payable = req.amount_idr;
        if let Some(code) = &req.voucher_code {
            let voucher = vouchers::validate_and_reserve(&tx, code, &req.user_id, req.amount_idr)?;
            payable -= voucher.value_idr;
            if payable <= 0 {
                return Err(EngineError::VoucherRejected(
                    "discount exceeds order amount".into(),
                ));
            }
            voucher_id = Some(voucher.id);
        }

        let order = Order {
            id: Uuid::new_v4().to_string(),
            user_id: req.user_id,
            chain: req.chain,
            symbol: quote.symbol,
            amount_idr: payable,
            amount_token: quote.token_amount,
            markup_percent: quote.markup_percent,
            wallet_address,
            voucher_id,
            status: OrderStatus::Pending,
            payment_method: None,
            fee_idr: 0,
            total_pay: 0,
            tx_hash: None,
            midtrans_id: None,
            payment_url: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            completed_at: None,
        };
        orders::insert(&tx, &order)?;
        tx.commit()?;

        info!(order_id = %order.id, chain = %order.chain, amount_idr = order.amount_idr,
              amount_token = %order.amount_token, "order created");
        Ok(order)
    }

    /// Charge the gateway for a PENDING order. Each attempt gets a fresh
    /// gateway order id, intentionally orphaning webhooks for earlier
    /// attempts.
    pub async fn create_payment(
        &self,
        order_id: &str,
        method: PaymentMethod,
    ) -> EngineResult<PaymentInfo> {
        let order = self.get_order(order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(EngineError::Validation(format!(
                "order is {} and cannot be paid",
                order.status.as_str()
            )));
        }

        let now = now_ts();
        let nonce = Uuid::new_v4().simple().to_string();
        let midtrans_id = format!("KIOS-{}-{}", &order.id[..8], &nonce[..10]);
        let fee_idr = method.fee_idr();
        let total_pay = order.amount_idr + fee_idr;

        let charge = self
            .gateway
            .charge(&ChargeRequest {
                midtrans_id: midtrans_id.clone(),
                method,
                gross_amount: total_pay,
            })
            .await?;

        let attached = {
            let conn = self.db.lock().await;
            orders::attach_payment(
                &conn,
                &order.id,
                &midtrans_id,
                charge.payment_url.as_deref(),
                method,
                fee_idr,
                total_pay,
                now,
            )?
        };
        if !attached {
            return Err(EngineError::Validation(
                "order is no longer payable".into(),
            ));
        }

        Ok(PaymentInfo {
            order_id: order.id,
            midtrans_id,
            payment_url: charge.payment_url,
            qr_url: charge.qr_url,
            va_number: charge.va_number,
            fee_idr,
            total_pay,
            expiry_time: charge.expiry_time,
        })
    }

    /// User-initiated cancel. Refused once the order has left PENDING for
    /// a paid state; idempotent against repeated cancels.
    pub async fn cancel_order(&self, order_id: &str) -> EngineResult<()> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        let order = orders::get(&tx, order_id)?
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;

        if orders::mark_cancelled(&tx, order_id, now_ts())? {
            release_holds(&tx, &order)?;
            tx.commit()?;
            return Ok(());
        }

        let current = orders::get(&tx, order_id)?
            .map(|o| o.status)
            .unwrap_or(order.status);
        match current {
            OrderStatus::Cancelled | OrderStatus::Expired | OrderStatus::Failed => Ok(()),
            other => Err(EngineError::NotCancellable {
                order_id: order_id.to_string(),
                status: other.as_str().to_string(),
            }),
        }
    }

    /// Cancel on the gateway's timeline (deny/expire notifications).
    /// A no-op when the order already moved on.
    pub async fn gateway_cancel(&self, order_id: &str) -> EngineResult<()> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        let Some(order) = orders::get(&tx, order_id)? else {
            return Ok(());
        };
        if orders::mark_cancelled(&tx, order_id, now_ts())? {
            release_holds(&tx, &order)?;
            tx.commit()?;
        }
        Ok(())
    }

    /// Conditional PENDING → PAID. Returns whether this call effected the
    /// transition; the payout job is enqueued exactly once, by the caller
    /// that won.
    pub async fn handle_payment_success(&self, order_id: &str) -> EngineResult<bool> {
        let effected = {
            let conn = self.db.lock().await;
            orders::mark_paid(&conn, order_id, now_ts())?
        };
        if effected {
            info!(order_id, "payment confirmed, enqueueing payout");
            self.payouts.enqueue(order_id);
        }
        Ok(effected)
    }

    /// Re-read the gateway for one order and apply the outcome. Backs the
    /// `/orders/:id/sync` surface and the expiry sweep's rescue path.
    pub async fn sync_order(&self, order_id: &str) -> EngineResult<OrderStatus> {
        let order = self.get_order(order_id).await?;
        if order.status.is_terminal() {
            return Ok(order.status);
        }
        let Some(midtrans_id) = &order.midtrans_id else {
            return Err(EngineError::Validation("order has no payment attached".into()));
        };

        let status = self.gateway.status(midtrans_id).await?;
        match status.outcome() {
            PaymentOutcome::Success => {
                self.handle_payment_success(order_id).await?;
            }
            PaymentOutcome::Failed => {
                self.gateway_cancel(order_id).await?;
            }
            PaymentOutcome::Pending => {}
        }

        Ok(self.get_order(order_id).await?.status)
    }

    /// Apply an authenticated gateway notification. Signature has already
    /// been verified; everything here is idempotent.
    pub async fn apply_webhook(&self, p: &WebhookPayload) -> EngineResult<WebhookDisposition> {
        let order = {
            let conn = self.db.lock().await;
            orders::find_by_midtrans(&conn, &p.order_id)?
        };
        // Unknown gateway ids happen when a re-payment overwrote the
        // attempt this webhook belongs to.
        let Some(order) = order else {
            return Ok(WebhookDisposition::Ignored("unknown gateway order id"));
        };

        if !webhook::amount_within_tolerance(order.expected_pay(), &p.gross_amount) {
            error!(order_id = %order.id, gross = %p.gross_amount,
                   expected = order.expected_pay(), "webhook amount mismatch");
            let conn = self.db.lock().await;
            audit::record(
                &conn,
                "ERROR",
                "webhook_amount_mismatch",
                Some(&order.id),
                &format!("expected {} got {}", order.expected_pay(), p.gross_amount),
            )?;
            return Ok(WebhookDisposition::Fraud);
        }

        if order.status != OrderStatus::Pending {
            return Ok(WebhookDisposition::Ignored("order already processed"));
        }

        match webhook::classify(&p.transaction_status, p.fraud_status.as_deref()) {
            PaymentOutcome::Success => {
                self.handle_payment_success(&order.id).await?;
                Ok(WebhookDisposition::Applied)
            }
            PaymentOutcome::Failed => {
                warn!(order_id = %order.id, status = %p.transaction_status,
                      "gateway reports payment dead");
                self.gateway_cancel(&order.id).await?;
                Ok(WebhookDisposition::Applied)
            }
            PaymentOutcome::Pending => Ok(WebhookDisposition::Ignored("payment still pending")),
        }
    }

    pub async fn get_order(&self, order_id: &str) -> EngineResult<Order> {
        let conn = self.db.lock().await;
        orders::get(&conn, order_id)?
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))
    }
}

/// Release the inventory and voucher held by an order. Runs after a
/// terminal transition inside the same transaction, so a double release
/// cannot occur.
pub(crate) fn release_holds(conn: &Connection, order: &Order) -> EngineResult<()> {
    inventory::release(conn, &order.chain, &order.symbol, order.amount_token)?;
    if let Some(voucher_id) = &order.voucher_id {
        vouchers::release(conn, voucher_id)?;
    }
    Ok(())
}
