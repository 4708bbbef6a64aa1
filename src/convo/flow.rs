use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::db::Db;
use crate::error::{EngineError, EngineResult};
use crate::kv::{Kv, acquire_lock, lock_token};
use crate::model::{Order, PaymentMethod};
use crate::order::{CreateOrderRequest, OrderEngine, PaymentInfo};
use crate::quote::{QuoteResult, QuoteService};
use crate::store::{chains, now_ts, orders, vouchers};

use super::state::{ConvoState, Step};

const STATE_TTL: Duration = Duration::from_secs(30 * 60);
const STATE_TTL_SECS: i64 = 30 * 60;
const STATE_LOCK_TTL: Duration = Duration::from_secs(5);
const STATE_LOCK_RETRIES: u32 = 3;
const STATE_LOCK_BACKOFF: Duration = Duration::from_millis(50);
const CREATE_ORDER_LOCK_TTL: Duration = Duration::from_secs(30);
/// Confirmation aborts when the fresh quote drifts past this fraction of
/// the pinned amount: 0.05.
fn max_slippage() -> Decimal {
    Decimal::new(5, 2)
}

/// What the chat surface should render next.
#[derive(Debug, serde::Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Reply {
    ChainPrompt { chains: Vec<String> },
    AmountPrompt { chain: String },
    CustomAmountPrompt,
    WalletPrompt,
    VoucherPrompt,
    Summary { quote: QuoteResult, amount_idr: i64, discount_idr: i64 },
    PaymentMethodPrompt { order: Order },
    Payment(PaymentInfo),
    Cancelled,
    /// Recoverable input problem; the step does not change.
    Invalid(String),
}

/// Drives the interactive checkout as a persisted finite-state machine.
/// Every transition survives a restart; nothing lives in task state.
pub struct ConvoService {
    kv: Arc<Kv>,
    db: Db,
    engine: Arc<OrderEngine>,
    quotes: QuoteService,
}

impl ConvoService {
    pub fn new(kv: Arc<Kv>, db: Db, engine: Arc<OrderEngine>, quotes: QuoteService) -> Self {
        Self {
            kv,
            db,
            engine,
            quotes,
        }
    }

    fn state_key(chat_id: &str) -> String {
        format!("convo:{chat_id}")
    }

    fn state_lock_key(chat_id: &str) -> String {
        format!("lock:user:{chat_id}:state")
    }

    fn order_lock_key(user_id: &str) -> String {
        format!("lock:user:{user_id}:create_order")
    }

    /// Load the stored blob. Invalid shapes are discarded; stale non-idle
    /// conversations reset to idle.
    pub async fn load(&self, chat_id: &str) -> ConvoState {
        let Some(raw) = self.kv.get(&Self::state_key(chat_id)).await else {
            return ConvoState::idle();
        };
        match serde_json::from_str::<ConvoState>(&raw) {
            Ok(state) if !state.is_stale(now_ts(), STATE_TTL_SECS) => state,
            _ => {
                self.kv.delete(&Self::state_key(chat_id)).await;
                ConvoState::idle()
            }
        }
    }

    async fn save(&self, chat_id: &str, state: &ConvoState) -> EngineResult<()> {
        let raw = serde_json::to_string(state)
            .map_err(|e| EngineError::Critical(format!("serializing convo state: {e}")))?;
        self.kv.set(&Self::state_key(chat_id), &raw, STATE_TTL).await;
        Ok(())
    }

    /// Read-merge-write under the per-user state lock. Lock retries back
    /// off 50/100/150 ms before surfacing "operation in progress".
    pub async fn update_state<F>(&self, chat_id: &str, merge: F) -> EngineResult<ConvoState>
    where
        F: FnOnce(&mut ConvoState),
    {
        let lock_key = Self::state_lock_key(chat_id);
        let token = acquire_lock(
            &self.kv,
            &lock_key,
            STATE_LOCK_TTL,
            STATE_LOCK_RETRIES,
            STATE_LOCK_BACKOFF,
        )
        .await?;

        let result = async {
            let mut state = self.load(chat_id).await;
            merge(&mut state);
            self.save(chat_id, &state).await?;
            Ok(state)
        }
        .await;

        self.kv.compare_and_delete(&lock_key, &token).await;
        result
    }

    /// Reset to idle: on `/start`, on completion, and on error.
    pub async fn reset(&self, chat_id: &str) {
        self.kv.delete(&Self::state_key(chat_id)).await;
    }

    /// Enter the buy flow.
    pub async fn begin_buy(&self, chat_id: &str) -> EngineResult<Reply> {
        let chain_slugs: Vec<String> = {
            let conn = self.db.lock().await;
            chains::list_active(&conn)?.into_iter().map(|c| c.slug).collect()
        };
        if chain_slugs.is_empty() {
            return Err(EngineError::Validation("no chains available".into()));
        }

        self.update_state(chat_id, |state| {
            *state = ConvoState::idle();
            state.step = Step::AwaitingChain;
            state.session_token = Some(lock_token());
        })
        .await?;
        Ok(Reply::ChainPrompt { chains: chain_slugs })
    }

    /// Feed one user input into the state machine.
    pub async fn advance(&self, chat_id: &str, user_id: &str, input: &str) -> EngineResult<Reply> {
        let state = self.load(chat_id).await;
        let result = self.advance_inner(chat_id, user_id, &state, input.trim()).await;
        if result.is_err() {
            self.reset(chat_id).await;
        }
        result
    }

    async fn advance_inner(
        &self,
        chat_id: &str,
        user_id: &str,
        state: &ConvoState,
        input: &str,
    ) -> EngineResult<Reply> {
        match state.step {
            Step::Idle => self.begin_buy(chat_id).await,

            Step::AwaitingChain => {
                let slug = input.to_lowercase();
                let known = {
                    let conn = self.db.lock().await;
                    chains::get(&conn, &slug)?.is_some_and(|c| c.active)
                };
                if !known {
                    return Ok(Reply::Invalid(format!("unknown chain {slug}")));
                }
                self.update_state(chat_id, |s| {
                    s.chain = Some(slug.clone());
                    s.step = Step::AwaitingAmount;
                })
                .await?;
                Ok(Reply::AmountPrompt { chain: slug })
            }

            Step::AwaitingAmount | Step::AwaitingCustomAmount => {
                if state.step == Step::AwaitingAmount && input.eq_ignore_ascii_case("custom") {
                    self.update_state(chat_id, |s| s.step = Step::AwaitingCustomAmount)
                        .await?;
                    return Ok(Reply::CustomAmountPrompt);
                }
                let amount = match crate::util::amount::parse_idr(input) {
                    Ok(v) => v,
                    Err(e) => return Ok(Reply::Invalid(e.to_string())),
                };
                let chain = state.chain.clone().ok_or_else(|| {
                    EngineError::Validation("conversation lost its chain".into())
                })?;
                // Early validation so the user hears about limits and
                // stock before typing an address.
                if let Err(e) = self.quotes.quote(&chain, amount).await {
                    return Ok(Reply::Invalid(e.to_string()));
                }
                self.update_state(chat_id, |s| {
                    s.amount_idr = Some(amount);
                    s.step = Step::AwaitingWallet;
                })
                .await?;
                Ok(Reply::WalletPrompt)
            }

            Step::AwaitingWallet => {
                let normalized = match crate::util::address::normalize_evm_address(input) {
                    Ok(a) => a,
                    Err(e) => return Ok(Reply::Invalid(e.to_string())),
                };
                self.update_state(chat_id, |s| {
                    s.wallet_address = Some(normalized);
                    s.step = Step::AwaitingVoucher;
                })
                .await?;
                Ok(Reply::VoucherPrompt)
            }

            Step::AwaitingVoucher => {
                let voucher_code = if input.eq_ignore_ascii_case("skip") || input == "-" {
                    None
                } else {
                    Some(input.to_uppercase())
                };
                let (chain, amount) = required_quote_params(state)?;
                let mut discount = 0;
                if let Some(code) = &voucher_code {
                    let conn = self.db.lock().await;
                    match vouchers::peek(&conn, code, user_id, amount) {
                        Ok(v) => discount = v.value_idr,
                        Err(e) => return Ok(Reply::Invalid(e.to_string())),
                    }
                }

                let quote = self.quotes.quote(&chain, amount).await?;
                let pinned = quote.token_amount;
                self.update_state(chat_id, |s| {
                    s.voucher_code = voucher_code.clone();
                    s.token_amount = Some(pinned);
                    s.step = Step::AwaitingConfirmation;
                })
                .await?;
                Ok(Reply::Summary {
                    quote,
                    amount_idr: amount,
                    discount_idr: discount,
                })
            }

            Step::AwaitingConfirmation => {
                if !matches!(input.to_lowercase().as_str(), "yes" | "y" | "confirm") {
                    self.reset(chat_id).await;
                    return Ok(Reply::Cancelled);
                }
                let order = self.confirm_purchase(chat_id, user_id, state).await?;
                crate::jobs::spawn_single_expiry(self.engine.clone(), order.id.clone());
                self.update_state(chat_id, |s| {
                    s.order_id = Some(order.id.clone());
                    s.step = Step::AwaitingPaymentMethod;
                })
                .await?;
                Ok(Reply::PaymentMethodPrompt { order })
            }

            Step::AwaitingPaymentMethod => {
                let Some(method) = PaymentMethod::parse(input) else {
                    return Ok(Reply::Invalid("choose QRIS or VA".into()));
                };
                let order_id = state.order_id.clone().ok_or_else(|| {
                    EngineError::Validation("conversation lost its order".into())
                })?;
                let info = self.engine.create_payment(&order_id, method).await?;
                // Flow complete.
                self.reset(chat_id).await;
                Ok(Reply::Payment(info))
            }

            Step::AwaitingEmail | Step::AwaitingOtp => Ok(Reply::Invalid(
                "finish the sign-in flow first".into(),
            )),
        }
    }

    /// The buy-flow critical section: under `lock:user:<id>:create_order`
    /// recheck the pending order, verify slippage against the pinned
    /// amount, and create the order. The lock is released on all exits.
    async fn confirm_purchase(
        &self,
        chat_id: &str,
        user_id: &str,
        state: &ConvoState,
    ) -> EngineResult<Order> {
        let lock_key = Self::order_lock_key(user_id);
        let token = lock_token();
        if !self.kv.set_nx(&lock_key, &token, CREATE_ORDER_LOCK_TTL).await {
            return Err(EngineError::LockContention);
        }

        let result = self.confirm_purchase_inner(chat_id, user_id, state).await;
        self.kv.compare_and_delete(&lock_key, &token).await;
        result
    }

    async fn confirm_purchase_inner(
        &self,
        _chat_id: &str,
        user_id: &str,
        state: &ConvoState,
    ) -> EngineResult<Order> {
        let (chain, amount) = required_quote_params(state)?;
        let wallet_address = state.wallet_address.clone().ok_or_else(|| {
            EngineError::Validation("conversation lost its wallet address".into())
        })?;
        let pinned = state.token_amount.ok_or_else(|| {
            EngineError::Validation("conversation lost its quote".into())
        })?;

        {
            let conn = self.db.lock().await;
            if let Some(pending) = orders::pending_by_user(&conn, user_id)? {
                return Err(EngineError::PendingOrderExists {
                    order_id: pending.id,
                });
            }
        }

        let fresh = self.quotes.quote(&chain, amount).await?;
        let drift = slippage(pinned, fresh.token_amount);
        if drift > max_slippage() {
            return Err(EngineError::Slippage {
                drift_percent: (drift * Decimal::from(100)).round_dp(2).to_string(),
            });
        }

        self.engine
            .create_order(CreateOrderRequest {
                user_id: user_id.to_string(),
                chain,
                amount_idr: amount,
                wallet_address,
                voucher_code: state.voucher_code.clone(),
            })
            .await
    }
}

fn required_quote_params(state: &ConvoState) -> EngineResult<(String, i64)> {
    let chain = state
        .chain
        .clone()
        .ok_or_else(|| EngineError::Validation("conversation lost its chain".into()))?;
    let amount = state
        .amount_idr
        .ok_or_else(|| EngineError::Validation("conversation lost its amount".into()))?;
    Ok((chain, amount))
}

fn slippage(pinned: Decimal, current: Decimal) -> Decimal {
    if pinned.is_zero() {
        return Decimal::ZERO;
    }
    ((current - pinned) / pinned).abs()
}
