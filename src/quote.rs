use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use crate::db::Db;
use crate::error::{EngineError, EngineResult};
use crate::model::Token;
use crate::price::{FxService, PriceCache};
use crate::store::{inventory, settings, tokens};

/// Minimum order size on Ethereum mainnet, where gas would eat smaller
/// payouts.
pub const ETH_MIN_IDR: i64 = 500_000;

const GLOBAL_MARKUP_KEY: &str = "global_markup_percent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryStatus {
    Available,
    Limited,
    OutOfStock,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResult {
    pub symbol: String,
    pub token_amount: Decimal,
    pub token_price_usd: Decimal,
    pub usd_idr_rate: Decimal,
    pub markup_percent: Decimal,
    pub effective_price_idr: Decimal,
    pub inventory_status: InventoryStatus,
    pub max_buy_idr: i64,
}

/// Joins price, FX, markup and inventory into a buyable-amount estimate.
#[derive(Clone)]
pub struct QuoteService {
    db: Db,
    prices: PriceCache,
    fx: FxService,
    default_markup: Decimal,
}

impl QuoteService {
    pub fn new(db: Db, prices: PriceCache, fx: FxService, default_markup: Decimal) -> Self {
        Self {
            db,
            prices,
            fx,
            default_markup,
        }
    }

    pub async fn quote(&self, chain_slug: &str, amount_idr: i64) -> EngineResult<QuoteResult> {
        if amount_idr <= 0 {
            return Err(EngineError::Validation("amount must be positive".into()));
        }
        if chain_slug == "ethereum" && amount_idr < ETH_MIN_IDR {
            return Err(EngineError::Validation(format!(
                "minimum order on ethereum is {ETH_MIN_IDR} IDR"
            )));
        }

        let (token, global_markup, inv) = {
            let conn = self.db.lock().await;
            let token = tokens::get_native(&conn, chain_slug)?.ok_or_else(|| {
                EngineError::Validation(format!("no active native token on {chain_slug}"))
            })?;
            let global_markup = settings::get(&conn, GLOBAL_MARKUP_KEY)?
                .and_then(|v| Decimal::from_str(&v).ok())
                .unwrap_or(self.default_markup);
            let inv = inventory::get(&conn, chain_slug, &token.symbol)?;
            (token, global_markup, inv)
        };

        let (price, fx) = tokio::join!(
            self.prices.get_price(&token.symbol),
            self.fx.usd_idr()
        );
        let price = price?;
        let fx = fx?;
        if price <= Decimal::ZERO || fx <= Decimal::ZERO {
            return Err(EngineError::PriceUnavailable(token.symbol.clone()));
        }

        let markup = token.markup_percent.unwrap_or(global_markup);
        let token_amount = compute_token_amount(amount_idr, fx, price, markup, &token)?;

        let available = inv.map(|r| r.available()).unwrap_or(Decimal::ZERO);
        let inventory_status = if token_amount > available {
            InventoryStatus::OutOfStock
        } else if available < token_amount * Decimal::from(2) {
            InventoryStatus::Limited
        } else {
            InventoryStatus::Available
        };
        let max_buy_idr = (available * price * fx)
            .floor()
            .to_i64()
            .unwrap_or(i64::MAX);

        let effective_price_idr = if token_amount > Decimal::ZERO {
            (Decimal::from(amount_idr) / token_amount).round_dp(2)
        } else {
            Decimal::ZERO
        };

        Ok(QuoteResult {
            symbol: token.symbol,
            token_amount,
            token_price_usd: price,
            usd_idr_rate: fx,
            markup_percent: markup,
            effective_price_idr,
            inventory_status,
            max_buy_idr,
        })
    }
}

/// `amount_idr / fx / price × (1 − markup/100)`, truncated to the token's
/// precision so rounding never oversells.
fn compute_token_amount(
    amount_idr: i64,
    fx: Decimal,
    price: Decimal,
    markup: Decimal,
    token: &Token,
) -> EngineResult<Decimal> {
    let discount = Decimal::ONE - markup / Decimal::from(100);
    if discount <= Decimal::ZERO {
        return Err(EngineError::Validation("markup leaves nothing to buy".into()));
    }
    let amount = Decimal::from(amount_idr) / fx / price * discount;
    let dp = (token.decimals as u32).min(8);
    Ok(amount.round_dp_with_strategy(dp, rust_decimal::RoundingStrategy::ToZero))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bnb() -> Token {
        Token {
            chain: "bsc".into(),
            symbol: "BNB".into(),
            is_native: true,
            decimals: 18,
            markup_percent: None,
            active: true,
        }
    }

    #[test]
    fn happy_path_bsc_numbers() {
        // 100000 / 15800 / 650 × 0.95 ≈ 0.00925 BNB
        let amount =
            compute_token_amount(100_000, dec!(15800), dec!(650), dec!(5), &bnb()).unwrap();
        assert_eq!(amount, dec!(0.00925024));
    }

    #[test]
    fn full_markup_is_rejected() {
        assert!(compute_token_amount(100_000, dec!(15800), dec!(650), dec!(100), &bnb()).is_err());
    }

    #[tokio::test]
    async fn ethereum_minimum_enforced() {
        use std::sync::Arc;
        let db = crate::db::open_in_memory().unwrap();
        let rest = crate::price::PriceRest::new("http://127.0.0.1:1".into());
        let prices = crate::price::PriceCache::new(Arc::new(crate::kv::Kv::new()), rest);
        let fx = crate::price::FxService::new(db.clone(), "http://127.0.0.1:1".into(), dec!(15800));
        let svc = QuoteService::new(db, prices, fx, dec!(5));

        let err = svc.quote("ethereum", ETH_MIN_IDR - 1).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn truncates_toward_zero() {
        let amount = compute_token_amount(99_999, dec!(15000), dec!(1000), dec!(0), &bnb()).unwrap();
        // 99999/15000/1000 = 0.0066666 → truncated at 8 dp
        assert_eq!(amount, dec!(0.00666660));
    }
}
