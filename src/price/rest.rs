use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{EngineError, EngineResult};

const SINGLE_TIMEOUT: Duration = Duration::from_secs(5);
const BULK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

/// REST fallback for the market data stream.
#[derive(Clone)]
pub struct PriceRest {
    http: reqwest::Client,
    base: String,
}

impl PriceRest {
    pub fn new(base: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base,
        }
    }

    /// Fetch one symbol's USDT pair price (`BNB` → pair `BNBUSDT`).
    pub async fn fetch_symbol(&self, symbol: &str) -> EngineResult<Decimal> {
        let url = format!("{}/api/v3/ticker/price", self.base);
        let ticker: TickerPrice = self
            .http
            .get(&url)
            .query(&[("symbol", format!("{}USDT", symbol.to_uppercase()))])
            .timeout(SINGLE_TIMEOUT)
            .send()
            .await
            .map_err(EngineError::external)?
            .error_for_status()
            .map_err(EngineError::external)?
            .json()
            .await
            .map_err(EngineError::external)?;

        Decimal::from_str(&ticker.price)
            .map_err(|e| EngineError::External(format!("bad price for {symbol}: {e}")))
    }

    /// Full ticker snapshot as `(pair_symbol, price)` rows.
    pub async fn fetch_all(&self) -> EngineResult<Vec<(String, Decimal)>> {
        let url = format!("{}/api/v3/ticker/price", self.base);
        let tickers: Vec<TickerPrice> = self
            .http
            .get(&url)
            .timeout(BULK_TIMEOUT)
            .send()
            .await
            .map_err(EngineError::external)?
            .error_for_status()
            .map_err(EngineError::external)?
            .json()
            .await
            .map_err(EngineError::external)?;

        Ok(tickers
            .into_iter()
            .filter_map(|t| Decimal::from_str(&t.price).ok().map(|p| (t.symbol, p)))
            .collect())
    }
}

/// Scheduled sweep: refresh every tracked symbol from the bulk snapshot.
pub async fn refresh_all(
    rest: &PriceRest,
    cache: &super::PriceCache,
    tracked: &super::Tracked,
) -> EngineResult<usize> {
    let all = rest.fetch_all().await?;
    let mut updated = 0;
    for (pair, price) in all {
        let Some(base) = pair.strip_suffix("USDT") else {
            continue;
        };
        if tracked.contains(base) {
            cache.upsert(base, price, super::PriceSource::Rest);
            updated += 1;
        }
    }
    Ok(updated)
}
