use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use crate::db::Db;
use crate::error::{EngineError, EngineResult};
use crate::store::settings;

const RATE_KEY: &str = "usd_idr_rate";
/// The rate is considered fresh for a day.
const FRESH_SECS: i64 = 24 * 3600;
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct FxResponse {
    rates: FxRates,
}

#[derive(Debug, Deserialize)]
struct FxRates {
    #[serde(rename = "IDR")]
    idr: f64,
}

/// USD↔IDR rate with a 24-hour freshness policy: the stored rate is used
/// while fresh, refreshed on demand, and the stale store (then the
/// configured default) serves as fallback when the endpoint is down.
#[derive(Clone)]
pub struct FxService {
    db: Db,
    http: reqwest::Client,
    url: String,
    default_rate: Decimal,
}

impl FxService {
    pub fn new(db: Db, url: String, default_rate: Decimal) -> Self {
        Self {
            db,
            http: reqwest::Client::new(),
            url,
            default_rate,
        }
    }

    pub async fn usd_idr(&self) -> EngineResult<Decimal> {
        let stored = {
            let conn = self.db.lock().await;
            settings::get_with_age(&conn, RATE_KEY)?
        };

        if let Some((raw, age)) = &stored {
            if *age < FRESH_SECS {
                if let Ok(rate) = Decimal::from_str(raw) {
                    return Ok(rate);
                }
            }
        }

        match self.fetch().await {
            Ok(rate) => {
                let conn = self.db.lock().await;
                settings::set(&conn, RATE_KEY, &rate.to_string())?;
                Ok(rate)
            }
            Err(e) => {
                warn!(error = %e, "fx refresh failed, using fallback");
                if let Some((raw, _)) = stored {
                    if let Ok(rate) = Decimal::from_str(&raw) {
                        return Ok(rate);
                    }
                }
                Ok(self.default_rate)
            }
        }
    }

    async fn fetch(&self) -> EngineResult<Decimal> {
        let resp: FxResponse = self
            .http
            .get(&self.url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(EngineError::external)?
            .error_for_status()
            .map_err(EngineError::external)?
            .json()
            .await
            .map_err(EngineError::external)?;

        Decimal::try_from(resp.rates.idr)
            .map_err(|e| EngineError::External(format!("bad IDR rate: {e}")))
    }
}
