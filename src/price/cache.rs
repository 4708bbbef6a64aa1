use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::rest::PriceRest;
use crate::error::{EngineError, EngineResult};
use crate::kv::{Kv, lock_token};

/// Serve-stale window: entries younger than this are returned as-is.
const SWR_WINDOW: Duration = Duration::from_secs(60);
/// Entries older than this are treated as absent.
const HARD_TTL: Duration = Duration::from_secs(3600);
/// Per-symbol refresh lock TTL.
const REFRESH_LOCK_TTL: Duration = Duration::from_secs(10);
/// How long a total-miss reader polls before giving up.
const MISS_POLL: Duration = Duration::from_secs(2);
const MISS_POLL_STEP: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Ws,
    Rest,
}

#[derive(Debug, Clone)]
pub struct PriceEntry {
    pub price_usd: Decimal,
    pub ts: DateTime<Utc>,
    pub source: PriceSource,
}

/// Token→USD price table with stale-while-revalidate reads.
///
/// Two writers (the websocket stream and the REST refresher) upsert;
/// readers never fall through to a persistent store.
#[derive(Clone)]
pub struct PriceCache {
    inner: Arc<Inner>,
}

struct Inner {
    entries: RwLock<HashMap<String, PriceEntry>>,
    kv: Arc<Kv>,
    rest: PriceRest,
}

impl PriceCache {
    pub fn new(kv: Arc<Kv>, rest: PriceRest) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                kv,
                rest,
            }),
        }
    }

    pub fn upsert(&self, symbol: &str, price_usd: Decimal, source: PriceSource) {
        let mut map = self.inner.entries.write().expect("price cache lock");
        map.insert(
            symbol.to_string(),
            PriceEntry {
                price_usd,
                ts: Utc::now(),
                source,
            },
        );
    }

    /// Entry respecting the hard TTL.
    pub fn entry(&self, symbol: &str) -> Option<PriceEntry> {
        let map = self.inner.entries.read().expect("price cache lock");
        let e = map.get(symbol)?;
        let age = Utc::now().signed_duration_since(e.ts);
        if age > chrono::Duration::from_std(HARD_TTL).expect("hard ttl") {
            return None;
        }
        Some(e.clone())
    }

    /// Stale-while-revalidate read path.
    ///
    /// Fresh → return. Stale → return the stale value and kick off a
    /// lock-guarded background refresh. Miss → fetch synchronously under
    /// the lock, or poll for up to 2 s when another refresher holds it.
    pub async fn get_price(&self, symbol: &str) -> EngineResult<Decimal> {
        if let Some(e) = self.entry(symbol) {
            let age = Utc::now().signed_duration_since(e.ts);
            if age <= chrono::Duration::from_std(SWR_WINDOW).expect("swr window") {
                return Ok(e.price_usd);
            }
            self.spawn_refresh(symbol);
            return Ok(e.price_usd);
        }

        // Total miss: become the refresher or wait for one.
        let lock_key = format!("lock:price:{symbol}");
        let token = lock_token();
        if self.inner.kv.set_nx(&lock_key, &token, REFRESH_LOCK_TTL).await {
            let fetched = self.inner.rest.fetch_symbol(symbol).await;
            self.inner.kv.compare_and_delete(&lock_key, &token).await;
            let price = fetched?;
            self.upsert(symbol, price, PriceSource::Rest);
            return Ok(price);
        }

        let deadline = tokio::time::Instant::now() + MISS_POLL;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(MISS_POLL_STEP).await;
            if let Some(e) = self.entry(symbol) {
                return Ok(e.price_usd);
            }
        }
        Err(EngineError::PriceUnavailable(symbol.to_string()))
    }

    fn spawn_refresh(&self, symbol: &str) {
        let cache = self.clone();
        let symbol = symbol.to_string();
        tokio::spawn(async move {
            let lock_key = format!("lock:price:{symbol}");
            let token = lock_token();
            if !cache.inner.kv.set_nx(&lock_key, &token, REFRESH_LOCK_TTL).await {
                return; // someone else is already refreshing
            }
            match cache.inner.rest.fetch_symbol(&symbol).await {
                Ok(price) => {
                    cache.upsert(&symbol, price, PriceSource::Rest);
                    debug!(%symbol, %price, "swr refresh");
                }
                Err(e) => warn!(%symbol, error = %e, "swr refresh failed"),
            }
            cache.inner.kv.compare_and_delete(&lock_key, &token).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn cache() -> PriceCache {
        PriceCache::new(
            Arc::new(Kv::new()),
            PriceRest::new("http://127.0.0.1:1".into()),
        )
    }

    #[tokio::test]
    async fn fresh_entry_is_served() {
        let c = cache();
        c.upsert("BNB", dec!(650), PriceSource::Ws);
        assert_eq!(c.get_price("BNB").await.unwrap(), dec!(650));
    }

    #[tokio::test]
    async fn miss_under_held_lock_times_out() {
        let c = cache();
        // Simulate another refresher holding the lock and never filling
        // the cache.
        c.inner
            .kv
            .set("lock:price:BNB", "other", Duration::from_secs(10))
            .await;
        let started = tokio::time::Instant::now();
        let err = c.get_price("BNB").await.unwrap_err();
        assert!(matches!(err, EngineError::PriceUnavailable(_)));
        assert!(started.elapsed() >= MISS_POLL);
    }

    #[tokio::test]
    async fn miss_poll_picks_up_concurrent_fill() {
        let c = cache();
        c.inner
            .kv
            .set("lock:price:BNB", "other", Duration::from_secs(10))
            .await;
        let c2 = c.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            c2.upsert("BNB", dec!(651), PriceSource::Rest);
        });
        assert_eq!(c.get_price("BNB").await.unwrap(), dec!(651));
    }
}
