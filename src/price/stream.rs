use std::str::FromStr;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use super::{PriceCache, PriceSource, Tracked};

/// Events with more lag than this are stale bloat and dropped.
const MAX_EVENT_LAG_MS: i64 = 5_000;
/// Watchdog: terminate the connection when silent this long.
const WATCHDOG: Duration = Duration::from_secs(60);
/// Reconnect backoff base bound.
const BACKOFF_CAP: Duration = Duration::from_secs(5);
const METRICS_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct MiniTicker {
    #[serde(rename = "E")]
    event_time_ms: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    close: String,
}

#[derive(Default)]
struct WindowMetrics {
    updates: u64,
    drops: u64,
    errors: u64,
    max_lag_ms: i64,
}

/// Streaming price writer. Runs forever; the caller owns the task handle.
pub async fn run(cache: PriceCache, tracked: Tracked, url: String) {
    let mut attempt: u32 = 0;
    loop {
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!(%url, "price stream connected");
                attempt = 0;
                if let Err(e) = pump(ws, &cache, &tracked).await {
                    warn!(error = %e, "price stream closed");
                }
            }
            Err(e) => {
                warn!(error = %e, "price stream connect failed");
            }
        }
        attempt = attempt.saturating_add(1);
        let backoff = Duration::from_secs(1u64 << attempt.min(3)).min(BACKOFF_CAP);
        tokio::time::sleep(backoff).await;
    }
}

async fn pump(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    cache: &PriceCache,
    tracked: &Tracked,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let (mut write, mut read) = ws.split();
    let mut metrics = WindowMetrics::default();
    let mut window_started = Instant::now();

    loop {
        if window_started.elapsed() >= METRICS_WINDOW {
            info!(
                updates = metrics.updates,
                drops = metrics.drops,
                errors = metrics.errors,
                max_lag_ms = metrics.max_lag_ms,
                "price stream window"
            );
            metrics = WindowMetrics::default();
            window_started = Instant::now();
        }

        let msg = match tokio::time::timeout(WATCHDOG, read.next()).await {
            Err(_) => {
                warn!("price stream watchdog: no message for 60s, reconnecting");
                return Ok(());
            }
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => return Err(e),
            Ok(Some(Ok(m))) => m,
        };

        match msg {
            Message::Text(txt) => {
                if let Err(()) = handle_batch(&txt, cache, tracked, &mut metrics) {
                    metrics.errors += 1;
                }
            }
            Message::Ping(payload) => {
                let _ = write.send(Message::Pong(payload)).await;
            }
            Message::Close(_) => return Ok(()),
            _ => {}
        }
    }
}

fn handle_batch(
    raw: &str,
    cache: &PriceCache,
    tracked: &Tracked,
    metrics: &mut WindowMetrics,
) -> Result<(), ()> {
    let tickers: Vec<MiniTicker> = serde_json::from_str(raw).map_err(|_| ())?;
    let now_ms = chrono::Utc::now().timestamp_millis();

    for t in tickers {
        let Some(base) = t.symbol.strip_suffix("USDT") else {
            continue;
        };
        if !tracked.contains(base) {
            continue;
        }

        let lag = now_ms - t.event_time_ms;
        metrics.max_lag_ms = metrics.max_lag_ms.max(lag);
        if lag > MAX_EVENT_LAG_MS {
            metrics.drops += 1;
            continue;
        }

        match Decimal::from_str(&t.close) {
            Ok(price) => {
                cache.upsert(base, price, PriceSource::Ws);
                metrics.updates += 1;
            }
            Err(_) => metrics.errors += 1,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Kv;
    use crate::price::PriceRest;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn fixture() -> (PriceCache, Tracked) {
        let cache = PriceCache::new(
            Arc::new(Kv::new()),
            PriceRest::new("http://127.0.0.1:1".into()),
        );
        let tracked = Tracked::new();
        tracked.replace(vec!["BNB".into()]);
        (cache, tracked)
    }

    #[test]
    fn fresh_ticker_is_upserted() {
        let (cache, tracked) = fixture();
        let now = chrono::Utc::now().timestamp_millis();
        let raw = format!(r#"[{{"E":{now},"s":"BNBUSDT","c":"650.5"}}]"#);
        let mut m = WindowMetrics::default();
        handle_batch(&raw, &cache, &tracked, &mut m).unwrap();
        assert_eq!(m.updates, 1);
        assert_eq!(cache.entry("BNB").unwrap().price_usd, dec!(650.5));
    }

    #[test]
    fn laggy_ticker_is_dropped() {
        let (cache, tracked) = fixture();
        let old = chrono::Utc::now().timestamp_millis() - 10_000;
        let raw = format!(r#"[{{"E":{old},"s":"BNBUSDT","c":"650.5"}}]"#);
        let mut m = WindowMetrics::default();
        handle_batch(&raw, &cache, &tracked, &mut m).unwrap();
        assert_eq!(m.drops, 1);
        assert!(cache.entry("BNB").is_none());
    }

    #[test]
    fn untracked_symbol_is_ignored() {
        let (cache, tracked) = fixture();
        let now = chrono::Utc::now().timestamp_millis();
        let raw = format!(r#"[{{"E":{now},"s":"DOGEUSDT","c":"0.1"}}]"#);
        let mut m = WindowMetrics::default();
        handle_batch(&raw, &cache, &tracked, &mut m).unwrap();
        assert_eq!(m.updates, 0);
    }
}
