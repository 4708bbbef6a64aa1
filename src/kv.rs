use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::{EngineError, EngineResult};

/// In-process key/value store with per-key expiry.
///
/// Backs the distributed-mutex semantics the engine relies on: `set_nx`
/// acquires, `compare_and_delete` releases only when the caller still owns
/// the lock. Also holds conversation blobs and other short-lived state.
pub struct Kv {
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Kv {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let mut map = self.entries.lock().await;
        map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Set only if the key is absent (or expired). Returns true on acquire.
    pub async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let mut map = self.entries.lock().await;
        let now = Instant::now();
        match map.get(key) {
            Some(e) if e.expires_at > now => false,
            _ => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string(),
                        expires_at: now + ttl,
                    },
                );
                true
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut map = self.entries.lock().await;
        match map.get(key) {
            Some(e) if e.expires_at > Instant::now() => Some(e.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn delete(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    /// Delete only if the stored value matches. Returns true when deleted.
    /// This is the lock-release predicate: a holder whose TTL lapsed and
    /// whose lock was re-acquired by someone else must not free it.
    pub async fn compare_and_delete(&self, key: &str, value: &str) -> bool {
        let mut map = self.entries.lock().await;
        match map.get(key) {
            Some(e) if e.value == value && e.expires_at > Instant::now() => {
                map.remove(key);
                true
            }
            _ => false,
        }
    }
}

impl Default for Kv {
    fn default() -> Self {
        Self::new()
    }
}

/// Random owner token for lock values.
pub fn lock_token() -> String {
    use rand::Rng;
    let bytes: [u8; 16] = rand::rng().random();
    alloy::hex::encode(bytes)
}

/// Acquire `key` with bounded retries, returning the owner token.
pub async fn acquire_lock(
    kv: &Kv,
    key: &str,
    ttl: Duration,
    retries: u32,
    backoff: Duration,
) -> EngineResult<String> {
    let token = lock_token();
    for attempt in 0..=retries {
        if kv.set_nx(key, &token, ttl).await {
            return Ok(token);
        }
        if attempt < retries {
            tokio::time::sleep(backoff * (attempt + 1)).await;
        }
    }
    Err(EngineError::LockContention)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_respects_existing() {
        let kv = Kv::new();
        assert!(kv.set_nx("k", "a", Duration::from_secs(5)).await);
        assert!(!kv.set_nx("k", "b", Duration::from_secs(5)).await);
        assert_eq!(kv.get("k").await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn expired_key_can_be_reacquired() {
        let kv = Kv::new();
        assert!(kv.set_nx("k", "a", Duration::from_millis(10)).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(kv.set_nx("k", "b", Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn compare_and_delete_only_matches_owner() {
        let kv = Kv::new();
        kv.set("k", "owner-1", Duration::from_secs(5)).await;
        assert!(!kv.compare_and_delete("k", "owner-2").await);
        assert!(kv.compare_and_delete("k", "owner-1").await);
        assert!(kv.get("k").await.is_none());
    }
}
