use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{info, warn};

use super::keys;
use crate::chains::{ChainClient, ChainError};
use crate::db::Db;
use crate::error::{EngineError, EngineResult};
use crate::kv::{Kv, lock_token};
use crate::model::{ChainKind, ChainSpec};
use crate::store::chains;

const CHAIN_LOCK_TTL: Duration = Duration::from_secs(180);
const LOCK_RETRIES: u32 = 30;
const LOCK_RETRY_DELAY: Duration = Duration::from_secs(1);
const LOCK_DEADLINE: Duration = Duration::from_secs(35);

/// Holds decrypted signing keys in process memory and serializes sends
/// per chain. The signer map is built by `init` and replaced wholesale by
/// `refresh`, never mutated piecemeal.
pub struct HotWallet {
    signers: RwLock<HashMap<String, PrivateKeySigner>>,
    kv: Arc<Kv>,
    client: Arc<dyn ChainClient>,
}

impl HotWallet {
    pub fn new(kv: Arc<Kv>, client: Arc<dyn ChainClient>) -> Self {
        Self {
            signers: RwLock::new(HashMap::new()),
            kv,
            client,
        }
    }

    /// Decrypt every active chain's signing key and install the map.
    pub async fn init(&self, db: &Db, password: &str) -> Result<()> {
        let specs = {
            let conn = db.lock().await;
            chains::list_active(&conn).context("loading chains")?
        };

        let mut map = HashMap::new();
        for spec in specs {
            if spec.kind != ChainKind::Evm {
                warn!(chain = %spec.slug, kind = %spec.kind.as_str(),
                      "no signer support for chain kind, skipping");
                continue;
            }
            let key_hex = keys::decrypt_key_blob(&spec.encrypted_key, password)
                .with_context(|| format!("decrypting key for {}", spec.slug))?;
            let signer: PrivateKeySigner = key_hex
                .parse()
                .map_err(|e| anyhow::anyhow!("parsing key for {}: {e}", spec.slug))?;
            info!(chain = %spec.slug, address = %signer.address(), "signer loaded");
            map.insert(spec.slug, signer);
        }

        *self.signers.write().expect("signer map lock") = map;
        Ok(())
    }

    pub async fn refresh(&self, db: &Db, password: &str) -> Result<()> {
        self.init(db, password).await
    }

    fn signer_for(&self, slug: &str) -> EngineResult<PrivateKeySigner> {
        self.signers
            .read()
            .expect("signer map lock")
            .get(slug)
            .cloned()
            .ok_or_else(|| EngineError::Critical(format!("no signer for chain {slug}")))
    }

    /// The hot wallet's address on a chain, checksummed.
    pub fn address(&self, slug: &str) -> Option<String> {
        self.signers
            .read()
            .expect("signer map lock")
            .get(slug)
            .map(|s| s.address().to_checksum(None))
    }

    pub async fn native_balance(&self, chain: &ChainSpec, decimals: u8) -> EngineResult<Decimal> {
        if chain.kind != ChainKind::Evm {
            return Err(EngineError::UnsupportedChain(chain.kind.as_str().to_string()));
        }
        let address = self
            .address(&chain.slug)
            .ok_or_else(|| EngineError::Critical(format!("no signer for chain {}", chain.slug)))?;
        self.client
            .native_balance(chain, &address, decimals)
            .await
            .map_err(map_chain_err)
    }

    pub async fn gas_price(&self, chain: &ChainSpec) -> EngineResult<u128> {
        self.client.gas_price(chain).await.map_err(map_chain_err)
    }

    /// Dispatch a native transfer. Only one send may execute per chain at
    /// a time; the mutex is `lock:chain:<slug>` with a random owner token
    /// and compare-and-delete release.
    ///
    /// Chain kinds without a signer implementation fail with
    /// `UnsupportedChain` before any lock or signer lookup: no transfer
    /// can have left the wallet, so the payout executor treats it as a
    /// safe failure.
    pub async fn send_native(
        &self,
        chain: &ChainSpec,
        to: &str,
        amount: Decimal,
        decimals: u8,
    ) -> EngineResult<String> {
        if chain.kind != ChainKind::Evm {
            return Err(EngineError::UnsupportedChain(chain.kind.as_str().to_string()));
        }
        let signer = self.signer_for(&chain.slug)?;
        let lock_key = format!("lock:chain:{}", chain.slug);
        let token = self.acquire_chain_lock(&lock_key, &chain.slug).await?;

        let result = self
            .client
            .send_native(chain, &signer, to, amount, decimals)
            .await;

        self.kv.compare_and_delete(&lock_key, &token).await;
        result.map_err(map_chain_err)
    }

    async fn acquire_chain_lock(&self, key: &str, slug: &str) -> EngineResult<String> {
        let token = lock_token();
        let deadline = Instant::now() + LOCK_DEADLINE;
        for attempt in 0..LOCK_RETRIES {
            if self.kv.set_nx(key, &token, CHAIN_LOCK_TTL).await {
                return Ok(token);
            }
            if attempt + 1 < LOCK_RETRIES && Instant::now() + LOCK_RETRY_DELAY < deadline {
                tokio::time::sleep(LOCK_RETRY_DELAY).await;
            } else {
                break;
            }
        }
        Err(EngineError::LockAcquisition(slug.to_string()))
    }
}

fn map_chain_err(e: ChainError) -> EngineError {
    match e {
        ChainError::Broadcasted { tx_hash } => EngineError::TxBroadcasted { tx_hash },
        ChainError::Unsupported(kind) => EngineError::UnsupportedChain(kind),
        other => EngineError::External(other.to_string()),
    }
}
