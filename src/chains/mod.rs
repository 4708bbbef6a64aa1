pub mod evm;

use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::model::ChainSpec;

#[derive(Debug, Error)]
pub enum ChainError {
    /// The transaction entered the network but confirmation was not
    /// observed. Carries the broadcast hash: money may be in flight.
    #[error("broadcast but unconfirmed: {tx_hash}")]
    Broadcasted { tx_hash: String },

    #[error("chain kind {0} not supported")]
    Unsupported(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("submit error: {0}")]
    Submit(String),

    #[error("invalid input: {0}")]
    Invalid(String),
}

/// Blockchain access used by the hot wallet. A trait seam so the order
/// engine can be driven by a fake chain in tests.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn native_balance(
        &self,
        chain: &ChainSpec,
        address: &str,
        decimals: u8,
    ) -> Result<Decimal, ChainError>;

    async fn gas_price(&self, chain: &ChainSpec) -> Result<u128, ChainError>;

    /// Submit a native transfer and await confirmations. Must only be
    /// called while holding the chain lock.
    async fn send_native(
        &self,
        chain: &ChainSpec,
        signer: &PrivateKeySigner,
        to: &str,
        amount: Decimal,
        decimals: u8,
    ) -> Result<String, ChainError>;
}
