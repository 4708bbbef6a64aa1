use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::{ChainClient, ChainError};
use crate::model::{ChainKind, ChainSpec};

/// Legacy gas price boost applied to every send: +10%.
const GAS_BOOST_NUM: u128 = 110;
const GAS_BOOST_DEN: u128 = 100;

pub struct EvmClient;

impl EvmClient {
    fn require_evm(chain: &ChainSpec) -> Result<(), ChainError> {
        if chain.kind != ChainKind::Evm {
            return Err(ChainError::Unsupported(chain.kind.as_str().to_string()));
        }
        Ok(())
    }

    fn provider_for(chain: &ChainSpec) -> Result<impl Provider + Clone, ChainError> {
        let url = chain
            .rpc_url
            .parse()
            .map_err(|e| ChainError::Invalid(format!("rpc url for {}: {e}", chain.slug)))?;
        Ok(ProviderBuilder::new().connect_http(url))
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    async fn native_balance(
        &self,
        chain: &ChainSpec,
        address: &str,
        decimals: u8,
    ) -> Result<Decimal, ChainError> {
        Self::require_evm(chain)?;
        let addr: Address = address
            .parse()
            .map_err(|e| ChainError::Invalid(format!("address: {e}")))?;
        let provider = Self::provider_for(chain)?;
        let wei = provider
            .get_balance(addr)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        from_base_units(wei, decimals)
    }

    async fn gas_price(&self, chain: &ChainSpec) -> Result<u128, ChainError> {
        Self::require_evm(chain)?;
        let provider = Self::provider_for(chain)?;
        provider
            .get_gas_price()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn send_native(
        &self,
        chain: &ChainSpec,
        signer: &PrivateKeySigner,
        to: &str,
        amount: Decimal,
        decimals: u8,
    ) -> Result<String, ChainError> {
        Self::require_evm(chain)?;
        let to: Address = to
            .parse()
            .map_err(|e| ChainError::Invalid(format!("destination: {e}")))?;
        let value = to_base_units(amount, decimals)?;
        let from = signer.address();

        let url = chain
            .rpc_url
            .parse()
            .map_err(|e| ChainError::Invalid(format!("rpc url for {}: {e}", chain.slug)))?;
        let provider = ProviderBuilder::new()
            .wallet(signer.clone())
            .connect_http(url);

        // Refetch the nonce at latest inside the chain lock: the lock
        // guarantees no competing send for this chain is in flight.
        let nonce = provider
            .get_transaction_count(from)
            .await
            .map_err(|e| ChainError::Rpc(format!("nonce: {e}")))?;
        let gas_price = provider
            .get_gas_price()
            .await
            .map_err(|e| ChainError::Rpc(format!("fee data: {e}")))?;
        let boosted = gas_price.saturating_mul(GAS_BOOST_NUM) / GAS_BOOST_DEN;

        let tx = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_value(value)
            .with_nonce(nonce)
            .with_gas_price(boosted);

        let pending = provider
            .send_transaction(tx)
            .await
            .map_err(|e| ChainError::Submit(e.to_string()))?;
        let tx_hash = format!("{:#x}", *pending.tx_hash());

        match pending
            .with_required_confirmations(chain.confirmations)
            .watch()
            .await
        {
            Ok(confirmed) => Ok(format!("{confirmed:#x}")),
            // The hash exists, so the transfer may land even though we
            // did not see it confirm.
            Err(_) => Err(ChainError::Broadcasted { tx_hash }),
        }
    }
}

/// Token amount → integer base units, truncating excess precision.
pub fn to_base_units(amount: Decimal, decimals: u8) -> Result<U256, ChainError> {
    if amount < Decimal::ZERO {
        return Err(ChainError::Invalid("negative amount".into()));
    }
    let scale = Decimal::from_i128_with_scale(10i128.pow(decimals as u32), 0);
    let scaled = (amount * scale).trunc();
    let units = scaled
        .to_u128()
        .ok_or_else(|| ChainError::Invalid(format!("amount {amount} out of range")))?;
    Ok(U256::from(units))
}

/// Integer base units → token amount.
pub fn from_base_units(units: U256, decimals: u8) -> Result<Decimal, ChainError> {
    let raw: u128 = units
        .try_into()
        .map_err(|_| ChainError::Invalid("balance out of range".into()))?;
    let raw = i128::try_from(raw).map_err(|_| ChainError::Invalid("balance out of range".into()))?;
    Ok(Decimal::from_i128_with_scale(raw, decimals as u32).normalize())
}
