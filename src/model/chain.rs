use serde::{Deserialize, Serialize};

/// Families of chains the service can hold custody on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChainKind {
    Evm,
    Solana,
    Sui,
}

impl ChainKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::Evm => "EVM",
            ChainKind::Solana => "SOLANA",
            ChainKind::Sui => "SUI",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EVM" => Some(ChainKind::Evm),
            "SOLANA" => Some(ChainKind::Solana),
            "SUI" => Some(ChainKind::Sui),
            _ => None,
        }
    }
}

/// A registered chain. The slug is immutable once created; exactly one
/// signing key blob exists per chain at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSpec {
    pub slug: String,
    pub kind: ChainKind,
    pub rpc_url: String,
    pub explorer_url: Option<String>,
    pub chain_id: Option<u64>,
    #[serde(skip_serializing)]
    pub encrypted_key: String,
    pub confirmations: u64,
    pub active: bool,
}

impl ChainSpec {
    /// Confirmation depth to await before an EVM send is considered final.
    /// BSC 3, Base 3, Polygon 5, Ethereum 1.
    pub fn default_confirmations(slug: &str) -> u64 {
        match slug {
            "bsc" => 3,
            "base" => 3,
            "polygon" => 5,
            _ => 1,
        }
    }
}
