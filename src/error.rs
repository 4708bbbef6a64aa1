use thiserror::Error;

/// Domain error taxonomy. Anything that decides fund movement does so via
/// conditional database updates; these errors only report the outcome.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("a pending order already exists")]
    PendingOrderExists { order_id: String },

    #[error("insufficient inventory for {chain}/{symbol}")]
    InsufficientInventory { chain: String, symbol: String },

    #[error("voucher quota exhausted")]
    VoucherQuotaExceeded,

    #[error("voucher rejected: {0}")]
    VoucherRejected(String),

    #[error("price moved {drift_percent}% since confirmation")]
    Slippage { drift_percent: String },

    #[error("another operation is in progress, try again shortly")]
    LockContention,

    #[error("price unavailable for {0}")]
    PriceUnavailable(String),

    #[error("could not acquire chain lock for {0}")]
    LockAcquisition(String),

    /// Money may be in flight: the transaction was broadcast but
    /// confirmation was not observed.
    #[error("transaction broadcast but unconfirmed: {tx_hash}")]
    TxBroadcasted { tx_hash: String },

    #[error("chain kind {0} is not supported for payout")]
    UnsupportedChain(String),

    #[error("order {order_id} cannot be cancelled from {status}")]
    NotCancellable { order_id: String, status: String },

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("external service error: {0}")]
    External(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("critical: {0}")]
    Critical(String),
}

impl EngineError {
    pub fn external(err: impl std::fmt::Display) -> Self {
        EngineError::External(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
