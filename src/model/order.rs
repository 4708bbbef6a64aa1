use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order lifecycle.
///
/// ```text
/// PENDING ──cancel/expiry/webhook──► CANCELLED | EXPIRED | PAID
/// PAID ──executor lock──► PROCESSING ──► SUCCESS | FAILED
/// ```
///
/// `SUCCESS`, `FAILED`, `CANCELLED`, `EXPIRED` are terminal. Every
/// transition is a conditional update matching the prior status, so at
/// most one writer effects each edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Processing,
    Success,
    Failed,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Success => "SUCCESS",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OrderStatus::Pending),
            "PAID" => Some(OrderStatus::Paid),
            "PROCESSING" => Some(OrderStatus::Processing),
            "SUCCESS" => Some(OrderStatus::Success),
            "FAILED" => Some(OrderStatus::Failed),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "EXPIRED" => Some(OrderStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Success
                | OrderStatus::Failed
                | OrderStatus::Cancelled
                | OrderStatus::Expired
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    Qris,
    Va,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Qris => "QRIS",
            PaymentMethod::Va => "VA",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "QRIS" => Some(PaymentMethod::Qris),
            "VA" => Some(PaymentMethod::Va),
            _ => None,
        }
    }

    /// Flat gateway fee in whole rupiah.
    pub fn fee_idr(&self) -> i64 {
        match self {
            PaymentMethod::Qris => 0,
            PaymentMethod::Va => 4000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub chain: String,
    pub symbol: String,
    /// Post-discount payable, whole rupiah.
    pub amount_idr: i64,
    pub amount_token: Decimal,
    pub markup_percent: Decimal,
    pub wallet_address: String,
    pub voucher_id: Option<String>,
    pub status: OrderStatus,
    pub payment_method: Option<PaymentMethod>,
    pub fee_idr: i64,
    pub total_pay: i64,
    pub tx_hash: Option<String>,
    pub midtrans_id: Option<String>,
    pub payment_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub paid_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl Order {
    /// The rupiah amount the gateway is expected to collect.
    pub fn expected_pay(&self) -> i64 {
        if self.total_pay > 0 {
            self.total_pay
        } else {
            self.amount_idr
        }
    }
}
