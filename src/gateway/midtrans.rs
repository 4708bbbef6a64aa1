use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{EngineError, EngineResult};
use crate::model::PaymentMethod;

const CHARGE_TIMEOUT: Duration = Duration::from_secs(15);
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// Gateway-side order id, generated fresh per charge attempt.
    pub midtrans_id: String,
    pub method: PaymentMethod,
    pub gross_amount: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ChargeResponse {
    pub payment_url: Option<String>,
    pub qr_url: Option<String>,
    pub va_number: Option<String>,
    pub expiry_time: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayStatus {
    pub transaction_status: String,
    pub fraud_status: Option<String>,
    pub status_code: Option<String>,
    pub gross_amount: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success,
    Failed,
    Pending,
}

impl GatewayStatus {
    pub fn outcome(&self) -> PaymentOutcome {
        super::webhook::classify(&self.transaction_status, self.fraud_status.as_deref())
    }
}

/// Payment gateway seam; the real implementation is Midtrans Core API.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, req: &ChargeRequest) -> EngineResult<ChargeResponse>;
    async fn status(&self, midtrans_id: &str) -> EngineResult<GatewayStatus>;
}

pub struct Midtrans {
    http: reqwest::Client,
    base: String,
    auth_header: String,
}

impl Midtrans {
    pub fn new(server_key: &str, production: bool) -> Self {
        let base = if production {
            "https://api.midtrans.com".to_string()
        } else {
            "https://api.sandbox.midtrans.com".to_string()
        };
        Self {
            http: reqwest::Client::new(),
            base,
            auth_header: format!("Basic {}", base64_encode(format!("{server_key}:").as_bytes())),
        }
    }
}

#[async_trait]
impl PaymentGateway for Midtrans {
    async fn charge(&self, req: &ChargeRequest) -> EngineResult<ChargeResponse> {
        let body = match req.method {
            PaymentMethod::Qris => json!({
                "payment_type": "qris",
                "transaction_details": {
                    "order_id": req.midtrans_id,
                    "gross_amount": req.gross_amount,
                },
            }),
            PaymentMethod::Va => json!({
                "payment_type": "bank_transfer",
                "bank_transfer": { "bank": "bca" },
                "transaction_details": {
                    "order_id": req.midtrans_id,
                    "gross_amount": req.gross_amount,
                },
            }),
        };

        let resp: Value = self
            .http
            .post(format!("{}/v2/charge", self.base))
            .header("authorization", &self.auth_header)
            .timeout(CHARGE_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(EngineError::external)?
            .json()
            .await
            .map_err(EngineError::external)?;

        let status_code = resp["status_code"].as_str().unwrap_or_default();
        if !matches!(status_code, "200" | "201") {
            let msg = resp["status_message"].as_str().unwrap_or("charge rejected");
            return Err(EngineError::External(format!(
                "gateway charge failed ({status_code}): {msg}"
            )));
        }

        let qr_url = resp["actions"].as_array().and_then(|actions| {
            actions.iter().find_map(|a| {
                (a["name"].as_str() == Some("generate-qr-code"))
                    .then(|| a["url"].as_str().map(str::to_string))
                    .flatten()
            })
        });
        let va_number = resp["va_numbers"]
            .as_array()
            .and_then(|v| v.first())
            .and_then(|v| v["va_number"].as_str())
            .map(str::to_string);

        Ok(ChargeResponse {
            payment_url: resp["redirect_url"].as_str().map(str::to_string),
            qr_url,
            va_number,
            expiry_time: resp["expiry_time"].as_str().map(str::to_string),
        })
    }

    async fn status(&self, midtrans_id: &str) -> EngineResult<GatewayStatus> {
        let resp: Value = self
            .http
            .get(format!("{}/v2/{}/status", self.base, midtrans_id))
            .header("authorization", &self.auth_header)
            .timeout(STATUS_TIMEOUT)
            .send()
            .await
            .map_err(EngineError::external)?
            .json()
            .await
            .map_err(EngineError::external)?;

        let transaction_status = resp["transaction_status"]
            .as_str()
            .ok_or_else(|| EngineError::External("status response missing transaction_status".into()))?
            .to_string();

        Ok(GatewayStatus {
            transaction_status,
            fraud_status: resp["fraud_status"].as_str().map(str::to_string),
            status_code: resp["status_code"].as_str().map(str::to_string),
            gross_amount: resp["gross_amount"].as_str().map(str::to_string),
        })
    }
}

fn base64_encode(data: &[u8]) -> String {
    use std::fmt::Write;
    let alphabet = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut s = String::new();
    for chunk in data.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = chunk.get(1).copied().unwrap_or(0) as u32;
        let b2 = chunk.get(2).copied().unwrap_or(0) as u32;
        let n = (b0 << 16) | (b1 << 8) | b2;
        let _ = write!(s, "{}", alphabet[((n >> 18) & 63) as usize] as char);
        let _ = write!(s, "{}", alphabet[((n >> 12) & 63) as usize] as char);
        if chunk.len() > 1 {
            let _ = write!(s, "{}", alphabet[((n >> 6) & 63) as usize] as char);
        } else {
            s.push('=');
        }
        if chunk.len() > 2 {
            let _ = write!(s, "{}", alphabet[(n & 63) as usize] as char);
        } else {
            s.push('=');
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_encoding() {
        // "SB-key:" → base64
        assert_eq!(base64_encode(b"SB-key:"), "U0Ita2V5Og==");
    }
}
