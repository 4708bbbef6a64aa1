use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::{Digest, Sha512};

use super::PaymentOutcome;

/// Gateway notification body. Parsed strictly: missing required fields
/// fail deserialization; extra gateway fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
    pub signature_key: String,
    pub transaction_status: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
}

/// `SHA-512(order_id || status_code || gross_amount || server_key)`.
pub fn verify_signature(p: &WebhookPayload, server_key: &str) -> bool {
    let mut hasher = Sha512::new();
    hasher.update(p.order_id.as_bytes());
    hasher.update(p.status_code.as_bytes());
    hasher.update(p.gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    let expected = alloy::hex::encode(hasher.finalize());
    expected.eq_ignore_ascii_case(&p.signature_key)
}

/// Map gateway transaction status to an outcome.
pub fn classify(transaction_status: &str, fraud_status: Option<&str>) -> PaymentOutcome {
    match transaction_status {
        "settlement" | "paid" => PaymentOutcome::Success,
        "capture" if fraud_status == Some("accept") => PaymentOutcome::Success,
        "deny" | "cancel" | "expire" | "failure" => PaymentOutcome::Failed,
        _ => PaymentOutcome::Pending,
    }
}

/// Amount check: the reported gross must match the expected payable
/// within `max(0.5%, 1000 IDR)`. A violation is a fraud signal.
pub fn amount_within_tolerance(expected_idr: i64, gross_amount: &str) -> bool {
    let Ok(gross) = Decimal::from_str(gross_amount) else {
        return false;
    };
    let expected = Decimal::from(expected_idr);
    let tolerance = (expected * Decimal::new(5, 3)).max(Decimal::from(1000));
    (gross - expected).abs() <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(server_key: &str) -> WebhookPayload {
        let mut p = WebhookPayload {
            order_id: "KIOS-1234-99".into(),
            status_code: "200".into(),
            gross_amount: "100000.00".into(),
            signature_key: String::new(),
            transaction_status: "settlement".into(),
            fraud_status: None,
        };
        let mut hasher = Sha512::new();
        hasher.update(p.order_id.as_bytes());
        hasher.update(p.status_code.as_bytes());
        hasher.update(p.gross_amount.as_bytes());
        hasher.update(server_key.as_bytes());
        p.signature_key = alloy::hex::encode(hasher.finalize());
        p
    }

    #[test]
    fn signature_round_trip() {
        let p = payload("server-key");
        assert!(verify_signature(&p, "server-key"));
        assert!(!verify_signature(&p, "other-key"));
    }

    #[test]
    fn tampered_amount_breaks_signature() {
        let mut p = payload("server-key");
        p.gross_amount = "999999.00".into();
        assert!(!verify_signature(&p, "server-key"));
    }

    #[test]
    fn classification() {
        assert_eq!(classify("settlement", None), PaymentOutcome::Success);
        assert_eq!(classify("paid", None), PaymentOutcome::Success);
        assert_eq!(classify("capture", Some("accept")), PaymentOutcome::Success);
        assert_eq!(classify("capture", Some("challenge")), PaymentOutcome::Pending);
        assert_eq!(classify("deny", None), PaymentOutcome::Failed);
        assert_eq!(classify("expire", None), PaymentOutcome::Failed);
        assert_eq!(classify("pending", None), PaymentOutcome::Pending);
    }

    #[test]
    fn amount_tolerance() {
        // 0.5% of 1,000,000 = 5,000 > 1,000 floor.
        assert!(amount_within_tolerance(1_000_000, "1004000.00"));
        assert!(!amount_within_tolerance(1_000_000, "1006000.00"));
        // Small order: the 1,000 IDR floor dominates.
        assert!(amount_within_tolerance(50_000, "50900"));
        assert!(!amount_within_tolerance(50_000, "51500"));
        assert!(!amount_within_tolerance(50_000, "garbage"));
    }
}
