use hmac::Hmac;
use hmac::Mac;
use serde::Deserialize;
use sha2::Sha256;

pub const PAYMENT_CAPTURED: &str = "payment.captured";
pub const PAYMENT_AUTHORIZED: &str = "payment.authorized";
pub const PAYMENT_FAILED: &str = "payment.failed";
pub const PAYOUT_PROCESSED: &str = "payout.processed";
pub const PAYOUT_FAILED: &str = "payout.failed";
pub const PAYOUT_REVERSED: &str = "payout.reversed";

/// Verify the `X-Razorpay-Signature` header: hex HMAC-SHA256 over the raw
/// request body. The comparison is constant time via `Mac::verify_slice`.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub payload: WebhookPayload,
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WebhookPayload {
    pub payment: Option<Wrapped<PaymentEntity>>,
    pub payout: Option<Wrapped<PayoutEntity>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Wrapped<T> {
    pub entity: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayoutEntity {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub processed_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_valid_signature() {
        let body = br#"{"event":"payment.captured"}"#;
        let signature = sign("whsec", body);

        assert!(verify_signature("whsec", body, &signature));
    }

    #[test]
    fn rejects_wrong_secret_and_tampered_body() {
        let body = br#"{"event":"payment.captured"}"#;
        let signature = sign("whsec", body);

        assert!(!verify_signature("other", body, &signature));
        assert!(!verify_signature("whsec", br#"{"event":"payment.failed"}"#, &signature));
        assert!(!verify_signature("whsec", body, "zz-not-hex"));
    }

    #[test]
    fn parses_payment_captured_event() {
        let body = r#"{
            "event": "payment.captured",
            "payload": {
                "payment": {
                    "entity": {
                        "id": "pay_1",
                        "order_id": "order_1",
                        "amount": 40000,
                        "currency": "INR",
                        "status": "captured",
                        "method": "upi"
                    }
                }
            },
            "created_at": 1714557600
        }"#;

        let event: WebhookEvent = serde_json::from_str(body).unwrap();
        let payment = event.payload.payment.unwrap().entity;

        assert_eq!(event.event, PAYMENT_CAPTURED);
        assert_eq!(payment.order_id.as_deref(), Some("order_1"));
        assert_eq!(payment.amount, 40_000);
        assert!(event.payload.payout.is_none());
    }

    #[test]
    fn parses_payout_failed_event() {
        let body = r#"{
            "event": "payout.failed",
            "payload": {
                "payout": {
                    "entity": {
                        "id": "pout_X",
                        "amount": 36000,
                        "currency": "INR",
                        "status": "failed",
                        "reference_id": "PAYOUT_42",
                        "failure_reason": "beneficiary bank offline"
                    }
                }
            }
        }"#;

        let event: WebhookEvent = serde_json::from_str(body).unwrap();
        let payout = event.payload.payout.unwrap().entity;

        assert_eq!(event.event, PAYOUT_FAILED);
        assert_eq!(payout.reference_id.as_deref(), Some("PAYOUT_42"));
        assert_eq!(payout.failure_reason.as_deref(), Some("beneficiary bank offline"));
    }
}
