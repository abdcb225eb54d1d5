//! Typed client for the Razorpay-compatible payment gateway.
//!
//! Thin wrapper over the HTTP surface the payment service uses: orders,
//! payments (capture by payment id), payouts, and webhook verification.
//! Resilience policies wrap calls one level up; this crate only classifies
//! failures.

mod error;
pub mod types;
pub mod webhook;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

pub use error::GatewayError;
pub use types::BankAccount;
pub use types::CapturePaymentRequest;
pub use types::Contact;
pub use types::CreateOrderRequest;
pub use types::CreatePayoutRequest;
pub use types::FundAccount;
pub use types::Order;
pub use types::Payment;
pub use types::PaymentCollection;
pub use types::Payout;

pub const PAYOUT_MODE_IMPS: &str = "IMPS";
pub const PAYOUT_PURPOSE_VENDOR: &str = "vendor_payout";

pub struct RazorpayClient {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl RazorpayClient {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network(format!("building client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        })
    }

    pub async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order, GatewayError> {
        self.post("/v1/orders", request).await
    }

    pub async fn list_order_payments(
        &self,
        order_id: &str,
    ) -> Result<PaymentCollection, GatewayError> {
        self.get(&format!("/v1/orders/{order_id}/payments")).await
    }

    /// Capture an authorized payment. Keyed on the payment id observed from
    /// the webhook or the order-payments fetch, never on an order id.
    pub async fn capture_payment(
        &self,
        payment_id: &str,
        request: &CapturePaymentRequest,
    ) -> Result<Payment, GatewayError> {
        self.post(&format!("/v1/payments/{payment_id}/capture"), request)
            .await
    }

    pub async fn create_payout(
        &self,
        request: &CreatePayoutRequest,
    ) -> Result<Payout, GatewayError> {
        self.post("/v1/payouts", request).await
    }

    pub async fn fetch_payout(&self, payout_id: &str) -> Result<Payout, GatewayError> {
        self.get(&format!("/v1/payouts/{payout_id}")).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Network(format!("POST {path}: {e}")))?;
        Self::read(path, response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| GatewayError::Network(format!("GET {path}: {e}")))?;
        Self::read(path, response).await
    }

    async fn read<T: DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| GatewayError::BadResponse(format!("{path}: {e}")));
        }

        let (code, message) = match response.json::<ApiErrorBody>().await {
            Ok(body) => (
                body.error.code.unwrap_or_else(|| "UNKNOWN".to_string()),
                body.error.description.unwrap_or_default(),
            ),
            Err(_) => ("UNKNOWN".to_string(), String::new()),
        };

        Err(GatewayError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use resilience::Transience;
    use std::collections::HashMap;

    fn client(url: String) -> RazorpayClient {
        RazorpayClient::new(url, "rzp_test_key", "secret", Duration::from_secs(2)).unwrap()
    }

    fn basic_auth_header() -> String {
        format!("Basic {}", BASE64.encode("rzp_test_key:secret"))
    }

    #[tokio::test]
    async fn create_order_sends_paise_receipt_and_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/orders")
            .match_header("authorization", basic_auth_header().as_str())
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "amount": 40000,
                "currency": "INR",
                "receipt": "R-1001",
                "payment_capture": 1,
                "notes": { "enrollmentId": "e1" },
            })))
            .with_status(200)
            .with_body(
                r#"{"id":"order_1","amount":40000,"currency":"INR","receipt":"R-1001","status":"created"}"#,
            )
            .create_async()
            .await;

        let order = client(server.url())
            .create_order(&CreateOrderRequest {
                amount: 40_000,
                currency: "INR".to_string(),
                receipt: "R-1001".to_string(),
                payment_capture: 1,
                notes: HashMap::from([("enrollmentId".to_string(), "e1".to_string())]),
            })
            .await
            .unwrap();

        assert_eq!(order.id, "order_1");
        assert_eq!(order.status, "created");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_transient_client_errors_are_not() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/payouts")
            .with_status(503)
            .with_body(r#"{"error":{"code":"SERVER_ERROR","description":"try later"}}"#)
            .create_async()
            .await;

        let request = CreatePayoutRequest {
            account_number: "2323230041626905".to_string(),
            fund_account: FundAccount {
                account_type: "bank_account".to_string(),
                bank_account: BankAccount {
                    name: "Vendor One".to_string(),
                    ifsc: "HDFC0000001".to_string(),
                    account_number: "50100000001".to_string(),
                },
                contact: Contact {
                    name: "Vendor One".to_string(),
                    email: Some("vendor@x.io".to_string()),
                    contact: Some("919876543210".to_string()),
                    contact_type: "vendor".to_string(),
                },
            },
            amount: 36_000,
            currency: "INR".to_string(),
            mode: PAYOUT_MODE_IMPS.to_string(),
            purpose: PAYOUT_PURPOSE_VENDOR.to_string(),
            queue_if_low_balance: true,
            reference_id: "PAYOUT_42".to_string(),
            narration: "Treasure hunt payout".to_string(),
            notes: HashMap::new(),
        };

        let err = client(server.url()).create_payout(&request).await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, GatewayError::Api { status: 503, .. }));

        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/payouts")
            .with_status(400)
            .with_body(r#"{"error":{"code":"BAD_REQUEST_ERROR","description":"ifsc invalid"}}"#)
            .create_async()
            .await;

        let err = client(server.url()).create_payout(&request).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.code(), "BAD_REQUEST_ERROR");
    }

    #[tokio::test]
    async fn lists_payments_for_order() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/orders/order_1/payments")
            .with_status(200)
            .with_body(
                r#"{"count":2,"items":[
                    {"id":"pay_1","order_id":"order_1","amount":40000,"currency":"INR","status":"failed","created_at":1714557000},
                    {"id":"pay_2","order_id":"order_1","amount":40000,"currency":"INR","status":"captured","created_at":1714557600}
                ]}"#,
            )
            .create_async()
            .await;

        let payments = client(server.url())
            .list_order_payments("order_1")
            .await
            .unwrap();

        assert_eq!(payments.count, 2);
        assert_eq!(payments.items[1].status, "captured");
    }
}
