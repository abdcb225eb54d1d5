use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    /// Amount in minor units (paise).
    pub amount: i64,
    pub currency: String,
    /// De-duplication handle on the gateway side; we pass the invoice
    /// number so replayed enrollments hit the same order.
    pub receipt: String,
    pub payment_capture: u8,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub notes: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Payment {
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
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentCollection {
    pub count: u32,
    pub items: Vec<Payment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapturePaymentRequest {
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePayoutRequest {
    /// Debit account at the gateway, not the vendor's account.
    pub account_number: String,
    pub fund_account: FundAccount,
    pub amount: i64,
    pub currency: String,
    pub mode: String,
    pub purpose: String,
    pub queue_if_low_balance: bool,
    pub reference_id: String,
    pub narration: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub notes: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FundAccount {
    pub account_type: String,
    pub bank_account: BankAccount,
    pub contact: Contact,
}

#[derive(Debug, Clone, Serialize)]
pub struct BankAccount {
    pub name: String,
    pub ifsc: String,
    pub account_number: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Contact {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(rename = "type")]
    pub contact_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Payout {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub utr: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}
