use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;

/// Inbound `treasure.enrollment.created` payload, as produced by the
/// enrollment service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentCreated {
    pub enrollment_id: String,
    /// Registration identifier; doubles as the invoice number and therefore
    /// as the idempotency key for re-delivered enrollment events.
    pub registration_id: String,
    pub user_id: String,
    pub plan_id: String,
    pub plan_title: String,
    pub enrollment_type: EnrollmentType,
    #[serde(default)]
    pub team_name: Option<String>,
    #[serde(default)]
    pub team_size: Option<u32>,
    pub base_amount: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub convenience_fee: Decimal,
    pub platform_fee: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub promo_code: Option<String>,
    #[serde(default)]
    pub promotion_name: Option<String>,
    pub billing_name: String,
    pub billing_email: String,
    pub billing_phone: String,
    #[serde(default)]
    pub billing_address: Option<String>,
    #[serde(default)]
    pub vendor_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentType {
    Individual,
    Team,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn deserializes_spec_sample() {
        let json = r#"{
            "enrollmentId": "e1",
            "registrationId": "R-1001",
            "userId": "u1",
            "planId": "p1",
            "planTitle": "Mumbai Heritage Hunt",
            "enrollmentType": "INDIVIDUAL",
            "baseAmount": 500,
            "discountAmount": 100,
            "taxAmount": 0,
            "convenienceFee": 0,
            "platformFee": 0,
            "totalAmount": 400,
            "currency": "INR",
            "vendorId": "v1",
            "billingName": "P. Sharma",
            "billingEmail": "p@x.io",
            "billingPhone": "+919876543210"
        }"#;

        let event: EnrollmentCreated = serde_json::from_str(json).unwrap();

        assert_eq!(event.registration_id, "R-1001");
        assert_eq!(event.enrollment_type, EnrollmentType::Individual);
        assert_eq!(event.total_amount, dec!(400));
        assert_eq!(event.vendor_id.as_deref(), Some("v1"));
        assert_eq!(event.team_name, None);
    }
}
