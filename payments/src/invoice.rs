use crate::db::invoices;
use crate::db::invoices::Invoice;
use crate::PaymentError;
use commons::money;
use commons::EnrollmentCreated;
use diesel::PgConnection;
use rust_decimal::Decimal;

/// Derive (or re-read) the invoice for an enrollment. Idempotent by
/// registration id: a replayed event returns the existing row untouched.
/// Returns the invoice and whether this call created it.
pub fn generate_invoice(
    conn: &mut PgConnection,
    enrollment: &EnrollmentCreated,
) -> Result<(Invoice, bool), PaymentError> {
    validate_enrollment(enrollment)?;

    let inserted = invoices::insert_from_enrollment(conn, enrollment)?;
    let invoice = invoices::by_registration_id(conn, &enrollment.registration_id)?
        .ok_or_else(|| PaymentError::NotFound(format!("invoice {}", enrollment.registration_id)))?;

    if inserted > 0 {
        tracing::info!(
            invoice_number = %invoice.invoice_number,
            enrollment_id = %enrollment.enrollment_id,
            total = %invoice.total_amount,
            "Generated invoice"
        );
    }
    Ok((invoice, inserted > 0))
}

pub fn validate_enrollment(enrollment: &EnrollmentCreated) -> Result<(), PaymentError> {
    if enrollment.registration_id.trim().is_empty() {
        return Err(PaymentError::Validation(
            "registration id must not be empty".to_string(),
        ));
    }
    // Only INR is supported until a currency matrix exists.
    if enrollment.currency != "INR" {
        return Err(PaymentError::Validation(format!(
            "unsupported currency {}",
            enrollment.currency
        )));
    }

    let components = [
        ("baseAmount", enrollment.base_amount),
        ("discountAmount", enrollment.discount_amount),
        ("taxAmount", enrollment.tax_amount),
        ("convenienceFee", enrollment.convenience_fee),
        ("platformFee", enrollment.platform_fee),
        ("totalAmount", enrollment.total_amount),
    ];
    for (field, amount) in components {
        if amount < Decimal::ZERO {
            return Err(PaymentError::Validation(format!(
                "{field} must not be negative"
            )));
        }
    }

    let expected = money::round2(
        enrollment.base_amount - enrollment.discount_amount
            + enrollment.tax_amount
            + enrollment.convenience_fee
            + enrollment.platform_fee,
    );
    if money::round2(enrollment.total_amount) != expected {
        return Err(PaymentError::Validation(format!(
            "totalAmount {} does not match components (expected {expected})",
            enrollment.total_amount
        )));
    }

    Ok(())
}

/// Refunds are out of scope for v1.
pub fn refund(_invoice: &Invoice) -> Result<(), PaymentError> {
    Err(PaymentError::NotImplemented(
        "invoice refunds are not supported".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use commons::EnrollmentType;
    use rust_decimal_macros::dec;

    fn enrollment() -> EnrollmentCreated {
        EnrollmentCreated {
            enrollment_id: "e1".to_string(),
            registration_id: "R-1001".to_string(),
            user_id: "u1".to_string(),
            plan_id: "p1".to_string(),
            plan_title: "Mumbai Heritage Hunt".to_string(),
            enrollment_type: EnrollmentType::Individual,
            team_name: None,
            team_size: None,
            base_amount: dec!(500),
            discount_amount: dec!(100),
            tax_amount: dec!(0),
            convenience_fee: dec!(0),
            platform_fee: dec!(0),
            total_amount: dec!(400),
            currency: "INR".to_string(),
            promo_code: None,
            promotion_name: None,
            billing_name: "P. Sharma".to_string(),
            billing_email: "p@x.io".to_string(),
            billing_phone: "+919876543210".to_string(),
            billing_address: None,
            vendor_id: Some("v1".to_string()),
        }
    }

    #[test]
    fn accepts_consistent_totals() {
        assert!(validate_enrollment(&enrollment()).is_ok());
    }

    #[test]
    fn rejects_total_that_does_not_match_components() {
        let mut event = enrollment();
        event.total_amount = dec!(401);

        let err = validate_enrollment(&event).unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
    }

    #[test]
    fn rejects_negative_components() {
        let mut event = enrollment();
        event.discount_amount = dec!(-10);

        assert!(validate_enrollment(&event).is_err());
    }

    #[test]
    fn rejects_non_inr_at_the_boundary() {
        let mut event = enrollment();
        event.currency = "USD".to_string();

        let err = validate_enrollment(&event).unwrap_err();
        assert!(matches!(err, PaymentError::Validation(msg) if msg.contains("USD")));
    }

    #[test]
    fn fee_components_add_up_with_rounding() {
        let mut event = enrollment();
        event.base_amount = dec!(499.99);
        event.discount_amount = dec!(0);
        event.tax_amount = dec!(25.005);
        event.convenience_fee = dec!(10);
        event.platform_fee = dec!(5);
        event.total_amount = dec!(540.00);

        assert!(validate_enrollment(&event).is_ok());
    }
}
