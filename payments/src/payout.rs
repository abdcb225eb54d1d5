use crate::db;
use crate::db::payment_transactions::PaymentTransaction;
use crate::db::payouts;
use crate::db::payouts::PayoutStatus;
use crate::db::payouts::PayoutTransaction;
use crate::db::vendors;
use crate::db::vendors::VendorProfile;
use crate::db::PgPool;
use crate::PaymentError;
use commons::event;
use commons::money;
use commons::RequestContext;
use diesel::Connection;
use diesel::PgConnection;
use outbox::store;
use outbox::NewOutboxEvent;
use razorpay_client::BankAccount;
use razorpay_client::Contact;
use razorpay_client::CreatePayoutRequest;
use razorpay_client::FundAccount;
use razorpay_client::RazorpayClient;
use razorpay_client::PAYOUT_MODE_IMPS;
use razorpay_client::PAYOUT_PURPOSE_VENDOR;
use resilience::Policy;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Rows picked up per submitter pass.
const SUBMIT_BATCH_SIZE: i64 = 20;

/// Splits captured payments into commission and vendor net, submits payouts
/// to the gateway and reconciles their state from webhooks.
pub struct PayoutEngine {
    pool: PgPool,
    gateway: Arc<RazorpayClient>,
    policy: Arc<Policy>,
    /// Debit account at the gateway the payouts are funded from.
    account_number: String,
    default_commission_percent: Decimal,
}

impl PayoutEngine {
    pub fn new(
        pool: PgPool,
        gateway: Arc<RazorpayClient>,
        policy: Arc<Policy>,
        account_number: String,
        default_commission_percent: Decimal,
    ) -> Self {
        Self {
            pool,
            gateway,
            policy,
            account_number,
            default_commission_percent,
        }
    }

    /// Create the INIT payout row inside the caller's transaction. The
    /// gateway is not called here; the submitter picks the row up in its
    /// own transaction, so a rolled-back caller leaves nothing behind.
    ///
    /// Idempotent per payment transaction: an existing payout is returned
    /// as-is.
    pub fn initiate(
        &self,
        conn: &mut PgConnection,
        transaction: &PaymentTransaction,
        ctx: &RequestContext,
    ) -> Result<Option<i64>, PaymentError> {
        let Some(vendor_id) = transaction.vendor_id.as_deref() else {
            return Ok(None);
        };

        if let Some(existing) = payouts::by_payment_transaction_id(conn, transaction.id)? {
            tracing::info!(
                payout_id = existing.id,
                payment_transaction_id = transaction.id,
                "Payout already initiated"
            );
            return Ok(Some(existing.id));
        }

        let vendor = vendors::by_vendor_id(conn, vendor_id)?
            .ok_or_else(|| PaymentError::NotFound(format!("vendor {vendor_id}")))?;
        if !vendor.payout_ready() {
            return Err(PaymentError::Validation(format!(
                "vendor {vendor_id} is not payout-ready (inactive or missing bank details)"
            )));
        }

        let rate = if vendor.commission_rate > Decimal::ZERO {
            vendor.commission_rate
        } else {
            self.default_commission_percent
        };
        let (commission, net) = compute_split(transaction.amount, rate)?;

        let payout = payouts::insert_init(
            conn,
            transaction.id,
            vendor_id,
            transaction.amount,
            commission,
            net,
            &transaction.currency,
        )?;
        store::stage(
            conn,
            &NewOutboxEvent::new(
                "PAYOUT",
                payout.id.to_string(),
                event::PAYOUT_INITIATED,
                json!({
                    "payoutId": payout.id,
                    "vendorId": vendor_id,
                    "paymentTransactionId": transaction.id,
                    "gross": transaction.amount,
                    "commission": commission,
                    "net": net,
                    "currency": &transaction.currency,
                }),
            ),
            ctx,
        )?;

        tracing::info!(
            payout_id = payout.id,
            vendor_id,
            gross = %transaction.amount,
            commission = %commission,
            net = %net,
            "Initiated vendor payout"
        );
        Ok(Some(payout.id))
    }

    /// Background submitter loop; claims INIT rows and drives them to the
    /// gateway. Never returns.
    pub async fn run_submitter(self: Arc<Self>, poll_interval: Duration) {
        let mut interval = tokio::time::interval(poll_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.submit_due().await {
                tracing::error!("Payout submitter pass failed: {e:#?}");
            }
        }
    }

    /// One submitter pass; returns the number of payouts submitted.
    pub async fn submit_due(&self) -> Result<usize, PaymentError> {
        let mut conn = db::acquire(&self.pool).await?;
        let batch = payouts::claim_submittable(&mut conn, SUBMIT_BATCH_SIZE)?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut submitted = 0;
        for payout in batch {
            // Each payout gets its own context; the causation chain was
            // recorded when the INIT row was staged.
            let ctx = RequestContext::new();
            if self.submit_one(&mut conn, &payout, &ctx).await? {
                submitted += 1;
            }
        }
        Ok(submitted)
    }

    async fn submit_one(
        &self,
        conn: &mut PgConnection,
        payout: &PayoutTransaction,
        ctx: &RequestContext,
    ) -> Result<bool, PaymentError> {
        let vendor = vendors::by_vendor_id(conn, &payout.vendor_id)?
            .ok_or_else(|| PaymentError::NotFound(format!("vendor {}", payout.vendor_id)))?;
        let payment_ref = payout.payment_transaction_id.to_string();
        let request = build_payout_request(&self.account_number, payout, &vendor, &payment_ref)?;

        match self.policy.call(|| self.gateway.create_payout(&request)).await {
            Ok(submitted) => {
                let updated = payouts::mark_pending(conn, payout.id, &submitted.id)?;
                if updated == 0 {
                    tracing::warn!(
                        payout_id = payout.id,
                        gateway_payout_id = %submitted.id,
                        "Payout left INIT while submitting, keeping stored state"
                    );
                    return Ok(false);
                }
                tracing::info!(
                    payout_id = payout.id,
                    gateway_payout_id = %submitted.id,
                    "Payout submitted to gateway"
                );
                Ok(true)
            }
            Err(e) => {
                let error = PaymentError::from(e);
                tracing::error!(payout_id = payout.id, "Payout submission failed: {error:#?}");
                conn.transaction(|conn| {
                    payouts::mark_submit_failed(
                        conn,
                        payout.id,
                        "SUBMIT_FAILED",
                        &error.to_string(),
                    )?;
                    store::stage(
                        conn,
                        &failure_event(payout, None, "SUBMIT_FAILED", &error.to_string()),
                        ctx,
                    )?;
                    Ok::<_, PaymentError>(())
                })?;
                Ok(false)
            }
        }
    }

    /// `payout.processed` webhook: PENDING → SUCCESS, idempotent by gateway
    /// payout id. A conflicting terminal state is only overridden when the
    /// webhook is newer than the stored row.
    pub async fn handle_payout_processed(
        &self,
        gateway_payout_id: &str,
        observed_at: Option<OffsetDateTime>,
        ctx: &RequestContext,
    ) -> Result<crate::payment::WebhookOutcome, PaymentError> {
        use crate::payment::WebhookOutcome;

        let mut conn = db::acquire(&self.pool).await?;
        conn.transaction(|conn| {
            let Some(payout) = payouts::by_gateway_payout_id(conn, gateway_payout_id)? else {
                tracing::warn!(gateway_payout_id, "Payout webhook for unknown payout");
                return Ok(WebhookOutcome::Ignored);
            };

            match payout.status {
                PayoutStatus::Pending => {
                    if payouts::mark_success(conn, gateway_payout_id)? == 0 {
                        return Ok(WebhookOutcome::Replayed);
                    }
                    store::stage(conn, &success_event(&payout, gateway_payout_id), ctx)?;
                    tracing::info!(payout_id = payout.id, gateway_payout_id, "Payout succeeded");
                    Ok(WebhookOutcome::Applied)
                }
                PayoutStatus::Success => Ok(WebhookOutcome::Replayed),
                PayoutStatus::Failed => {
                    if newer_than_stored(observed_at, payout.updated_at) {
                        tracing::warn!(
                            payout_id = payout.id,
                            gateway_payout_id,
                            correlation_id = %ctx.correlation_id,
                            "Success webhook overrides stored FAILED state"
                        );
                        payouts::force_terminal(conn, payout.id, PayoutStatus::Success, None, None)?;
                        store::stage(conn, &success_event(&payout, gateway_payout_id), ctx)?;
                        Ok(WebhookOutcome::Applied)
                    } else {
                        tracing::warn!(
                            payout_id = payout.id,
                            gateway_payout_id,
                            correlation_id = %ctx.correlation_id,
                            "Stale success webhook for FAILED payout, ignoring"
                        );
                        Ok(WebhookOutcome::Ignored)
                    }
                }
                PayoutStatus::Init => {
                    tracing::warn!(
                        payout_id = payout.id,
                        gateway_payout_id,
                        "Success webhook before submission was recorded, ignoring"
                    );
                    Ok(WebhookOutcome::Ignored)
                }
            }
        })
    }

    /// `payout.failed` webhook, mirror of [`Self::handle_payout_processed`].
    pub async fn handle_payout_failed(
        &self,
        gateway_payout_id: &str,
        failure_reason: Option<&str>,
        observed_at: Option<OffsetDateTime>,
        ctx: &RequestContext,
    ) -> Result<crate::payment::WebhookOutcome, PaymentError> {
        use crate::payment::WebhookOutcome;

        let mut conn = db::acquire(&self.pool).await?;
        conn.transaction(|conn| {
            let Some(payout) = payouts::by_gateway_payout_id(conn, gateway_payout_id)? else {
                tracing::warn!(gateway_payout_id, "Payout webhook for unknown payout");
                return Ok(WebhookOutcome::Ignored);
            };

            let reason = failure_reason.unwrap_or("payout failed at gateway");
            match payout.status {
                PayoutStatus::Pending => {
                    let updated = payouts::mark_webhook_failed(
                        conn,
                        gateway_payout_id,
                        Some("PAYOUT_FAILED"),
                        Some(reason),
                    )?;
                    if updated == 0 {
                        return Ok(WebhookOutcome::Replayed);
                    }
                    store::stage(
                        conn,
                        &failure_event(&payout, Some(gateway_payout_id), "PAYOUT_FAILED", reason),
                        ctx,
                    )?;
                    tracing::info!(payout_id = payout.id, gateway_payout_id, "Payout failed");
                    Ok(WebhookOutcome::Applied)
                }
                PayoutStatus::Failed => Ok(WebhookOutcome::Replayed),
                PayoutStatus::Success => {
                    if newer_than_stored(observed_at, payout.updated_at) {
                        tracing::warn!(
                            payout_id = payout.id,
                            gateway_payout_id,
                            correlation_id = %ctx.correlation_id,
                            "Failure webhook overrides stored SUCCESS state"
                        );
                        payouts::force_terminal(
                            conn,
                            payout.id,
                            PayoutStatus::Failed,
                            Some("PAYOUT_FAILED"),
                            Some(reason),
                        )?;
                        store::stage(
                            conn,
                            &failure_event(
                                &payout,
                                Some(gateway_payout_id),
                                "PAYOUT_FAILED",
                                reason,
                            ),
                            ctx,
                        )?;
                        Ok(WebhookOutcome::Applied)
                    } else {
                        tracing::warn!(
                            payout_id = payout.id,
                            gateway_payout_id,
                            correlation_id = %ctx.correlation_id,
                            "Stale failure webhook for SUCCESS payout, ignoring"
                        );
                        Ok(WebhookOutcome::Ignored)
                    }
                }
                PayoutStatus::Init => {
                    tracing::warn!(
                        payout_id = payout.id,
                        gateway_payout_id,
                        "Failure webhook before submission was recorded, ignoring"
                    );
                    Ok(WebhookOutcome::Ignored)
                }
            }
        })
    }
}

/// commission = round₂(gross × rate / 100); net = gross − commission.
/// Rejects splits that leave the vendor nothing.
pub fn compute_split(gross: Decimal, rate_percent: Decimal) -> Result<(Decimal, Decimal), PaymentError> {
    if gross <= Decimal::ZERO {
        return Err(PaymentError::Validation(format!(
            "gross amount {gross} must be positive"
        )));
    }
    if rate_percent < Decimal::ZERO || rate_percent >= Decimal::ONE_HUNDRED {
        return Err(PaymentError::Validation(format!(
            "commission rate {rate_percent} out of range"
        )));
    }

    let commission = money::round2(gross * rate_percent / Decimal::ONE_HUNDRED);
    let net = gross - commission;
    if net <= Decimal::ZERO {
        return Err(PaymentError::Validation(format!(
            "net amount {net} after commission is not positive"
        )));
    }
    Ok((commission, net))
}

fn build_payout_request(
    account_number: &str,
    payout: &PayoutTransaction,
    vendor: &VendorProfile,
    payment_ref: &str,
) -> Result<CreatePayoutRequest, PaymentError> {
    let bank_account_number = vendor.bank_account_number.as_deref().ok_or_else(|| {
        PaymentError::Validation(format!("vendor {} has no bank account", vendor.vendor_id))
    })?;
    let ifsc = vendor.bank_ifsc.as_deref().ok_or_else(|| {
        PaymentError::Validation(format!("vendor {} has no IFSC", vendor.vendor_id))
    })?;
    let holder = vendor
        .account_holder_name
        .as_deref()
        .unwrap_or(&vendor.name);

    Ok(CreatePayoutRequest {
        account_number: account_number.to_string(),
        fund_account: FundAccount {
            account_type: "bank_account".to_string(),
            bank_account: BankAccount {
                name: holder.to_string(),
                ifsc: ifsc.to_string(),
                account_number: bank_account_number.to_string(),
            },
            contact: Contact {
                name: vendor.name.clone(),
                email: vendor.email.clone(),
                contact: vendor.phone.clone(),
                contact_type: "vendor".to_string(),
            },
        },
        amount: money::to_minor_units(payout.net_amount)
            .map_err(|e| PaymentError::Validation(e.to_string()))?,
        currency: payout.currency.clone(),
        mode: PAYOUT_MODE_IMPS.to_string(),
        purpose: PAYOUT_PURPOSE_VENDOR.to_string(),
        queue_if_low_balance: true,
        reference_id: format!("PAYOUT_{}", payout.id),
        narration: format!("Treasure hunt payout {}", payout.id),
        notes: HashMap::from([
            ("vendorId".to_string(), vendor.vendor_id.clone()),
            ("vendorName".to_string(), vendor.name.clone()),
            ("paymentId".to_string(), payment_ref.to_string()),
        ]),
    })
}

fn success_event(payout: &PayoutTransaction, gateway_payout_id: &str) -> NewOutboxEvent {
    NewOutboxEvent::new(
        "PAYOUT",
        payout.id.to_string(),
        event::PAYOUT_SUCCEEDED,
        json!({
            "payoutId": payout.id,
            "vendorId": &payout.vendor_id,
            "gatewayPayoutId": gateway_payout_id,
            "net": payout.net_amount,
            "currency": &payout.currency,
        }),
    )
}

fn failure_event(
    payout: &PayoutTransaction,
    gateway_payout_id: Option<&str>,
    error_code: &str,
    error_message: &str,
) -> NewOutboxEvent {
    NewOutboxEvent::new(
        "PAYOUT",
        payout.id.to_string(),
        event::PAYOUT_FAILED,
        json!({
            "payoutId": payout.id,
            "vendorId": &payout.vendor_id,
            "gatewayPayoutId": gateway_payout_id,
            "errorCode": error_code,
            "errorMessage": error_message,
            "net": payout.net_amount,
            "currency": &payout.currency,
        }),
    )
}

fn newer_than_stored(observed_at: Option<OffsetDateTime>, stored_updated_at: OffsetDateTime) -> bool {
    observed_at.is_some_and(|observed| observed > stored_updated_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    #[test]
    fn splits_gross_into_commission_and_net() {
        let (commission, net) = compute_split(dec!(400), dec!(10)).unwrap();

        assert_eq!(commission, dec!(40.00));
        assert_eq!(net, dec!(360.00));
        assert_eq!(commission + net, dec!(400));
    }

    #[test]
    fn rounds_commission_to_two_decimals() {
        let (commission, net) = compute_split(dec!(333.33), dec!(12.5)).unwrap();

        assert_eq!(commission, dec!(41.67));
        assert_eq!(net, dec!(291.66));
        assert_eq!(commission + net, dec!(333.33));
    }

    #[test]
    fn rejects_non_positive_net() {
        assert!(compute_split(dec!(0), dec!(10)).is_err());
        assert!(compute_split(dec!(100), dec!(100)).is_err());
        assert!(compute_split(dec!(-5), dec!(10)).is_err());
    }

    #[test]
    fn payout_request_carries_fund_account_and_reference() {
        let payout = PayoutTransaction {
            id: 42,
            payment_transaction_id: 7,
            vendor_id: "v1".to_string(),
            gross_amount: dec!(400),
            commission_amount: dec!(40),
            net_amount: dec!(360),
            currency: "INR".to_string(),
            status: PayoutStatus::Init,
            gateway_payout_id: None,
            error_code: None,
            error_message: None,
            created_at: datetime!(2024-05-01 12:00:00 UTC),
            updated_at: datetime!(2024-05-01 12:00:00 UTC),
        };
        let vendor = VendorProfile {
            id: 1,
            vendor_id: "v1".to_string(),
            name: "Vendor One".to_string(),
            email: Some("vendor@x.io".to_string()),
            phone: Some("919876543210".to_string()),
            bank_account_number: Some("50100000001".to_string()),
            bank_ifsc: Some("HDFC0000001".to_string()),
            account_holder_name: None,
            commission_rate: dec!(10),
            active: true,
            verified: true,
            created_at: datetime!(2024-05-01 12:00:00 UTC),
            updated_at: datetime!(2024-05-01 12:00:00 UTC),
        };

        let request = build_payout_request("2323230041626905", &payout, &vendor, "7").unwrap();

        assert_eq!(request.amount, 36_000);
        assert_eq!(request.mode, "IMPS");
        assert_eq!(request.purpose, "vendor_payout");
        assert_eq!(request.reference_id, "PAYOUT_42");
        assert_eq!(request.fund_account.bank_account.ifsc, "HDFC0000001");
        // Holder name falls back to the vendor name when unset.
        assert_eq!(request.fund_account.bank_account.name, "Vendor One");
        assert_eq!(request.fund_account.contact.contact_type, "vendor");
        assert_eq!(request.notes["vendorId"], "v1");
    }

    #[test]
    fn webhook_override_requires_newer_observation() {
        let stored = datetime!(2024-05-01 12:00:00 UTC);

        assert!(newer_than_stored(
            Some(datetime!(2024-05-01 12:00:01 UTC)),
            stored
        ));
        assert!(!newer_than_stored(
            Some(datetime!(2024-05-01 11:59:59 UTC)),
            stored
        ));
        assert!(!newer_than_stored(None, stored));
    }
}
