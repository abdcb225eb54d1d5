use crate::db;
use crate::db::invoices;
use crate::db::invoices::Invoice;
use crate::db::invoices::InvoiceStatus;
use crate::db::payment_transactions;
use crate::db::PgPool;
use crate::invoice;
use crate::payout::PayoutEngine;
use crate::PaymentError;
use commons::event;
use commons::money;
use commons::EnrollmentCreated;
use commons::RequestContext;
use diesel::Connection;
use diesel::PgConnection;
use outbox::store;
use outbox::NewOutboxEvent;
use razorpay_client::CapturePaymentRequest;
use razorpay_client::CreateOrderRequest;
use razorpay_client::Payment;
use razorpay_client::RazorpayClient;
use resilience::Policy;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Drives the payment state machine: gateway order creation on enrollment,
/// webhook-confirmed capture, failure handling, and the hand-off into the
/// payout engine.
pub struct PaymentOrchestrator {
    pool: PgPool,
    gateway: Arc<RazorpayClient>,
    orders_policy: Arc<Policy>,
    payments_policy: Arc<Policy>,
    payouts: Arc<PayoutEngine>,
}

#[derive(Debug)]
pub struct EnrollmentOutcome {
    pub invoice_id: i64,
    pub registration_id: String,
    pub gateway_order_id: Option<String>,
    pub created_order: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The transition was applied and its outbox event staged.
    Applied,
    /// Exact replay of an already-applied event; nothing changed.
    Replayed,
    /// The event did not apply to the current state; logged and
    /// acknowledged so the sender stops retrying.
    Ignored,
}

impl PaymentOrchestrator {
    pub fn new(
        pool: PgPool,
        gateway: Arc<RazorpayClient>,
        orders_policy: Arc<Policy>,
        payments_policy: Arc<Policy>,
        payouts: Arc<PayoutEngine>,
    ) -> Self {
        Self {
            pool,
            gateway,
            orders_policy,
            payments_policy,
            payouts,
        }
    }

    /// Handle a `treasure.enrollment.created` event.
    ///
    /// The invoice commits before the gateway call so a crash in between is
    /// recovered by replay: the existing invoice is found, and the order is
    /// only created once (the gateway additionally de-duplicates on the
    /// receipt, which is the invoice number).
    pub async fn process_enrollment(
        &self,
        enrollment: &EnrollmentCreated,
        ctx: &RequestContext,
    ) -> Result<EnrollmentOutcome, PaymentError> {
        let mut conn = db::acquire(&self.pool).await?;

        let (invoice, created) =
            conn.transaction(|conn| invoice::generate_invoice(conn, enrollment))?;
        if !created {
            tracing::info!(
                registration_id = %invoice.registration_id,
                "Enrollment replayed, invoice already exists"
            );
        }

        if invoice.payment_status == InvoiceStatus::Paid || invoice.gateway_order_id.is_some() {
            return Ok(EnrollmentOutcome {
                invoice_id: invoice.id,
                registration_id: invoice.registration_id,
                gateway_order_id: invoice.gateway_order_id,
                created_order: false,
            });
        }

        let amount = money::to_minor_units(invoice.total_amount)
            .map_err(|e| PaymentError::Validation(e.to_string()))?;
        let request = order_request(&invoice, enrollment, amount);
        let order = self
            .orders_policy
            .call(|| self.gateway.create_order(&request))
            .await?;

        let transaction = conn.transaction(|conn| {
            let transaction = payment_transactions::insert(
                conn,
                invoice.id,
                invoice.total_amount,
                &invoice.currency,
                &order.id,
                invoice.vendor_id.as_deref(),
            )?;
            invoices::link_payment_transaction(conn, invoice.id, transaction.id, &order.id)?;
            store::stage(
                conn,
                &NewOutboxEvent::new(
                    "INVOICE",
                    invoice.registration_id.clone(),
                    event::PAYMENT_ORDER_CREATED,
                    json!({
                        "invoiceNumber": &invoice.invoice_number,
                        "registrationId": &invoice.registration_id,
                        "enrollmentId": &invoice.enrollment_id,
                        "gatewayOrderId": &order.id,
                        "amount": invoice.total_amount,
                        "currency": &invoice.currency,
                    }),
                ),
                ctx,
            )?;
            Ok::<_, PaymentError>(transaction)
        })?;

        tracing::info!(
            registration_id = %invoice.registration_id,
            gateway_order_id = %order.id,
            payment_transaction_id = transaction.id,
            "Created gateway order"
        );

        Ok(EnrollmentOutcome {
            invoice_id: invoice.id,
            registration_id: invoice.registration_id,
            gateway_order_id: Some(order.id),
            created_order: true,
        })
    }

    /// Apply a confirmed capture. Idempotent on (order id, payment id):
    /// replays return [`WebhookOutcome::Replayed`] without staging another
    /// `payment.succeeded`.
    pub async fn handle_payment_success(
        &self,
        order_id: &str,
        payment_id: &str,
        method: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<WebhookOutcome, PaymentError> {
        let mut conn = db::acquire(&self.pool).await?;
        conn.transaction(|conn| self.apply_payment_success(conn, order_id, payment_id, method, ctx))
    }

    fn apply_payment_success(
        &self,
        conn: &mut PgConnection,
        order_id: &str,
        payment_id: &str,
        method: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<WebhookOutcome, PaymentError> {
        let Some(invoice) = invoices::by_gateway_order_id(conn, order_id)? else {
            tracing::warn!(order_id, "Success webhook for unknown order, acknowledging");
            return Ok(WebhookOutcome::Ignored);
        };

        match invoice.payment_status {
            InvoiceStatus::Paid
                if invoice.gateway_payment_id.as_deref() == Some(payment_id) =>
            {
                return Ok(WebhookOutcome::Replayed);
            }
            InvoiceStatus::Paid => {
                tracing::warn!(
                    order_id,
                    payment_id,
                    stored_payment_id = ?invoice.gateway_payment_id,
                    correlation_id = %ctx.correlation_id,
                    "Invoice already paid with a different payment id"
                );
                return Ok(WebhookOutcome::Ignored);
            }
            InvoiceStatus::Failed => {
                tracing::warn!(
                    order_id,
                    payment_id,
                    correlation_id = %ctx.correlation_id,
                    "Success webhook after terminal failure"
                );
                return Ok(WebhookOutcome::Ignored);
            }
            InvoiceStatus::Pending => {}
        }

        let transaction_id = invoice.payment_transaction_id.ok_or_else(|| {
            PaymentError::InconsistentState(format!(
                "invoice {} has no payment transaction",
                invoice.registration_id
            ))
        })?;

        payment_transactions::mark_captured(conn, transaction_id, payment_id, method)?;
        // The guarded UPDATE is the serialization point: a concurrent
        // handler that lost the race sees 0 rows and stages nothing.
        let updated = invoices::mark_paid(conn, invoice.id, method.unwrap_or("unknown"), payment_id)?;
        if updated == 0 {
            return Ok(WebhookOutcome::Replayed);
        }
        store::stage(
            conn,
            &NewOutboxEvent::new(
                "INVOICE",
                invoice.registration_id.clone(),
                event::PAYMENT_SUCCEEDED,
                json!({
                    "invoiceNumber": &invoice.invoice_number,
                    "registrationId": &invoice.registration_id,
                    "gatewayOrderId": order_id,
                    "gatewayPaymentId": payment_id,
                    "amount": invoice.total_amount,
                    "currency": &invoice.currency,
                    "method": method,
                }),
            ),
            ctx,
        )?;

        tracing::info!(
            registration_id = %invoice.registration_id,
            payment_id,
            "Payment captured, invoice paid"
        );

        // Payout initiation shares this transaction so the INIT row, the
        // paid invoice and both outbox events commit together.
        let transaction = payment_transactions::by_id(conn, transaction_id)?.ok_or_else(|| {
            PaymentError::NotFound(format!("payment transaction {transaction_id}"))
        })?;
        if transaction.vendor_id.is_some() {
            self.payouts.initiate(conn, &transaction, ctx)?;
        }

        Ok(WebhookOutcome::Applied)
    }

    /// An authorized (not yet captured) payment: record the authorization,
    /// then capture keyed on the payment id.
    pub async fn handle_payment_authorized(
        &self,
        order_id: &str,
        payment_id: &str,
        ctx: &RequestContext,
    ) -> Result<WebhookOutcome, PaymentError> {
        let mut conn = db::acquire(&self.pool).await?;
        let Some(transaction) = payment_transactions::by_gateway_order_id(&mut conn, order_id)?
        else {
            tracing::warn!(order_id, "Authorized webhook for unknown order, acknowledging");
            return Ok(WebhookOutcome::Ignored);
        };
        if transaction.status.is_terminal() {
            return Ok(WebhookOutcome::Replayed);
        }

        payment_transactions::mark_authorized(&mut conn, transaction.id, payment_id)?;

        let amount = money::to_minor_units(transaction.amount)
            .map_err(|e| PaymentError::Validation(e.to_string()))?;
        let request = CapturePaymentRequest {
            amount,
            currency: transaction.currency.clone(),
        };
        match self
            .payments_policy
            .call(|| self.gateway.capture_payment(payment_id, &request))
            .await
        {
            Ok(captured) => conn.transaction(|conn| {
                self.apply_payment_success(
                    conn,
                    order_id,
                    payment_id,
                    captured.method.as_deref(),
                    ctx,
                )
            }),
            Err(e) => {
                let error = PaymentError::from(e);
                tracing::error!(order_id, payment_id, "Capture failed: {error:#?}");
                conn.transaction(|conn| {
                    self.apply_payment_failure(
                        conn,
                        order_id,
                        Some("CAPTURE_FAILED"),
                        Some(&error.to_string()),
                        ctx,
                    )
                })
            }
        }
    }

    /// Apply a failure webhook. Idempotent; a failure after capture is an
    /// inconsistency that is logged and acknowledged.
    pub async fn handle_payment_failure(
        &self,
        order_id: &str,
        error_code: Option<&str>,
        error_message: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<WebhookOutcome, PaymentError> {
        let mut conn = db::acquire(&self.pool).await?;
        conn.transaction(|conn| {
            self.apply_payment_failure(conn, order_id, error_code, error_message, ctx)
        })
    }

    fn apply_payment_failure(
        &self,
        conn: &mut PgConnection,
        order_id: &str,
        error_code: Option<&str>,
        error_message: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<WebhookOutcome, PaymentError> {
        let Some(transaction) = payment_transactions::by_gateway_order_id(conn, order_id)? else {
            tracing::warn!(order_id, "Failure webhook for unknown order, acknowledging");
            return Ok(WebhookOutcome::Ignored);
        };

        match transaction.status {
            payment_transactions::PaymentTxStatus::Failed => return Ok(WebhookOutcome::Replayed),
            payment_transactions::PaymentTxStatus::Captured => {
                tracing::warn!(
                    order_id,
                    correlation_id = %ctx.correlation_id,
                    "Failure webhook after capture, keeping captured state"
                );
                return Ok(WebhookOutcome::Ignored);
            }
            _ => {}
        }

        let updated =
            payment_transactions::mark_failed(conn, transaction.id, error_code, error_message)?;
        if updated == 0 {
            return Ok(WebhookOutcome::Replayed);
        }
        invoices::mark_failed(conn, transaction.invoice_id)?;

        let invoice = invoices::by_id(conn, transaction.invoice_id)?
            .ok_or_else(|| PaymentError::NotFound(format!("invoice {}", transaction.invoice_id)))?;
        store::stage(
            conn,
            &NewOutboxEvent::new(
                "INVOICE",
                invoice.registration_id.clone(),
                event::PAYMENT_FAILED,
                json!({
                    "invoiceNumber": &invoice.invoice_number,
                    "registrationId": &invoice.registration_id,
                    "gatewayOrderId": order_id,
                    "errorCode": error_code,
                    "errorMessage": error_message,
                }),
            ),
            ctx,
        )?;

        tracing::info!(
            registration_id = %invoice.registration_id,
            order_id,
            error_code = ?error_code,
            "Payment failed"
        );
        Ok(WebhookOutcome::Applied)
    }

    /// Reconciliation path: fetch the order's payments from the gateway and
    /// apply whatever the newest relevant payment says.
    pub async fn refresh_payment(
        &self,
        order_id: &str,
        ctx: &RequestContext,
    ) -> Result<WebhookOutcome, PaymentError> {
        let collection = self
            .payments_policy
            .call(|| self.gateway.list_order_payments(order_id))
            .await?;
        let Some(candidate) = pick_newest(&collection.items) else {
            return Ok(WebhookOutcome::Ignored);
        };

        match candidate.status.as_str() {
            "captured" => {
                self.handle_payment_success(
                    order_id,
                    &candidate.id,
                    candidate.method.as_deref(),
                    ctx,
                )
                .await
            }
            "authorized" => self.handle_payment_authorized(order_id, &candidate.id, ctx).await,
            "failed" => {
                self.handle_payment_failure(
                    order_id,
                    candidate.error_code.as_deref(),
                    candidate.error_description.as_deref(),
                    ctx,
                )
                .await
            }
            _ => Ok(WebhookOutcome::Ignored),
        }
    }
}

/// Tie-break across multiple payments on one order: the newest payment in
/// {authorized, captured} wins; otherwise the newest in any state.
pub fn pick_newest(payments: &[Payment]) -> Option<&Payment> {
    payments
        .iter()
        .filter(|p| matches!(p.status.as_str(), "authorized" | "captured"))
        .max_by_key(|p| p.created_at.unwrap_or(0))
        .or_else(|| payments.iter().max_by_key(|p| p.created_at.unwrap_or(0)))
}

fn order_request(
    invoice: &Invoice,
    enrollment: &EnrollmentCreated,
    amount: i64,
) -> CreateOrderRequest {
    let mut notes = HashMap::from([
        ("enrollmentId".to_string(), enrollment.enrollment_id.clone()),
        (
            "registrationId".to_string(),
            enrollment.registration_id.clone(),
        ),
        ("planId".to_string(), enrollment.plan_id.clone()),
        (
            "enrollmentType".to_string(),
            format!("{:?}", enrollment.enrollment_type).to_uppercase(),
        ),
    ]);
    if let Some(team_name) = &enrollment.team_name {
        notes.insert("teamName".to_string(), team_name.clone());
    }

    CreateOrderRequest {
        amount,
        currency: invoice.currency.clone(),
        receipt: invoice.invoice_number.clone(),
        payment_capture: 1,
        notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(id: &str, status: &str, created_at: i64) -> Payment {
        Payment {
            id: id.to_string(),
            order_id: Some("order_1".to_string()),
            amount: 40_000,
            currency: "INR".to_string(),
            status: status.to_string(),
            method: None,
            error_code: None,
            error_description: None,
            created_at: Some(created_at),
        }
    }

    #[test]
    fn prefers_newest_successful_payment() {
        let payments = vec![
            payment("pay_1", "failed", 300),
            payment("pay_2", "captured", 100),
            payment("pay_3", "authorized", 200),
        ];

        assert_eq!(pick_newest(&payments).unwrap().id, "pay_3");
    }

    #[test]
    fn falls_back_to_newest_of_any_state() {
        let payments = vec![
            payment("pay_1", "failed", 100),
            payment("pay_2", "created", 250),
            payment("pay_3", "failed", 200),
        ];

        assert_eq!(pick_newest(&payments).unwrap().id, "pay_2");
    }

    #[test]
    fn empty_payment_list_has_no_winner() {
        assert!(pick_newest(&[]).is_none());
    }
}
