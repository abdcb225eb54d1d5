use crate::db;
use crate::db::payment_transactions;
use crate::db::payouts;
use crate::db::PgPool;
use crate::payment::PaymentOrchestrator;
use crate::payout::PayoutEngine;
use crate::PaymentError;
use commons::RequestContext;
use razorpay_client::RazorpayClient;
use resilience::Policy;
use std::sync::Arc;
use time::Duration;
use time::OffsetDateTime;

/// Rows refreshed per pass.
const RECONCILE_BATCH_SIZE: i64 = 50;
/// Leave fresh rows alone; webhooks usually arrive within seconds.
const GRACE_PERIOD: Duration = Duration::minutes(10);

/// Periodic safety net for webhooks that never arrived: re-reads the
/// gateway's view of stale non-terminal payments and payouts and applies
/// the same transitions the webhook path would.
pub struct Reconciler {
    pool: PgPool,
    orchestrator: Arc<PaymentOrchestrator>,
    payouts: Arc<PayoutEngine>,
    gateway: Arc<RazorpayClient>,
    payouts_policy: Arc<Policy>,
}

#[derive(Debug, Default)]
pub struct ReconcileSummary {
    pub payments_checked: usize,
    pub payouts_checked: usize,
}

impl Reconciler {
    pub fn new(
        pool: PgPool,
        orchestrator: Arc<PaymentOrchestrator>,
        payouts: Arc<PayoutEngine>,
        gateway: Arc<RazorpayClient>,
        payouts_policy: Arc<Policy>,
    ) -> Self {
        Self {
            pool,
            orchestrator,
            payouts,
            gateway,
            payouts_policy,
        }
    }

    pub async fn run_once(&self) -> Result<ReconcileSummary, PaymentError> {
        let mut summary = ReconcileSummary::default();
        let cutoff = OffsetDateTime::now_utc() - GRACE_PERIOD;

        let (stale_payments, stale_payouts) = {
            let mut conn = db::acquire(&self.pool).await?;
            (
                payment_transactions::list_stale_open(&mut conn, cutoff, RECONCILE_BATCH_SIZE)?,
                payouts::list_stale_pending(&mut conn, cutoff, RECONCILE_BATCH_SIZE)?,
            )
        };

        for transaction in stale_payments {
            let ctx = RequestContext::new();
            summary.payments_checked += 1;
            if let Err(e) = self
                .orchestrator
                .refresh_payment(&transaction.gateway_order_id, &ctx)
                .await
            {
                tracing::warn!(
                    payment_transaction_id = transaction.id,
                    gateway_order_id = %transaction.gateway_order_id,
                    "Payment refresh failed: {e:#?}"
                );
            }
        }

        for payout in stale_payouts {
            let Some(gateway_payout_id) = payout.gateway_payout_id.clone() else {
                continue;
            };
            summary.payouts_checked += 1;
            if let Err(e) = self.refresh_payout(&gateway_payout_id).await {
                tracing::warn!(
                    payout_id = payout.id,
                    gateway_payout_id = %gateway_payout_id,
                    "Payout refresh failed: {e:#?}"
                );
            }
        }

        if summary.payments_checked > 0 || summary.payouts_checked > 0 {
            tracing::info!(
                payments = summary.payments_checked,
                payouts = summary.payouts_checked,
                "Reconciler pass complete"
            );
        }
        Ok(summary)
    }

    async fn refresh_payout(&self, gateway_payout_id: &str) -> Result<(), PaymentError> {
        let fetched = self
            .payouts_policy
            .call(|| self.gateway.fetch_payout(gateway_payout_id))
            .await?;

        let ctx = RequestContext::new();
        let observed_at = Some(OffsetDateTime::now_utc());
        match fetched.status.as_str() {
            "processed" => {
                self.payouts
                    .handle_payout_processed(gateway_payout_id, observed_at, &ctx)
                    .await?;
            }
            "failed" | "rejected" | "cancelled" | "reversed" => {
                self.payouts
                    .handle_payout_failed(
                        gateway_payout_id,
                        fetched.failure_reason.as_deref(),
                        observed_at,
                        &ctx,
                    )
                    .await?;
            }
            // queued / pending / processing: still in flight.
            other => {
                tracing::debug!(gateway_payout_id, status = other, "Payout still in flight");
            }
        }
        Ok(())
    }
}
