use crate::db;
use crate::db::invoices;
use crate::db::invoices::Invoice;
use crate::db::invoices::InvoiceStatus;
use crate::db::vendors;
use crate::db::PgPool;
use crate::invoice;
use crate::payment::PaymentOrchestrator;
use crate::payout::PayoutEngine;
use crate::AppError;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use commons::EnrollmentCreated;
use commons::RequestContext;
use prometheus::Encoder;
use prometheus::TextEncoder;
use razorpay_client::webhook;
use razorpay_client::webhook::WebhookEvent;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;

pub struct AppState {
    pub pool: PgPool,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub payouts: Arc<PayoutEngine>,
    pub webhook_secret: String,
}

pub fn router(
    pool: PgPool,
    orchestrator: Arc<PaymentOrchestrator>,
    payouts: Arc<PayoutEngine>,
    webhook_secret: String,
) -> Router {
    let app_state = Arc::new(AppState {
        pool,
        orchestrator,
        payouts,
        webhook_secret,
    });

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/metrics", get(get_metrics))
        .route("/events/enrollment", post(post_enrollment))
        .route("/webhooks/gateway", post(post_gateway_webhook))
        .route("/api/invoices/:registration_id", get(get_invoice))
        .route(
            "/api/invoices/:registration_id/refund",
            post(post_refund),
        )
        .route("/api/admin/vendors", post(post_vendor))
        .with_state(app_state)
}

#[derive(Serialize)]
struct HelloWorld {
    service: String,
}

pub async fn index() -> impl IntoResponse {
    Json(HelloWorld {
        service: "payments".to_string(),
    })
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn get_metrics() -> Result<String, AppError> {
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    TextEncoder::new()
        .encode(&metric_families, &mut buffer)
        .map_err(|e| AppError::InternalServerError(format!("could not encode metrics: {e}")))?;
    String::from_utf8(buffer)
        .map_err(|e| AppError::InternalServerError(format!("could not encode metrics: {e}")))
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    let ctx = match headers
        .get("x-correlation-id")
        .and_then(|value| value.to_str().ok())
    {
        Some(correlation_id) if !correlation_id.is_empty() => {
            RequestContext::with_correlation_id(correlation_id)
        }
        _ => RequestContext::new(),
    };
    match headers.get("x-event-id").and_then(|value| value.to_str().ok()) {
        Some(event_id) if !event_id.is_empty() => ctx.caused_by(event_id),
        _ => ctx,
    }
}

#[derive(Serialize)]
pub struct EnrollmentResponse {
    pub invoice_id: i64,
    pub registration_id: String,
    pub gateway_order_id: Option<String>,
    pub created_order: bool,
}

/// Bus push delivery of `treasure.enrollment.created`. Replays are no-ops
/// by the invoice-number idempotency key.
pub async fn post_enrollment(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(enrollment): Json<EnrollmentCreated>,
) -> Result<Json<EnrollmentResponse>, AppError> {
    let ctx = request_context(&headers);
    let outcome = app_state
        .orchestrator
        .process_enrollment(&enrollment, &ctx)
        .await?;
    Ok(Json(EnrollmentResponse {
        invoice_id: outcome.invoice_id,
        registration_id: outcome.registration_id,
        gateway_order_id: outcome.gateway_order_id,
        created_order: outcome.created_order,
    }))
}

/// Gateway webhook intake. The signature is verified over the raw body
/// before any parsing; a 2xx is returned as soon as the local transition is
/// durable. Unknown entities are acknowledged so the gateway stops
/// retrying.
pub async fn post_gateway_webhook(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get("x-razorpay-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing webhook signature".to_string()))?;
    if !webhook::verify_signature(&app_state.webhook_secret, &body, signature) {
        return Err(AppError::Unauthorized(
            "webhook signature mismatch".to_string(),
        ));
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("malformed webhook body: {e}")))?;
    let ctx = request_context(&headers);

    match event.event.as_str() {
        webhook::PAYMENT_CAPTURED => {
            let payment = event
                .payload
                .payment
                .ok_or_else(|| AppError::BadRequest("missing payment entity".to_string()))?
                .entity;
            let order_id = payment
                .order_id
                .ok_or_else(|| AppError::BadRequest("payment entity without order id".to_string()))?;
            app_state
                .orchestrator
                .handle_payment_success(&order_id, &payment.id, payment.method.as_deref(), &ctx)
                .await?;
        }
        webhook::PAYMENT_AUTHORIZED => {
            let payment = event
                .payload
                .payment
                .ok_or_else(|| AppError::BadRequest("missing payment entity".to_string()))?
                .entity;
            let order_id = payment
                .order_id
                .ok_or_else(|| AppError::BadRequest("payment entity without order id".to_string()))?;
            app_state
                .orchestrator
                .handle_payment_authorized(&order_id, &payment.id, &ctx)
                .await?;
        }
        webhook::PAYMENT_FAILED => {
            let payment = event
                .payload
                .payment
                .ok_or_else(|| AppError::BadRequest("missing payment entity".to_string()))?
                .entity;
            let order_id = payment
                .order_id
                .ok_or_else(|| AppError::BadRequest("payment entity without order id".to_string()))?;
            app_state
                .orchestrator
                .handle_payment_failure(
                    &order_id,
                    payment.error_code.as_deref(),
                    payment.error_description.as_deref(),
                    &ctx,
                )
                .await?;
        }
        webhook::PAYOUT_PROCESSED => {
            let payout = event
                .payload
                .payout
                .ok_or_else(|| AppError::BadRequest("missing payout entity".to_string()))?
                .entity;
            let observed_at = payout
                .processed_at
                .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());
            app_state
                .payouts
                .handle_payout_processed(&payout.id, observed_at, &ctx)
                .await?;
        }
        webhook::PAYOUT_FAILED | webhook::PAYOUT_REVERSED => {
            let payout = event
                .payload
                .payout
                .ok_or_else(|| AppError::BadRequest("missing payout entity".to_string()))?
                .entity;
            let observed_at = event
                .created_at
                .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());
            app_state
                .payouts
                .handle_payout_failed(
                    &payout.id,
                    payout.failure_reason.as_deref(),
                    observed_at,
                    &ctx,
                )
                .await?;
        }
        other => {
            tracing::debug!(event = other, "Ignoring unhandled webhook event");
        }
    }

    Ok(StatusCode::OK)
}

#[derive(Serialize)]
pub struct InvoiceView {
    pub invoice_number: String,
    pub registration_id: String,
    pub enrollment_id: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_status: String,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
}

impl From<Invoice> for InvoiceView {
    fn from(invoice: Invoice) -> Self {
        let payment_status = match invoice.payment_status {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Failed => "FAILED",
        };
        Self {
            invoice_number: invoice.invoice_number,
            registration_id: invoice.registration_id,
            enrollment_id: invoice.enrollment_id,
            total_amount: invoice.total_amount,
            currency: invoice.currency,
            payment_status: payment_status.to_string(),
            gateway_order_id: invoice.gateway_order_id,
            gateway_payment_id: invoice.gateway_payment_id,
        }
    }
}

pub async fn get_invoice(
    Path(registration_id): Path<String>,
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<InvoiceView>, AppError> {
    let mut conn = db::acquire(&app_state.pool).await?;
    let invoice = invoices::by_registration_id(&mut conn, &registration_id)
        .map_err(|e| AppError::InternalServerError(format!("{e}")))?
        .ok_or_else(|| AppError::NotFound(format!("invoice {registration_id} not found")))?;
    Ok(Json(invoice.into()))
}

pub async fn post_refund(
    Path(registration_id): Path<String>,
    State(app_state): State<Arc<AppState>>,
) -> Result<StatusCode, AppError> {
    let mut conn = db::acquire(&app_state.pool).await?;
    let invoice = invoices::by_registration_id(&mut conn, &registration_id)
        .map_err(|e| AppError::InternalServerError(format!("{e}")))?
        .ok_or_else(|| AppError::NotFound(format!("invoice {registration_id} not found")))?;
    invoice::refund(&invoice)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
pub struct NewVendorRequest {
    pub vendor_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub bank_account_number: Option<String>,
    pub bank_ifsc: Option<String>,
    pub account_holder_name: Option<String>,
    pub commission_rate: Decimal,
}

pub async fn post_vendor(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<NewVendorRequest>,
) -> Result<StatusCode, AppError> {
    let mut conn = db::acquire(&app_state.pool).await?;
    vendors::insert(
        &mut conn,
        &request.vendor_id,
        &request.name,
        request.email.as_deref(),
        request.phone.as_deref(),
        request.bank_account_number.as_deref(),
        request.bank_ifsc.as_deref(),
        request.account_holder_name.as_deref(),
        request.commission_rate,
    )
    .map_err(|e| match e {
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        ) => AppError::Conflict(format!("vendor {} already exists", request.vendor_id)),
        other => AppError::InternalServerError(format!("{other}")),
    })?;
    Ok(StatusCode::CREATED)
}
