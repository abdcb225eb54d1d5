use commons::event;
use commons::EnrollmentCreated;
use commons::EnrollmentType;
use commons::RequestContext;
use diesel::r2d2::ConnectionManager;
use diesel::r2d2::Pool;
use diesel::ExpressionMethods;
use diesel::PgConnection;
use diesel::QueryDsl;
use diesel::RunQueryDsl;
use diesel_migrations::embed_migrations;
use diesel_migrations::EmbeddedMigrations;
use diesel_migrations::MigrationHarness;
use outbox::schema::outbox_events;
use payments::db::invoices;
use payments::db::invoices::InvoiceStatus;
use payments::db::payouts;
use payments::db::payouts::PayoutStatus;
use payments::db::vendors;
use payments::payment::PaymentOrchestrator;
use payments::payment::WebhookOutcome;
use payments::payout::PayoutEngine;
use razorpay_client::RazorpayClient;
use resilience::Policy;
use resilience::PolicyConfig;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

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

fn outbox_count(conn: &mut PgConnection, event_type: &str) -> i64 {
    outbox_events::table
        .filter(outbox_events::event_type.eq(event_type))
        .count()
        .get_result(conn)
        .unwrap()
}

#[tokio::test]
#[ignore = "needs postgres; set DATABASE_URL and run with --ignored"]
async fn enrollment_capture_payout_happy_path() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
    let pool = Pool::builder()
        .build(ConnectionManager::<PgConnection>::new(url))
        .unwrap();
    let mut conn = pool.get().unwrap();
    conn.run_pending_migrations(MIGRATIONS).unwrap();
    diesel::sql_query(
        "TRUNCATE TABLE outbox_events, payout_transactions, payment_transactions, invoices, \
         vendor_profiles RESTART IDENTITY CASCADE",
    )
    .execute(&mut conn)
    .unwrap();

    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/orders")
        .with_status(200)
        .with_body(
            r#"{"id":"order_1","amount":40000,"currency":"INR","receipt":"R-1001","status":"created"}"#,
        )
        .create_async()
        .await;
    let _mock = server
        .mock("POST", "/v1/payouts")
        .with_status(200)
        .with_body(r#"{"id":"pout_X","amount":36000,"currency":"INR","status":"queued"}"#)
        .create_async()
        .await;

    let gateway = Arc::new(
        RazorpayClient::new(server.url(), "rzp_test_key", "secret", Duration::from_secs(2))
            .unwrap(),
    );
    let config = PolicyConfig {
        backoff_initial_ms: 1,
        ..PolicyConfig::default()
    };
    let payout_engine = Arc::new(PayoutEngine::new(
        pool.clone(),
        gateway.clone(),
        Arc::new(Policy::new("gateway-payouts", &config)),
        "2323230041626905".to_string(),
        dec!(10),
    ));
    let orchestrator = PaymentOrchestrator::new(
        pool.clone(),
        gateway,
        Arc::new(Policy::new("gateway-orders", &config)),
        Arc::new(Policy::new("gateway-payments", &config)),
        payout_engine.clone(),
    );

    vendors::insert(
        &mut conn,
        "v1",
        "Vendor One",
        Some("vendor@x.io"),
        Some("919876543210"),
        Some("50100000001"),
        Some("HDFC0000001"),
        None,
        dec!(10),
    )
    .unwrap();

    let ctx = RequestContext::new();
    let outcome = orchestrator
        .process_enrollment(&enrollment(), &ctx)
        .await
        .unwrap();
    assert!(outcome.created_order);
    assert_eq!(outcome.gateway_order_id.as_deref(), Some("order_1"));

    // Replayed enrollment: same invoice, no second order, no second event.
    let replay = orchestrator
        .process_enrollment(&enrollment(), &ctx)
        .await
        .unwrap();
    assert!(!replay.created_order);
    assert_eq!(replay.invoice_id, outcome.invoice_id);
    assert_eq!(outbox_count(&mut conn, event::PAYMENT_ORDER_CREATED), 1);

    let applied = orchestrator
        .handle_payment_success("order_1", "pay_1", Some("upi"), &ctx)
        .await
        .unwrap();
    assert_eq!(applied, WebhookOutcome::Applied);

    // The success webhook is idempotent on (order, payment).
    let replayed = orchestrator
        .handle_payment_success("order_1", "pay_1", Some("upi"), &ctx)
        .await
        .unwrap();
    assert_eq!(replayed, WebhookOutcome::Replayed);
    assert_eq!(outbox_count(&mut conn, event::PAYMENT_SUCCEEDED), 1);

    let invoice = invoices::by_registration_id(&mut conn, "R-1001")
        .unwrap()
        .unwrap();
    assert_eq!(invoice.payment_status, InvoiceStatus::Paid);
    assert_eq!(invoice.gateway_payment_id.as_deref(), Some("pay_1"));
    let payment_transaction_id = invoice.payment_transaction_id.unwrap();

    // The payout was initiated atomically with the capture and is now
    // submitted by the worker path.
    let payout = payouts::by_payment_transaction_id(&mut conn, payment_transaction_id)
        .unwrap()
        .unwrap();
    assert_eq!(payout.status, PayoutStatus::Init);
    assert_eq!(payout.gross_amount, dec!(400));
    assert_eq!(payout.commission_amount, dec!(40.00));
    assert_eq!(payout.net_amount, dec!(360.00));
    assert_eq!(outbox_count(&mut conn, event::PAYOUT_INITIATED), 1);

    let submitted = payout_engine.submit_due().await.unwrap();
    assert_eq!(submitted, 1);
    let payout = payouts::by_gateway_payout_id(&mut conn, "pout_X")
        .unwrap()
        .unwrap();
    assert_eq!(payout.status, PayoutStatus::Pending);

    // Payout webhook completes the chain.
    let done = payout_engine
        .handle_payout_processed("pout_X", None, &ctx)
        .await
        .unwrap();
    assert_eq!(done, WebhookOutcome::Applied);
    let payout = payouts::by_gateway_payout_id(&mut conn, "pout_X")
        .unwrap()
        .unwrap();
    assert_eq!(payout.status, PayoutStatus::Success);
    assert_eq!(outbox_count(&mut conn, event::PAYOUT_SUCCEEDED), 1);
}

#[tokio::test]
#[ignore = "needs postgres; set DATABASE_URL and run with --ignored"]
async fn failure_webhook_creates_no_payout() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
    let pool = Pool::builder()
        .build(ConnectionManager::<PgConnection>::new(url))
        .unwrap();
    let mut conn = pool.get().unwrap();
    conn.run_pending_migrations(MIGRATIONS).unwrap();
    diesel::sql_query(
        "TRUNCATE TABLE outbox_events, payout_transactions, payment_transactions, invoices, \
         vendor_profiles RESTART IDENTITY CASCADE",
    )
    .execute(&mut conn)
    .unwrap();

    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/orders")
        .with_status(200)
        .with_body(
            r#"{"id":"order_1","amount":40000,"currency":"INR","receipt":"R-1001","status":"created"}"#,
        )
        .create_async()
        .await;

    let gateway = Arc::new(
        RazorpayClient::new(server.url(), "rzp_test_key", "secret", Duration::from_secs(2))
            .unwrap(),
    );
    let config = PolicyConfig::default();
    let payout_engine = Arc::new(PayoutEngine::new(
        pool.clone(),
        gateway.clone(),
        Arc::new(Policy::new("gateway-payouts", &config)),
        "2323230041626905".to_string(),
        dec!(10),
    ));
    let orchestrator = PaymentOrchestrator::new(
        pool.clone(),
        gateway,
        Arc::new(Policy::new("gateway-orders", &config)),
        Arc::new(Policy::new("gateway-payments", &config)),
        payout_engine,
    );

    vendors::insert(
        &mut conn,
        "v1",
        "Vendor One",
        None,
        None,
        Some("50100000001"),
        Some("HDFC0000001"),
        None,
        dec!(10),
    )
    .unwrap();

    let ctx = RequestContext::new();
    orchestrator
        .process_enrollment(&enrollment(), &ctx)
        .await
        .unwrap();

    let applied = orchestrator
        .handle_payment_failure(
            "order_1",
            Some("BAD_REQUEST_ERROR"),
            Some("card declined"),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(applied, WebhookOutcome::Applied);

    let invoice = invoices::by_registration_id(&mut conn, "R-1001")
        .unwrap()
        .unwrap();
    assert_eq!(invoice.payment_status, InvoiceStatus::Failed);
    assert_eq!(outbox_count(&mut conn, event::PAYMENT_FAILED), 1);
    assert_eq!(outbox_count(&mut conn, event::PAYOUT_INITIATED), 0);

    // A late success for a failed invoice is logged and acknowledged, not
    // applied.
    let late = orchestrator
        .handle_payment_success("order_1", "pay_1", Some("upi"), &ctx)
        .await
        .unwrap();
    assert_eq!(late, WebhookOutcome::Ignored);
}
