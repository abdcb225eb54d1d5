pub mod sql_types {
    #[derive(diesel::sql_types::SqlType)]
    #[diesel(postgres_type(name = "invoice_payment_status"))]
    pub struct InvoicePaymentStatusType;

    #[derive(diesel::sql_types::SqlType)]
    #[diesel(postgres_type(name = "payment_tx_status"))]
    pub struct PaymentTxStatusType;

    #[derive(diesel::sql_types::SqlType)]
    #[diesel(postgres_type(name = "payout_tx_status"))]
    pub struct PayoutTxStatusType;
}

diesel::table! {
    use diesel::sql_types::*;
    use super::sql_types::InvoicePaymentStatusType;

    invoices (id) {
        id -> Int8,
        invoice_number -> Text,
        enrollment_id -> Text,
        registration_id -> Text,
        user_id -> Text,
        plan_id -> Text,
        plan_title -> Text,
        enrollment_type -> Text,
        team_name -> Nullable<Text>,
        base_amount -> Numeric,
        discount_amount -> Numeric,
        tax_amount -> Numeric,
        convenience_fee -> Numeric,
        platform_fee -> Numeric,
        total_amount -> Numeric,
        currency -> Text,
        billing_name -> Text,
        billing_email -> Text,
        billing_phone -> Text,
        billing_address -> Nullable<Text>,
        payment_status -> InvoicePaymentStatusType,
        payment_method -> Nullable<Text>,
        gateway_order_id -> Nullable<Text>,
        gateway_payment_id -> Nullable<Text>,
        payment_transaction_id -> Nullable<Int8>,
        vendor_id -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;
    use super::sql_types::PaymentTxStatusType;

    payment_transactions (id) {
        id -> Int8,
        invoice_id -> Int8,
        amount -> Numeric,
        currency -> Text,
        status -> PaymentTxStatusType,
        gateway_order_id -> Text,
        gateway_payment_id -> Nullable<Text>,
        vendor_id -> Nullable<Text>,
        payment_method -> Nullable<Text>,
        error_code -> Nullable<Text>,
        error_message -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;
    use super::sql_types::PayoutTxStatusType;

    payout_transactions (id) {
        id -> Int8,
        payment_transaction_id -> Int8,
        vendor_id -> Text,
        gross_amount -> Numeric,
        commission_amount -> Numeric,
        net_amount -> Numeric,
        currency -> Text,
        status -> PayoutTxStatusType,
        gateway_payout_id -> Nullable<Text>,
        error_code -> Nullable<Text>,
        error_message -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    vendor_profiles (id) {
        id -> Int8,
        vendor_id -> Text,
        name -> Text,
        email -> Nullable<Text>,
        phone -> Nullable<Text>,
        bank_account_number -> Nullable<Text>,
        bank_ifsc -> Nullable<Text>,
        account_holder_name -> Nullable<Text>,
        commission_rate -> Numeric,
        active -> Bool,
        verified -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    invoices,
    payment_transactions,
    payout_transactions,
    vendor_profiles,
);
