pub mod sql_types {
    #[derive(diesel::sql_types::SqlType)]
    #[diesel(postgres_type(name = "address_type"))]
    pub struct AddressTypeType;
}

diesel::table! {
    users (id) {
        id -> Int8,
        reference_id -> Uuid,
        first_name_enc -> Nullable<Text>,
        last_name_enc -> Nullable<Text>,
        email_enc -> Text,
        email_hmac -> Nullable<Text>,
        phone_enc -> Text,
        phone_hmac -> Nullable<Text>,
        dob_enc -> Nullable<Text>,
        gender -> Nullable<Text>,
        active -> Bool,
        archived_at -> Nullable<Timestamptz>,
        anonymized -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;
    use super::sql_types::AddressTypeType;

    addresses (id) {
        id -> Int8,
        user_id -> Int8,
        address_type -> AddressTypeType,
        line1_enc -> Text,
        line2_enc -> Nullable<Text>,
        city_enc -> Text,
        postal_code_enc -> Text,
        country_enc -> Text,
        is_primary -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    consents (id) {
        id -> Int8,
        user_id -> Int8,
        consent_key -> Text,
        granted -> Bool,
        consent_version -> Text,
        granted_at -> Nullable<Timestamptz>,
        withdrawn_at -> Nullable<Timestamptz>,
        source -> Text,
        legal_basis -> Text,
        ip_address -> Nullable<Text>,
        user_agent -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    user_audit (id) {
        id -> Int8,
        user_id -> Nullable<Int8>,
        event_type -> Text,
        detail -> Jsonb,
        actor -> Nullable<Text>,
        correlation_id -> Nullable<Text>,
        session_id -> Nullable<Text>,
        ip_address -> Nullable<Text>,
        user_agent -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    user_roles (id) {
        id -> Int8,
        user_id -> Int8,
        role -> Text,
        active -> Bool,
        assigned_at -> Timestamptz,
        deactivated_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(addresses -> users (user_id));
diesel::joinable!(consents -> users (user_id));
diesel::joinable!(user_audit -> users (user_id));
diesel::joinable!(user_roles -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(users, addresses, consents, user_audit, user_roles);
