use crate::access::Actor;
use crate::access::Role;
use crate::address::AddressService;
use crate::address::AddressUpdate;
use crate::address::AddressView;
use crate::address::NewAddress;
use crate::consent::ConsentService;
use crate::consent::ConsentView;
use crate::consent::GrantConsent;
use crate::db::addresses::AddressType;
use crate::user::NewUser;
use crate::user::UserService;
use crate::user::UserUpdate;
use crate::user::UserView;
use crate::AppError;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use axum::Json;
use axum::Router;
use commons::RequestContext;
use prometheus::Encoder;
use prometheus::TextEncoder;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

pub struct AppState {
    pub users: Arc<UserService>,
    pub addresses: Arc<AddressService>,
    pub consents: Arc<ConsentService>,
}

pub fn router(
    users: Arc<UserService>,
    addresses: Arc<AddressService>,
    consents: Arc<ConsentService>,
) -> Router {
    let app_state = Arc::new(AppState {
        users,
        addresses,
        consents,
    });

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/metrics", get(get_metrics))
        .route("/internal/users", get(find_user))
        .route("/internal/users/bulk", post(bulk_users))
        .route("/internal/users/:reference_id", get(get_user))
        .route("/api/users", post(post_user))
        .route(
            "/api/users/:reference_id",
            put(put_user).delete(delete_user),
        )
        .route("/api/users/:reference_id/reactivate", post(post_reactivate))
        .route("/api/users/:reference_id/anonymize", post(post_anonymize))
        .route("/api/users/:reference_id/export", get(get_export))
        .route(
            "/api/users/:reference_id/roles/:role",
            post(post_role).delete(delete_role),
        )
        .route(
            "/api/users/:reference_id/addresses",
            get(get_addresses).post(post_address),
        )
        .route(
            "/api/users/:reference_id/addresses/:address_id",
            put(put_address).delete(delete_address),
        )
        .route(
            "/api/users/:reference_id/addresses/:address_id/primary",
            put(put_primary_address),
        )
        .route(
            "/api/users/:reference_id/consents",
            get(get_consents).post(post_consent),
        )
        .route(
            "/api/users/:reference_id/consents/:consent_key",
            delete(delete_consent),
        )
        .with_state(app_state)
}

#[derive(Serialize)]
struct HelloWorld {
    service: String,
}

pub async fn index() -> impl IntoResponse {
    Json(HelloWorld {
        service: "identity".to_string(),
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

/// The mesh authenticates callers and forwards the role tag and, for end
/// users, their reference id.
fn actor(headers: &HeaderMap) -> Result<Actor, AppError> {
    let role = headers
        .get("x-role")
        .and_then(|value| value.to_str().ok())
        .and_then(Role::parse)
        .ok_or_else(|| AppError::Unauthorized("missing or unknown x-role header".to_string()))?;
    let reference_id = headers
        .get("x-actor-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok());
    Ok(Actor { role, reference_id })
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    match headers
        .get("x-correlation-id")
        .and_then(|value| value.to_str().ok())
    {
        Some(correlation_id) if !correlation_id.is_empty() => {
            RequestContext::with_correlation_id(correlation_id)
        }
        _ => RequestContext::new(),
    }
}

#[derive(Deserialize)]
pub struct NewUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub phone: String,
    pub dob: Option<String>,
    pub gender: Option<String>,
}

pub async fn post_user(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<NewUserRequest>,
) -> Result<(StatusCode, Json<UserView>), AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    let view = app_state
        .users
        .create_user(
            NewUser {
                first_name: request.first_name,
                last_name: request.last_name,
                email: request.email,
                phone: request.phone,
                dob: request.dob,
                gender: request.gender,
            },
            &actor,
            &ctx,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_user(
    Path(reference_id): Path<Uuid>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UserView>, AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    let view = app_state
        .users
        .by_reference_id(reference_id, &actor, &ctx)
        .await?;
    Ok(Json(view))
}

#[derive(Deserialize)]
pub struct FindUserParams {
    pub email: Option<String>,
    pub phone: Option<String>,
}

pub async fn find_user(
    Query(params): Query<FindUserParams>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Option<UserView>>, AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    let view = match (params.email.as_deref(), params.phone.as_deref()) {
        (Some(email), Some(phone)) => {
            app_state
                .users
                .by_email_or_phone(email, phone, &actor, &ctx)
                .await?
        }
        (Some(email), None) => app_state.users.by_email(email, &actor, &ctx).await?,
        (None, Some(phone)) => app_state.users.by_phone(phone, &actor, &ctx).await?,
        (None, None) => {
            return Err(AppError::BadRequest(
                "either email or phone must be given".to_string(),
            ))
        }
    };
    Ok(Json(view))
}

pub async fn bulk_users(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(reference_ids): Json<Vec<Uuid>>,
) -> Result<Json<Vec<UserView>>, AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    let views = app_state.users.bulk(&reference_ids, &actor, &ctx).await?;
    Ok(Json(views))
}

#[derive(Deserialize)]
pub struct UserUpdateRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub dob: Option<String>,
    pub gender: Option<String>,
}

pub async fn put_user(
    Path(reference_id): Path<Uuid>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<UserUpdateRequest>,
) -> Result<Json<UserView>, AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    let view = app_state
        .users
        .update_user(
            reference_id,
            UserUpdate {
                first_name: request.first_name,
                last_name: request.last_name,
                email: request.email,
                phone: request.phone,
                dob: request.dob,
                gender: request.gender,
            },
            &actor,
            &ctx,
        )
        .await?;
    Ok(Json(view))
}

#[derive(Deserialize)]
pub struct DeleteUserParams {
    pub reason: Option<String>,
}

pub async fn delete_user(
    Path(reference_id): Path<Uuid>,
    Query(params): Query<DeleteUserParams>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    let reason = params.reason.as_deref().unwrap_or("user requested deletion");
    app_state
        .users
        .delete_user(reference_id, reason, &actor, &ctx)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn post_reactivate(
    Path(reference_id): Path<Uuid>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    app_state.users.reactivate(reference_id, &actor, &ctx).await?;
    Ok(StatusCode::OK)
}

pub async fn post_anonymize(
    Path(reference_id): Path<Uuid>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    app_state.users.anonymize(reference_id, &actor, &ctx).await?;
    Ok(StatusCode::OK)
}

pub async fn get_export(
    Path(reference_id): Path<Uuid>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    let export = app_state
        .users
        .export_data(reference_id, &actor, &ctx)
        .await?;
    Ok(Json(export))
}

pub async fn post_role(
    Path((reference_id, role)): Path<(Uuid, String)>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    app_state
        .users
        .assign_role(reference_id, &role, &actor, &ctx)
        .await?;
    Ok(StatusCode::OK)
}

pub async fn delete_role(
    Path((reference_id, role)): Path<(Uuid, String)>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    app_state
        .users
        .remove_role(reference_id, &role, &actor, &ctx)
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
pub struct NewAddressRequest {
    pub address_type: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    #[serde(default)]
    pub is_primary: bool,
}

pub async fn post_address(
    Path(reference_id): Path<Uuid>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<NewAddressRequest>,
) -> Result<(StatusCode, Json<AddressView>), AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    let address_type = AddressType::parse(&request.address_type).ok_or_else(|| {
        AppError::BadRequest(format!("unknown address type {}", request.address_type))
    })?;
    let view = app_state
        .addresses
        .add_address(
            reference_id,
            NewAddress {
                address_type,
                line1: request.line1,
                line2: request.line2,
                city: request.city,
                postal_code: request.postal_code,
                country: request.country,
                is_primary: request.is_primary,
            },
            &actor,
            &ctx,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_addresses(
    Path(reference_id): Path<Uuid>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<AddressView>>, AppError> {
    let actor = actor(&headers)?;
    let views = app_state.addresses.list_addresses(reference_id, &actor).await?;
    Ok(Json(views))
}

#[derive(Deserialize)]
pub struct AddressUpdateRequest {
    pub address_type: Option<String>,
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

pub async fn put_address(
    Path((reference_id, address_id)): Path<(Uuid, i64)>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<AddressUpdateRequest>,
) -> Result<StatusCode, AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    let address_type = match request.address_type.as_deref() {
        Some(value) => Some(AddressType::parse(value).ok_or_else(|| {
            AppError::BadRequest(format!("unknown address type {value}"))
        })?),
        None => None,
    };
    app_state
        .addresses
        .update_address(
            reference_id,
            address_id,
            AddressUpdate {
                address_type,
                line1: request.line1,
                line2: request.line2,
                city: request.city,
                postal_code: request.postal_code,
                country: request.country,
            },
            &actor,
            &ctx,
        )
        .await?;
    Ok(StatusCode::OK)
}

pub async fn delete_address(
    Path((reference_id, address_id)): Path<(Uuid, i64)>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    app_state
        .addresses
        .delete_address(reference_id, address_id, &actor, &ctx)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn put_primary_address(
    Path((reference_id, address_id)): Path<(Uuid, i64)>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    app_state
        .addresses
        .set_primary_address(reference_id, address_id, &actor, &ctx)
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
pub struct GrantConsentRequest {
    pub consent_key: String,
    pub consent_version: String,
    pub source: String,
    pub legal_basis: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

pub async fn post_consent(
    Path(reference_id): Path<Uuid>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<GrantConsentRequest>,
) -> Result<(StatusCode, Json<ConsentView>), AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    let view = app_state
        .consents
        .grant(
            reference_id,
            GrantConsent {
                consent_key: request.consent_key,
                consent_version: request.consent_version,
                source: request.source,
                legal_basis: request.legal_basis,
                ip_address: request.ip_address,
                user_agent: request.user_agent,
            },
            &actor,
            &ctx,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_consents(
    Path(reference_id): Path<Uuid>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConsentView>>, AppError> {
    let actor = actor(&headers)?;
    let views = app_state.consents.list(reference_id, &actor).await?;
    Ok(Json(views))
}

pub async fn delete_consent(
    Path((reference_id, consent_key)): Path<(Uuid, String)>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let actor = actor(&headers)?;
    let ctx = request_context(&headers);
    app_state
        .consents
        .withdraw(reference_id, &consent_key, &actor, &ctx)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
