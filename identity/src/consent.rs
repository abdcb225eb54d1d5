use crate::access::Actor;
use crate::access::Role;
use crate::db;
use crate::db::audit;
use crate::db::audit::NewAuditRecord;
use crate::db::consents;
use crate::db::consents::GrantConsentRow;
use crate::db::users;
use crate::db::PgPool;
use crate::IdentityError;
use commons::event;
use commons::RequestContext;
use diesel::Connection;
use outbox::store;
use outbox::NewOutboxEvent;
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

pub const SOURCES: [&str; 4] = ["WEB", "MOBILE", "SUPPORT", "IMPORT"];
pub const LEGAL_BASES: [&str; 4] = ["CONSENT", "CONTRACT", "LEGAL_OBLIGATION", "LEGITIMATE_INTEREST"];

pub struct ConsentService {
    pool: PgPool,
}

#[derive(Debug, Clone)]
pub struct GrantConsent {
    pub consent_key: String,
    pub consent_version: String,
    pub source: String,
    pub legal_basis: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsentView {
    pub consent_key: String,
    pub granted: bool,
    pub consent_version: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub granted_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub withdrawn_at: Option<OffsetDateTime>,
    pub source: String,
    pub legal_basis: String,
}

fn authorize(actor: &Actor, subject: Uuid, action: &str) -> Result<(), IdentityError> {
    let allowed = matches!(actor.role, Role::Admin | Role::Support | Role::InternalConsumer)
        || actor.sees_full_pii(subject);
    if allowed {
        Ok(())
    } else {
        Err(IdentityError::PermissionDenied(format!(
            "{} may not {action} consents of this user",
            actor.label()
        )))
    }
}

impl ConsentService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn grant(
        &self,
        reference_id: Uuid,
        grant: GrantConsent,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<ConsentView, IdentityError> {
        authorize(actor, reference_id, "grant")?;
        if grant.consent_key.trim().is_empty() {
            return Err(IdentityError::Validation(
                "consent key must not be empty".to_string(),
            ));
        }
        if !SOURCES.contains(&grant.source.as_str()) {
            return Err(IdentityError::Validation(format!(
                "unknown consent source {}",
                grant.source
            )));
        }
        if !LEGAL_BASES.contains(&grant.legal_basis.as_str()) {
            return Err(IdentityError::Validation(format!(
                "unknown legal basis {}",
                grant.legal_basis
            )));
        }

        let mut conn = db::acquire(&self.pool).await?;
        let consent = conn.transaction(|conn| {
            let user = users::by_reference_id(conn, reference_id)?
                .ok_or_else(|| IdentityError::NotFound(format!("user {reference_id}")))?;

            let consent = consents::grant(
                conn,
                &GrantConsentRow {
                    user_id: user.id,
                    consent_key: &grant.consent_key,
                    consent_version: &grant.consent_version,
                    source: &grant.source,
                    legal_basis: &grant.legal_basis,
                    ip_address: grant.ip_address.as_deref(),
                    user_agent: grant.user_agent.as_deref(),
                },
            )?;
            audit::insert(
                conn,
                &NewAuditRecord {
                    user_id: Some(user.id),
                    event_type: audit::CONSENT_GRANTED,
                    detail: json!({
                        "consentKey": &grant.consent_key,
                        "consentVersion": &grant.consent_version,
                    }),
                    actor: Some(&actor.label()),
                    correlation_id: Some(&ctx.correlation_id),
                },
            )?;
            store::stage(
                conn,
                &NewOutboxEvent::new(
                    "CONSENT",
                    format!("{reference_id}:{}", grant.consent_key),
                    event::CONSENT_GRANTED,
                    json!({
                        "referenceId": reference_id,
                        "consentKey": &grant.consent_key,
                        "consentVersion": &grant.consent_version,
                        "source": &grant.source,
                        "legalBasis": &grant.legal_basis,
                    }),
                ),
                ctx,
            )?;
            Ok::<_, IdentityError>(consent)
        })?;

        Ok(to_view(&consent))
    }

    /// Withdraw a consent. A withdraw with nothing granted is a no-op and
    /// stages no event.
    pub async fn withdraw(
        &self,
        reference_id: Uuid,
        consent_key: &str,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<(), IdentityError> {
        authorize(actor, reference_id, "withdraw")?;

        let mut conn = db::acquire(&self.pool).await?;
        conn.transaction(|conn| {
            let user = users::by_reference_id(conn, reference_id)?
                .ok_or_else(|| IdentityError::NotFound(format!("user {reference_id}")))?;

            let withdrawn = consents::withdraw(conn, user.id, consent_key)?;
            if withdrawn == 0 {
                return Ok(());
            }

            audit::insert(
                conn,
                &NewAuditRecord {
                    user_id: Some(user.id),
                    event_type: audit::CONSENT_WITHDRAWN,
                    detail: json!({ "consentKey": consent_key }),
                    actor: Some(&actor.label()),
                    correlation_id: Some(&ctx.correlation_id),
                },
            )?;
            store::stage(
                conn,
                &NewOutboxEvent::new(
                    "CONSENT",
                    format!("{reference_id}:{consent_key}"),
                    event::CONSENT_WITHDRAWN,
                    json!({ "referenceId": reference_id, "consentKey": consent_key }),
                ),
                ctx,
            )?;
            Ok(())
        })
    }

    pub async fn list(
        &self,
        reference_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<ConsentView>, IdentityError> {
        authorize(actor, reference_id, "read")?;

        let mut conn = db::acquire(&self.pool).await?;
        let user = users::by_reference_id(&mut conn, reference_id)?
            .ok_or_else(|| IdentityError::NotFound(format!("user {reference_id}")))?;
        let rows = consents::list_for_user(&mut conn, user.id)?;
        Ok(rows.iter().map(to_view).collect())
    }
}

fn to_view(consent: &consents::Consent) -> ConsentView {
    ConsentView {
        consent_key: consent.consent_key.clone(),
        granted: consent.granted,
        consent_version: consent.consent_version.clone(),
        granted_at: consent.granted_at,
        withdrawn_at: consent.withdrawn_at,
        source: consent.source.clone(),
        legal_basis: consent.legal_basis.clone(),
    }
}
