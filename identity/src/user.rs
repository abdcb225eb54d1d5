use crate::access;
use crate::access::Actor;
use crate::access::Role;
use crate::cache::UserCache;
use crate::db;
use crate::db::audit;
use crate::db::audit::NewAuditRecord;
use crate::db::consents;
use crate::db::roles;
use crate::db::users;
use crate::db::users::NewUserRow;
use crate::db::users::User;
use crate::db::users::UserChangeset;
use crate::db::users::DELETED_SENTINEL;
use crate::db::PgPool;
use crate::IdentityError;
use commons::event;
use commons::RequestContext;
use diesel::Connection;
use outbox::store;
use outbox::NewOutboxEvent;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;
use vault_crypto::normalize_phone;
use vault_crypto::Crypto;

pub struct UserService {
    pool: PgPool,
    crypto: Arc<dyn Crypto>,
    cache: UserCache,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub phone: String,
    pub dob: Option<String>,
    pub gender: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub dob: Option<String>,
    pub gender: Option<String>,
}

impl UserUpdate {
    fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = vec![];
        if self.first_name.is_some() {
            fields.push("firstName");
        }
        if self.last_name.is_some() {
            fields.push("lastName");
        }
        if self.email.is_some() {
            fields.push("email");
        }
        if self.phone.is_some() {
            fields.push("phone");
        }
        if self.dob.is_some() {
            fields.push("dob");
        }
        if self.gender.is_some() {
            fields.push("gender");
        }
        fields
    }
}

/// Decrypted user record. Redaction happens in [`project`], per caller.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub reference_id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub phone: String,
    pub dob: Option<String>,
    pub gender: Option<String>,
    pub active: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub archived_at: Option<OffsetDateTime>,
    pub anonymized: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Masked projection for callers without full PII access.
pub fn redacted(view: &UserView) -> UserView {
    UserView {
        email: access::mask_email(&view.email),
        phone: access::mask_phone(&view.phone),
        dob: None,
        ..view.clone()
    }
}

pub fn project(view: UserView, actor: &Actor) -> UserView {
    if actor.sees_full_pii(view.reference_id) {
        view
    } else {
        redacted(&view)
    }
}

pub fn validate_email(email: &str) -> Result<(), IdentityError> {
    let normalized = vault_crypto::normalize_email(email);
    let valid = normalized
        .split_once('@')
        .map(|(local, domain)| {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        })
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(IdentityError::Validation(format!(
            "invalid email address: {email}"
        )))
    }
}

pub fn validate_phone(phone: &str) -> Result<(), IdentityError> {
    let digits = normalize_phone(phone);
    if (10..=15).contains(&digits.len()) {
        Ok(())
    } else {
        Err(IdentityError::Validation(format!(
            "invalid phone number: {phone}"
        )))
    }
}

impl UserService {
    pub fn new(pool: PgPool, crypto: Arc<dyn Crypto>) -> Self {
        Self {
            pool,
            crypto,
            cache: UserCache::new(),
        }
    }

    pub async fn create_user(
        &self,
        new_user: NewUser,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<UserView, IdentityError> {
        if !matches!(actor.role, Role::Admin | Role::InternalConsumer) {
            return Err(IdentityError::PermissionDenied(format!(
                "{} may not create users",
                actor.label()
            )));
        }
        validate_email(&new_user.email)?;
        validate_phone(&new_user.phone)?;

        let email_hmac = self.crypto.email_hmac(&new_user.email).await?;
        let phone_hmac = self.crypto.phone_hmac(&new_user.phone).await?;
        let row = NewUserRow {
            reference_id: Uuid::now_v7(),
            first_name_enc: self.crypto.encrypt_opt(new_user.first_name.as_deref()).await?,
            last_name_enc: self.crypto.encrypt_opt(new_user.last_name.as_deref()).await?,
            email_enc: self.crypto.encrypt(&new_user.email).await?,
            email_hmac,
            phone_enc: self.crypto.encrypt(&new_user.phone).await?,
            phone_hmac,
            dob_enc: self.crypto.encrypt_opt(new_user.dob.as_deref()).await?,
            gender: new_user.gender.clone(),
        };

        let mut conn = db::acquire(&self.pool).await?;
        let user = conn.transaction(|conn| {
            if users::email_hmac_in_use(conn, &row.email_hmac, None)? {
                return Err(IdentityError::Duplicate(
                    "a user with this email already exists".to_string(),
                ));
            }
            if users::phone_hmac_in_use(conn, &row.phone_hmac, None)? {
                return Err(IdentityError::Duplicate(
                    "a user with this phone number already exists".to_string(),
                ));
            }

            let user = users::insert(conn, &row)?;
            audit::insert(
                conn,
                &NewAuditRecord {
                    user_id: Some(user.id),
                    event_type: audit::USER_CREATED,
                    detail: json!({ "referenceId": user.reference_id }),
                    actor: Some(&actor.label()),
                    correlation_id: Some(&ctx.correlation_id),
                },
            )?;
            store::stage(
                conn,
                &NewOutboxEvent::new(
                    "USER",
                    user.reference_id.to_string(),
                    event::USER_CREATED,
                    json!({ "referenceId": user.reference_id }),
                ),
                ctx,
            )?;
            Ok(user)
        })?;

        tracing::info!(reference_id = %user.reference_id, "Created user");
        let view = UserView {
            reference_id: user.reference_id,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            email: new_user.email,
            phone: new_user.phone,
            dob: new_user.dob,
            gender: new_user.gender,
            active: true,
            archived_at: None,
            anonymized: false,
            created_at: user.created_at,
            updated_at: user.updated_at,
        };
        self.cache.put(view.clone());
        Ok(view)
    }

    pub async fn update_user(
        &self,
        reference_id: Uuid,
        update: UserUpdate,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<UserView, IdentityError> {
        let may_update = matches!(actor.role, Role::Admin | Role::Support)
            || actor.sees_full_pii(reference_id);
        if !may_update {
            return Err(IdentityError::PermissionDenied(format!(
                "{} may not update this user",
                actor.label()
            )));
        }

        if let Some(email) = &update.email {
            validate_email(email)?;
        }
        if let Some(phone) = &update.phone {
            validate_phone(phone)?;
        }

        let mut changes = UserChangeset {
            first_name_enc: self.crypto.encrypt_opt(update.first_name.as_deref()).await?,
            last_name_enc: self.crypto.encrypt_opt(update.last_name.as_deref()).await?,
            dob_enc: self.crypto.encrypt_opt(update.dob.as_deref()).await?,
            gender: update.gender.clone(),
            ..UserChangeset::default()
        };
        let new_email_hmac = match &update.email {
            Some(email) => {
                changes.email_enc = Some(self.crypto.encrypt(email).await?);
                Some(self.crypto.email_hmac(email).await?)
            }
            None => None,
        };
        let new_phone_hmac = match &update.phone {
            Some(phone) => {
                changes.phone_enc = Some(self.crypto.encrypt(phone).await?);
                Some(self.crypto.phone_hmac(phone).await?)
            }
            None => None,
        };
        changes.email_hmac = new_email_hmac.clone();
        changes.phone_hmac = new_phone_hmac.clone();

        let changed_fields = update.changed_fields();
        let mut conn = db::acquire(&self.pool).await?;
        let user = conn.transaction(|conn| {
            let user = users::by_reference_id(conn, reference_id)?
                .ok_or_else(|| IdentityError::NotFound(format!("user {reference_id}")))?;
            if user.anonymized {
                return Err(IdentityError::InconsistentState(
                    "anonymized users cannot be updated".to_string(),
                ));
            }
            if let Some(email_hmac) = &new_email_hmac {
                if users::email_hmac_in_use(conn, email_hmac, Some(user.id))? {
                    return Err(IdentityError::Duplicate(
                        "a user with this email already exists".to_string(),
                    ));
                }
            }
            if let Some(phone_hmac) = &new_phone_hmac {
                if users::phone_hmac_in_use(conn, phone_hmac, Some(user.id))? {
                    return Err(IdentityError::Duplicate(
                        "a user with this phone number already exists".to_string(),
                    ));
                }
            }

            users::update_pii(conn, user.id, &changes)?;
            audit::insert(
                conn,
                &NewAuditRecord {
                    user_id: Some(user.id),
                    event_type: audit::USER_UPDATED,
                    detail: json!({ "changedFields": &changed_fields }),
                    actor: Some(&actor.label()),
                    correlation_id: Some(&ctx.correlation_id),
                },
            )?;
            store::stage(
                conn,
                &NewOutboxEvent::new(
                    "USER",
                    reference_id.to_string(),
                    event::USER_UPDATED,
                    json!({
                        "referenceId": reference_id,
                        "changedFields": &changed_fields,
                    }),
                ),
                ctx,
            )?;
            users::by_reference_id(conn, reference_id)?
                .ok_or_else(|| IdentityError::NotFound(format!("user {reference_id}")))
        })?;

        self.cache.invalidate(reference_id);
        self.to_view(&user).await
    }

    /// Soft delete: ACTIVE → ARCHIVED, role cascade, `user.deleted` event.
    /// Idempotent for already-archived users.
    pub async fn delete_user(
        &self,
        reference_id: Uuid,
        reason: &str,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<(), IdentityError> {
        let may_delete = matches!(actor.role, Role::Admin | Role::Support)
            || actor.sees_full_pii(reference_id);
        if !may_delete {
            return Err(IdentityError::PermissionDenied(format!(
                "{} may not delete this user",
                actor.label()
            )));
        }
        self.archive_internal(reference_id, reason, event::USER_DELETED, audit::USER_DELETED, actor, ctx)
            .await
    }

    /// Support-side archive; same mechanics as deletion, distinct event.
    pub async fn archive_user(
        &self,
        reference_id: Uuid,
        reason: &str,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<(), IdentityError> {
        if !matches!(actor.role, Role::Admin | Role::Support) {
            return Err(IdentityError::PermissionDenied(format!(
                "{} may not archive users",
                actor.label()
            )));
        }
        self.archive_internal(reference_id, reason, event::USER_ARCHIVED, audit::USER_ARCHIVED, actor, ctx)
            .await
    }

    async fn archive_internal(
        &self,
        reference_id: Uuid,
        reason: &str,
        event_type: &str,
        audit_type: &str,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<(), IdentityError> {
        let mut conn = db::acquire(&self.pool).await?;
        conn.transaction(|conn| {
            let user = users::by_reference_id(conn, reference_id)?
                .ok_or_else(|| IdentityError::NotFound(format!("user {reference_id}")))?;
            if !user.active {
                return Ok::<(), IdentityError>(());
            }

            if users::archive(conn, user.id)? == 0 {
                return Ok::<(), IdentityError>(());
            }
            let deactivated = roles::deactivate_all(conn, user.id)?;
            audit::insert(
                conn,
                &NewAuditRecord {
                    user_id: Some(user.id),
                    event_type: audit_type,
                    detail: json!({ "reason": reason, "rolesDeactivated": deactivated }),
                    actor: Some(&actor.label()),
                    correlation_id: Some(&ctx.correlation_id),
                },
            )?;
            store::stage(
                conn,
                &NewOutboxEvent::new(
                    "USER",
                    reference_id.to_string(),
                    event_type,
                    json!({ "referenceId": reference_id, "reason": reason }),
                ),
                ctx,
            )?;
            Ok::<(), IdentityError>(())
        })?;

        self.cache.invalidate(reference_id);
        tracing::info!(reference_id = %reference_id, event_type, "Archived user");
        Ok(())
    }

    /// ARCHIVED → ACTIVE. Anonymized users stay terminal.
    pub async fn reactivate(
        &self,
        reference_id: Uuid,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<(), IdentityError> {
        if !matches!(actor.role, Role::Admin | Role::Support) {
            return Err(IdentityError::PermissionDenied(format!(
                "{} may not reactivate users",
                actor.label()
            )));
        }

        let mut conn = db::acquire(&self.pool).await?;
        conn.transaction(|conn| {
            let user = users::by_reference_id(conn, reference_id)?
                .ok_or_else(|| IdentityError::NotFound(format!("user {reference_id}")))?;
            if user.anonymized {
                return Err(IdentityError::InconsistentState(
                    "anonymized users cannot be reactivated".to_string(),
                ));
            }
            if user.active {
                return Ok::<(), IdentityError>(());
            }

            if users::reactivate(conn, user.id)? == 0 {
                return Ok::<(), IdentityError>(());
            }
            audit::insert(
                conn,
                &NewAuditRecord {
                    user_id: Some(user.id),
                    event_type: audit::USER_REACTIVATED,
                    detail: json!({ "referenceId": reference_id }),
                    actor: Some(&actor.label()),
                    correlation_id: Some(&ctx.correlation_id),
                },
            )?;
            store::stage(
                conn,
                &NewOutboxEvent::new(
                    "USER",
                    reference_id.to_string(),
                    event::USER_REACTIVATED,
                    json!({ "referenceId": reference_id }),
                ),
                ctx,
            )?;
            Ok::<(), IdentityError>(())
        })?;

        self.cache.invalidate(reference_id);
        Ok(())
    }

    /// GDPR erasure: ciphertexts become the `DELETED` sentinel, the search
    /// index is dropped, the reference id survives for audit linkage.
    /// Terminal and idempotent.
    pub async fn anonymize(
        &self,
        reference_id: Uuid,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<(), IdentityError> {
        let may_anonymize =
            actor.role == Role::Admin || actor.sees_full_pii(reference_id);
        if !may_anonymize {
            return Err(IdentityError::PermissionDenied(format!(
                "{} may not anonymize this user",
                actor.label()
            )));
        }

        let mut conn = db::acquire(&self.pool).await?;
        conn.transaction(|conn| {
            let user = users::by_reference_id(conn, reference_id)?
                .ok_or_else(|| IdentityError::NotFound(format!("user {reference_id}")))?;
            if user.anonymized {
                return Ok::<(), IdentityError>(());
            }

            if users::anonymize(conn, user.id)? == 0 {
                return Ok::<(), IdentityError>(());
            }
            roles::deactivate_all(conn, user.id)?;
            audit::insert(
                conn,
                &NewAuditRecord {
                    user_id: Some(user.id),
                    event_type: audit::USER_ANONYMIZED,
                    detail: json!({ "referenceId": reference_id }),
                    actor: Some(&actor.label()),
                    correlation_id: Some(&ctx.correlation_id),
                },
            )?;
            store::stage(
                conn,
                &NewOutboxEvent::new(
                    "USER",
                    reference_id.to_string(),
                    event::GDPR_DATA_DELETED,
                    json!({ "referenceId": reference_id }),
                ),
                ctx,
            )?;
            Ok::<(), IdentityError>(())
        })?;

        self.cache.invalidate(reference_id);
        tracing::info!(reference_id = %reference_id, "Anonymized user");
        Ok(())
    }

    pub async fn by_reference_id(
        &self,
        reference_id: Uuid,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<UserView, IdentityError> {
        let view = match self.cache.get(reference_id) {
            Some(view) => view,
            None => {
                let mut conn = db::acquire(&self.pool).await?;
                let user = users::by_reference_id(&mut conn, reference_id)?
                    .ok_or_else(|| IdentityError::NotFound(format!("user {reference_id}")))?;
                let view = self.to_view(&user).await?;
                self.cache.put(view.clone());
                view
            }
        };
        self.audit_access(reference_id, actor, ctx, 1).await?;
        Ok(project(view, actor))
    }

    pub async fn by_email(
        &self,
        email: &str,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<Option<UserView>, IdentityError> {
        let email_hmac = self.crypto.email_hmac(email).await?;
        let mut conn = db::acquire(&self.pool).await?;
        let Some(user) = users::by_email_hmac(&mut conn, &email_hmac)? else {
            return Ok(None);
        };
        let view = self.to_view(&user).await?;
        self.audit_access(user.reference_id, actor, ctx, 1).await?;
        Ok(Some(project(view, actor)))
    }

    pub async fn by_phone(
        &self,
        phone: &str,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<Option<UserView>, IdentityError> {
        let phone_hmac = self.crypto.phone_hmac(phone).await?;
        let mut conn = db::acquire(&self.pool).await?;
        let Some(user) = users::by_phone_hmac(&mut conn, &phone_hmac)? else {
            return Ok(None);
        };
        let view = self.to_view(&user).await?;
        self.audit_access(user.reference_id, actor, ctx, 1).await?;
        Ok(Some(project(view, actor)))
    }

    pub async fn by_email_or_phone(
        &self,
        email: &str,
        phone: &str,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<Option<UserView>, IdentityError> {
        let email_hmac = self.crypto.email_hmac(email).await?;
        let phone_hmac = self.crypto.phone_hmac(phone).await?;
        let mut conn = db::acquire(&self.pool).await?;
        let Some(user) = users::by_email_or_phone_hmac(&mut conn, &email_hmac, &phone_hmac)?
        else {
            return Ok(None);
        };
        let view = self.to_view(&user).await?;
        self.audit_access(user.reference_id, actor, ctx, 1).await?;
        Ok(Some(project(view, actor)))
    }

    pub async fn bulk(
        &self,
        reference_ids: &[Uuid],
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<Vec<UserView>, IdentityError> {
        let mut conn = db::acquire(&self.pool).await?;
        let rows = users::bulk_by_reference_ids(&mut conn, reference_ids)?;
        drop(conn);

        let mut views = Vec::with_capacity(rows.len());
        for user in &rows {
            views.push(project(self.to_view(user).await?, actor));
        }
        self.audit_access(Uuid::nil(), actor, ctx, views.len()).await?;
        Ok(views)
    }

    /// GDPR export of everything the vault holds about the user.
    pub async fn export_data(
        &self,
        reference_id: Uuid,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<serde_json::Value, IdentityError> {
        let may_export = actor.role == Role::Admin || actor.sees_full_pii(reference_id);
        if !may_export {
            return Err(IdentityError::PermissionDenied(format!(
                "{} may not export this user's data",
                actor.label()
            )));
        }

        let mut conn = db::acquire(&self.pool).await?;
        let user = users::by_reference_id(&mut conn, reference_id)?
            .ok_or_else(|| IdentityError::NotFound(format!("user {reference_id}")))?;
        let consents = consents::list_for_user(&mut conn, user.id)?;
        let view = self.to_view(&user).await?;

        let export = json!({
            "user": view,
            "consents": consents
                .iter()
                .map(|consent| {
                    json!({
                        "consentKey": &consent.consent_key,
                        "granted": consent.granted,
                        "consentVersion": &consent.consent_version,
                        "source": &consent.source,
                        "legalBasis": &consent.legal_basis,
                    })
                })
                .collect::<Vec<_>>(),
        });

        conn.transaction(|conn| {
            audit::insert(
                conn,
                &NewAuditRecord {
                    user_id: Some(user.id),
                    event_type: audit::DATA_EXPORTED,
                    detail: json!({ "referenceId": reference_id }),
                    actor: Some(&actor.label()),
                    correlation_id: Some(&ctx.correlation_id),
                },
            )?;
            store::stage(
                conn,
                &NewOutboxEvent::new(
                    "USER",
                    reference_id.to_string(),
                    event::GDPR_DATA_EXPORTED,
                    json!({ "referenceId": reference_id }),
                ),
                ctx,
            )?;
            Ok::<_, IdentityError>(())
        })?;

        Ok(export)
    }

    pub async fn assign_role(
        &self,
        reference_id: Uuid,
        role: &str,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<(), IdentityError> {
        self.change_role(reference_id, role, true, actor, ctx).await
    }

    pub async fn remove_role(
        &self,
        reference_id: Uuid,
        role: &str,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<(), IdentityError> {
        self.change_role(reference_id, role, false, actor, ctx).await
    }

    async fn change_role(
        &self,
        reference_id: Uuid,
        role: &str,
        assign: bool,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<(), IdentityError> {
        if actor.role != Role::Admin {
            return Err(IdentityError::PermissionDenied(format!(
                "{} may not manage roles",
                actor.label()
            )));
        }
        if Role::parse(role).is_none() {
            return Err(IdentityError::Validation(format!("unknown role {role}")));
        }

        let mut conn = db::acquire(&self.pool).await?;
        conn.transaction(|conn| {
            let user = users::by_reference_id(conn, reference_id)?
                .ok_or_else(|| IdentityError::NotFound(format!("user {reference_id}")))?;

            let (audit_type, event_type) = if assign {
                roles::assign(conn, user.id, role)?;
                (audit::ROLE_ASSIGNED, event::USER_ROLE_ASSIGNED)
            } else {
                roles::remove(conn, user.id, role)?;
                (audit::ROLE_REMOVED, event::USER_ROLE_REMOVED)
            };
            audit::insert(
                conn,
                &NewAuditRecord {
                    user_id: Some(user.id),
                    event_type: audit_type,
                    detail: json!({ "role": role }),
                    actor: Some(&actor.label()),
                    correlation_id: Some(&ctx.correlation_id),
                },
            )?;
            store::stage(
                conn,
                &NewOutboxEvent::new(
                    "USER",
                    reference_id.to_string(),
                    event_type,
                    json!({ "referenceId": reference_id, "role": role }),
                ),
                ctx,
            )?;
            Ok(())
        })
    }

    async fn audit_access(
        &self,
        reference_id: Uuid,
        actor: &Actor,
        ctx: &RequestContext,
        records: usize,
    ) -> Result<(), IdentityError> {
        let mut conn = db::acquire(&self.pool).await?;
        let user_id = if reference_id.is_nil() {
            None
        } else {
            users::by_reference_id(&mut conn, reference_id)?.map(|user| user.id)
        };
        audit::insert(
            &mut conn,
            &NewAuditRecord {
                user_id,
                event_type: audit::PII_ACCESSED,
                detail: json!({
                    "records": records,
                    "redacted": !actor.sees_full_pii(reference_id),
                }),
                actor: Some(&actor.label()),
                correlation_id: Some(&ctx.correlation_id),
            },
        )?;
        Ok(())
    }

    async fn decrypt_field(&self, ciphertext: &str) -> Result<String, IdentityError> {
        if ciphertext == DELETED_SENTINEL {
            return Ok(DELETED_SENTINEL.to_string());
        }
        Ok(self.crypto.decrypt(ciphertext).await?)
    }

    async fn decrypt_opt(&self, ciphertext: Option<&str>) -> Result<Option<String>, IdentityError> {
        match ciphertext {
            Some(ciphertext) => Ok(Some(self.decrypt_field(ciphertext).await?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn to_view(&self, user: &User) -> Result<UserView, IdentityError> {
        Ok(UserView {
            reference_id: user.reference_id,
            first_name: self.decrypt_opt(user.first_name_enc.as_deref()).await?,
            last_name: self.decrypt_opt(user.last_name_enc.as_deref()).await?,
            email: self.decrypt_field(&user.email_enc).await?,
            phone: self.decrypt_field(&user.phone_enc).await?,
            dob: self.decrypt_opt(user.dob_enc.as_deref()).await?,
            gender: user.gender.clone(),
            active: user.active,
            archived_at: user.archived_at,
            anonymized: user.anonymized,
            created_at: user.created_at,
            updated_at: user.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> UserView {
        UserView {
            reference_id: Uuid::new_v4(),
            first_name: Some("Priya".to_string()),
            last_name: Some("Sharma".to_string()),
            email: "priya@example.com".to_string(),
            phone: "919876543210".to_string(),
            dob: Some("1992-03-14".to_string()),
            gender: Some("FEMALE".to_string()),
            active: true,
            archived_at: None,
            anonymized: false,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn redaction_masks_contact_fields_and_drops_dob() {
        let redacted = redacted(&view());

        assert_eq!(redacted.email, "p***@example.com");
        assert_eq!(redacted.phone, "********3210");
        assert_eq!(redacted.dob, None);
        assert_eq!(redacted.first_name.as_deref(), Some("Priya"));
    }

    #[test]
    fn projection_keeps_full_view_for_admin_and_owner() {
        let view = view();
        let admin = Actor::service(Role::Admin);
        let owner = Actor::owner(view.reference_id);
        let lookup = Actor::service(Role::ServiceLookup);

        assert_eq!(project(view.clone(), &admin).email, "priya@example.com");
        assert_eq!(project(view.clone(), &owner).email, "priya@example.com");
        assert_eq!(project(view, &lookup).email, "p***@example.com");
    }

    #[test]
    fn validates_email_shape() {
        assert!(validate_email("a@example.com").is_ok());
        assert!(validate_email(" A@Example.COM ").is_ok());
        assert!(validate_email("nope").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a@no-dot").is_err());
        assert!(validate_email("a@.com").is_err());
    }

    #[test]
    fn validates_phone_length() {
        assert!(validate_phone("+91 98765 43210").is_ok());
        assert!(validate_phone("9876543210").is_ok());
        assert!(validate_phone("12345").is_err());
        assert!(validate_phone("1234567890123456").is_err());
    }

    #[test]
    fn update_lists_changed_fields() {
        let update = UserUpdate {
            email: Some("new@example.com".to_string()),
            phone: Some("919812345678".to_string()),
            ..UserUpdate::default()
        };

        assert_eq!(update.changed_fields(), vec!["email", "phone"]);
    }
}
