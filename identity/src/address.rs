use crate::access::Actor;
use crate::access::Role;
use crate::db;
use crate::db::addresses;
use crate::db::addresses::Address;
use crate::db::addresses::AddressChangeset;
use crate::db::addresses::AddressType;
use crate::db::addresses::NewAddressRow;
use crate::db::audit;
use crate::db::audit::NewAuditRecord;
use crate::db::users;
use crate::db::PgPool;
use crate::IdentityError;
use commons::event;
use commons::RequestContext;
use diesel::Connection;
use diesel::PgConnection;
use outbox::store;
use outbox::NewOutboxEvent;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use vault_crypto::Crypto;

pub struct AddressService {
    pool: PgPool,
    crypto: Arc<dyn Crypto>,
}

#[derive(Debug, Clone)]
pub struct NewAddress {
    pub address_type: AddressType,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AddressUpdate {
    pub address_type: Option<AddressType>,
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddressView {
    pub id: i64,
    pub address_type: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    pub is_primary: bool,
}

fn authorize(actor: &Actor, subject: Uuid, action: &str) -> Result<(), IdentityError> {
    let allowed =
        matches!(actor.role, Role::Admin | Role::Support) || actor.sees_full_pii(subject);
    if allowed {
        Ok(())
    } else {
        Err(IdentityError::PermissionDenied(format!(
            "{} may not {action} addresses of this user",
            actor.label()
        )))
    }
}

impl AddressService {
    pub fn new(pool: PgPool, crypto: Arc<dyn Crypto>) -> Self {
        Self { pool, crypto }
    }

    /// Add an address. If the user has no primary yet, the new address is
    /// promoted regardless of the flag, keeping the exactly-one-primary
    /// invariant.
    pub async fn add_address(
        &self,
        reference_id: Uuid,
        new_address: NewAddress,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<AddressView, IdentityError> {
        authorize(actor, reference_id, "add")?;

        let row_template = NewAddressRow {
            user_id: 0,
            address_type: new_address.address_type,
            line1_enc: self.crypto.encrypt(&new_address.line1).await?,
            line2_enc: self.crypto.encrypt_opt(new_address.line2.as_deref()).await?,
            city_enc: self.crypto.encrypt(&new_address.city).await?,
            postal_code_enc: self.crypto.encrypt(&new_address.postal_code).await?,
            country_enc: self.crypto.encrypt(&new_address.country).await?,
            is_primary: new_address.is_primary,
        };

        let mut conn = db::acquire(&self.pool).await?;
        let address = conn.transaction(|conn| {
            let user = users::by_reference_id(conn, reference_id)?
                .ok_or_else(|| IdentityError::NotFound(format!("user {reference_id}")))?;

            let mut row = row_template;
            row.user_id = user.id;
            if row.is_primary {
                addresses::clear_primary_for_user(conn, user.id)?;
            } else if !addresses::has_primary(conn, user.id)? {
                row.is_primary = true;
            }
            let address = addresses::insert(conn, &row)?;

            audit::insert(
                conn,
                &NewAuditRecord {
                    user_id: Some(user.id),
                    event_type: audit::ADDRESS_ADDED,
                    detail: json!({
                        "addressId": address.id,
                        "addressType": address.address_type.as_str(),
                        "isPrimary": address.is_primary,
                    }),
                    actor: Some(&actor.label()),
                    correlation_id: Some(&ctx.correlation_id),
                },
            )?;
            store::stage(
                conn,
                &NewOutboxEvent::new(
                    "USER",
                    reference_id.to_string(),
                    event::ADDRESS_ADDED,
                    json!({
                        "referenceId": reference_id,
                        "addressId": address.id,
                        "addressType": address.address_type.as_str(),
                        "isPrimary": address.is_primary,
                    }),
                ),
                ctx,
            )?;
            Ok::<_, IdentityError>(address)
        })?;

        self.to_view(&address, &new_address).await
    }

    pub async fn update_address(
        &self,
        reference_id: Uuid,
        address_id: i64,
        update: AddressUpdate,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<(), IdentityError> {
        authorize(actor, reference_id, "update")?;

        let changes = AddressChangeset {
            address_type: update.address_type,
            line1_enc: self.crypto.encrypt_opt(update.line1.as_deref()).await?,
            line2_enc: self.crypto.encrypt_opt(update.line2.as_deref()).await?,
            city_enc: self.crypto.encrypt_opt(update.city.as_deref()).await?,
            postal_code_enc: self.crypto.encrypt_opt(update.postal_code.as_deref()).await?,
            country_enc: self.crypto.encrypt_opt(update.country.as_deref()).await?,
        };

        let mut conn = db::acquire(&self.pool).await?;
        conn.transaction(|conn| {
            let (user, address) = self.owned_address(conn, reference_id, address_id)?;
            addresses::update(conn, address.id, &changes)?;
            audit::insert(
                conn,
                &NewAuditRecord {
                    user_id: Some(user.id),
                    event_type: audit::ADDRESS_UPDATED,
                    detail: json!({ "addressId": address.id }),
                    actor: Some(&actor.label()),
                    correlation_id: Some(&ctx.correlation_id),
                },
            )?;
            store::stage(
                conn,
                &NewOutboxEvent::new(
                    "USER",
                    reference_id.to_string(),
                    event::ADDRESS_UPDATED,
                    json!({ "referenceId": reference_id, "addressId": address.id }),
                ),
                ctx,
            )?;
            Ok(())
        })
    }

    /// Delete an address; if it was the primary, the most recently created
    /// remaining address is promoted.
    pub async fn delete_address(
        &self,
        reference_id: Uuid,
        address_id: i64,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<(), IdentityError> {
        authorize(actor, reference_id, "delete")?;

        let mut conn = db::acquire(&self.pool).await?;
        conn.transaction(|conn| {
            let (user, address) = self.owned_address(conn, reference_id, address_id)?;
            addresses::delete(conn, address.id)?;

            if address.is_primary {
                if let Some(successor) = addresses::latest_for_user(conn, user.id)? {
                    addresses::set_primary(conn, successor.id)?;
                }
            }

            audit::insert(
                conn,
                &NewAuditRecord {
                    user_id: Some(user.id),
                    event_type: audit::ADDRESS_DELETED,
                    detail: json!({ "addressId": address.id, "wasPrimary": address.is_primary }),
                    actor: Some(&actor.label()),
                    correlation_id: Some(&ctx.correlation_id),
                },
            )?;
            store::stage(
                conn,
                &NewOutboxEvent::new(
                    "USER",
                    reference_id.to_string(),
                    event::ADDRESS_DELETED,
                    json!({ "referenceId": reference_id, "addressId": address.id }),
                ),
                ctx,
            )?;
            Ok(())
        })
    }

    /// Clear-all-then-set in one transaction; the exactly-one-primary
    /// invariant holds on every exit path.
    pub async fn set_primary_address(
        &self,
        reference_id: Uuid,
        address_id: i64,
        actor: &Actor,
        ctx: &RequestContext,
    ) -> Result<(), IdentityError> {
        authorize(actor, reference_id, "update")?;

        let mut conn = db::acquire(&self.pool).await?;
        conn.transaction(|conn| {
            let (user, address) = self.owned_address(conn, reference_id, address_id)?;
            addresses::clear_primary_for_user(conn, user.id)?;
            addresses::set_primary(conn, address.id)?;
            audit::insert(
                conn,
                &NewAuditRecord {
                    user_id: Some(user.id),
                    event_type: audit::ADDRESS_UPDATED,
                    detail: json!({ "addressId": address.id, "setPrimary": true }),
                    actor: Some(&actor.label()),
                    correlation_id: Some(&ctx.correlation_id),
                },
            )?;
            store::stage(
                conn,
                &NewOutboxEvent::new(
                    "USER",
                    reference_id.to_string(),
                    event::ADDRESS_UPDATED,
                    json!({
                        "referenceId": reference_id,
                        "addressId": address.id,
                        "isPrimary": true,
                    }),
                ),
                ctx,
            )?;
            Ok(())
        })
    }

    pub async fn list_addresses(
        &self,
        reference_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<AddressView>, IdentityError> {
        if !(actor.role == Role::Admin || actor.sees_full_pii(reference_id)) {
            return Err(IdentityError::PermissionDenied(format!(
                "{} may not read addresses of this user",
                actor.label()
            )));
        }

        let mut conn = db::acquire(&self.pool).await?;
        let user = users::by_reference_id(&mut conn, reference_id)?
            .ok_or_else(|| IdentityError::NotFound(format!("user {reference_id}")))?;
        let rows = addresses::list_for_user(&mut conn, user.id)?;
        drop(conn);

        let mut views = Vec::with_capacity(rows.len());
        for address in &rows {
            views.push(self.decrypt_view(address).await?);
        }
        Ok(views)
    }

    fn owned_address(
        &self,
        conn: &mut PgConnection,
        reference_id: Uuid,
        address_id: i64,
    ) -> Result<(users::User, Address), IdentityError> {
        let user = users::by_reference_id(conn, reference_id)?
            .ok_or_else(|| IdentityError::NotFound(format!("user {reference_id}")))?;
        let address = addresses::by_id(conn, address_id)?
            .filter(|address| address.user_id == user.id)
            .ok_or_else(|| IdentityError::NotFound(format!("address {address_id}")))?;
        Ok((user, address))
    }

    async fn decrypt_view(&self, address: &Address) -> Result<AddressView, IdentityError> {
        Ok(AddressView {
            id: address.id,
            address_type: address.address_type.as_str().to_string(),
            line1: self.crypto.decrypt(&address.line1_enc).await?,
            line2: self.crypto.decrypt_opt(address.line2_enc.as_deref()).await?,
            city: self.crypto.decrypt(&address.city_enc).await?,
            postal_code: self.crypto.decrypt(&address.postal_code_enc).await?,
            country: self.crypto.decrypt(&address.country_enc).await?,
            is_primary: address.is_primary,
        })
    }

    async fn to_view(
        &self,
        address: &Address,
        source: &NewAddress,
    ) -> Result<AddressView, IdentityError> {
        Ok(AddressView {
            id: address.id,
            address_type: address.address_type.as_str().to_string(),
            line1: source.line1.clone(),
            line2: source.line2.clone(),
            city: source.city.clone(),
            postal_code: source.postal_code.clone(),
            country: source.country.clone(),
            is_primary: address.is_primary,
        })
    }
}
