use crate::models::*;
use crate::config::DbPool;
use crate::db;
use crate::errors::ApiError;
use crate::services::user::ensure_active;
use crate::middleware::AuthUser;
use crate::schema::payout_methods::dsl::*;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use log::info;

const DEFAULT_RACE: &str = "Another default payout method was set at the same time; please retry";

fn owned_method(conn: &mut PgConnection, owner: i32, id: i32) -> Result<PayoutMethod, ApiError> {
    payout_methods
        .filter(payout_method_id.eq(id))
        .filter(owner_id.eq(owner))
        .select(PayoutMethod::as_select())
        .first::<PayoutMethod>(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Payout method"))
}

fn clear_default(conn: &mut PgConnection, owner: i32) -> Result<(), ApiError> {
    diesel::update(payout_methods.filter(owner_id.eq(owner)).filter(is_default.eq(true)))
        .set(is_default.eq(false))
        .execute(conn)?;
    Ok(())
}

/// The method a payout should go to: the given one if it still exists, otherwise the owner's default.
pub(crate) fn resolve_for_payout(
    conn: &mut PgConnection,
    owner: i32,
    preferred: Option<i32>,
) -> Result<Option<PayoutMethod>, ApiError> {
    if let Some(id) = preferred {
        if let Some(method) = payout_methods
            .filter(payout_method_id.eq(id))
            .filter(owner_id.eq(owner))
            .select(PayoutMethod::as_select())
            .first::<PayoutMethod>(conn)
            .optional()?
        {
            return Ok(Some(method));
        }
    }

    Ok(payout_methods
        .filter(owner_id.eq(owner))
        .filter(is_default.eq(true))
        .select(PayoutMethod::as_select())
        .first::<PayoutMethod>(conn)
        .optional()?)
}

pub struct PayoutService;

impl PayoutService {
    pub async fn list(caller: AuthUser, pool: &DbPool) -> Result<Vec<PayoutMethod>, ApiError> {
        caller.require_role(UserRole::Owner)?;

        db::run(pool, move |conn| {
            Ok(payout_methods
                .filter(owner_id.eq(caller.user_id))
                .order((is_default.desc(), created_at.asc()))
                .select(PayoutMethod::as_select())
                .load::<PayoutMethod>(conn)?)
        })
        .await
    }

    pub async fn create(caller: AuthUser, request: CreatePayoutMethodRequest, pool: &DbPool) -> Result<PayoutMethod, ApiError> {
        caller.require_role(UserRole::Owner)?;
        let request = request.checked()?;
        let number = request.normalized_account_number()?;

        let method = db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            conn.transaction::<_, ApiError, _>(|conn| {
                let existing = payout_methods
                    .filter(owner_id.eq(caller.user_id))
                    .count()
                    .get_result::<i64>(conn)?;
                let make_default = existing == 0 || request.is_default.unwrap_or(false);
                if make_default {
                    clear_default(conn, caller.user_id)?;
                }

                Ok(diesel::insert_into(payout_methods)
                    .values(&NewPayoutMethod {
                        owner_id: caller.user_id,
                        method_type: request.method_type.as_str().to_string(),
                        provider_code: request.provider_code.to_uppercase(),
                        account_number: number,
                        account_holder: request.account_holder,
                        is_default: make_default,
                    })
                    .returning(PayoutMethod::as_returning())
                    .get_result::<PayoutMethod>(conn)
                    .map_err(|e| ApiError::from(e).with_conflict_message(DEFAULT_RACE))?)
            })
        })
        .await?;

        info!("Owner {} added payout method {}", method.owner_id, method.payout_method_id);
        Ok(method)
    }

    pub async fn set_default(caller: AuthUser, id: i32, pool: &DbPool) -> Result<PayoutMethod, ApiError> {
        caller.require_role(UserRole::Owner)?;

        db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            conn.transaction::<_, ApiError, _>(|conn| {
                owned_method(conn, caller.user_id, id)?;
                clear_default(conn, caller.user_id)?;
                Ok(diesel::update(payout_methods.find(id))
                    .set(is_default.eq(true))
                    .returning(PayoutMethod::as_returning())
                    .get_result::<PayoutMethod>(conn)
                    .map_err(|e| ApiError::from(e).with_conflict_message(DEFAULT_RACE))?)
            })
        })
        .await
    }

    pub async fn delete(caller: AuthUser, id: i32, pool: &DbPool) -> Result<(), ApiError> {
        caller.require_role(UserRole::Owner)?;

        db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            conn.transaction::<_, ApiError, _>(|conn| {
                let method = owned_method(conn, caller.user_id, id)?;
                diesel::delete(payout_methods.find(id)).execute(conn)?;

                if method.is_default {
                    let replacement = payout_methods
                        .filter(owner_id.eq(caller.user_id))
                        .order(created_at.desc())
                        .select(payout_method_id)
                        .first::<i32>(conn)
                        .optional()?;
                    if let Some(next) = replacement {
                        diesel::update(payout_methods.find(next))
                            .set(is_default.eq(true))
                            .execute(conn)?;
                    }
                }
                Ok(())
            })
        })
        .await?;

        info!("Payout method {} deleted", id);
        Ok(())
    }
}
