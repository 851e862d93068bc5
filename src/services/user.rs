use crate::models::*;
use crate::config::DbPool;
use crate::db;
use crate::errors::ApiError;
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use log::{debug, info};

fn account_gate(active: Option<bool>) -> Result<(), ApiError> {
    match active {
        Some(true) => Ok(()),
        Some(false) => Err(ApiError::forbidden("This account has been deactivated")),
        None => Err(ApiError::AuthError("This account no longer exists".to_string())),
    }
}

/// Access tokens outlive a deactivation, so operations that change data re-check the stored flag.
pub(crate) fn ensure_active(conn: &mut PgConnection, account: i32) -> Result<(), ApiError> {
    use crate::schema::users;
    let active = users::table
        .find(account)
        .select(users::is_active)
        .first::<bool>(conn)
        .optional()?;
    account_gate(active)
}

pub struct UserService;

impl UserService {
    pub async fn get_user_by_id(id: i32, pool: &DbPool) -> Result<User, ApiError> {
        db::run(pool, move |conn| {
            use crate::schema::users::dsl::*;
            users
                .find(id)
                .select(User::as_select())
                .first::<User>(conn)
                .optional()?
                .ok_or_else(|| {
                    debug!("User not found with ID {}", id);
                    ApiError::not_found("User")
                })
        })
        .await
    }

    pub async fn update_profile(id: i32, request: UpdateProfileRequest, pool: &DbPool) -> Result<User, ApiError> {
        let request = request.checked()?;
        let changes = UserChanges {
            name: request.name,
            phone_number: request.phone_number,
            profile_image: request.profile_image,
            updated_at: Some(Utc::now().naive_utc()),
        };

        let user = db::run(pool, move |conn| {
            ensure_active(conn, id)?;
            use crate::schema::users::dsl::*;
            Ok(diesel::update(users.find(id))
                .set(&changes)
                .returning(User::as_returning())
                .get_result::<User>(conn)?)
        })
        .await?;

        info!("Profile updated for user {}", id);
        Ok(user)
    }

    pub async fn list_users(query: UserListQuery, pool: &DbPool) -> Result<Paginated<User>, ApiError> {
        let page = PageQuery { page: query.page, per_page: query.per_page };
        let role_filter = query.role.map(|r| r.as_str().to_string());

        let (rows, total) = db::run(pool, move |conn| {
            use crate::schema::users::dsl::*;

            let mut count_query = users.into_boxed();
            let mut list_query = users.into_boxed();
            if let Some(r) = &role_filter {
                count_query = count_query.filter(role.eq(r.clone()));
                list_query = list_query.filter(role.eq(r.clone()));
            }

            let total = count_query.count().get_result::<i64>(conn)?;
            let rows = list_query
                .select(User::as_select())
                .order(user_id.asc())
                .limit(page.limit())
                .offset(page.offset())
                .load::<User>(conn)?;
            Ok((rows, total))
        })
        .await?;

        Ok(Paginated::new(rows, &page, total))
    }

    pub async fn set_active(admin_id: i32, target_id: i32, active: bool, pool: &DbPool) -> Result<User, ApiError> {
        if admin_id == target_id && !active {
            return Err(ApiError::validation("Admins cannot deactivate their own account"));
        }

        let user = db::run(pool, move |conn| {
            ensure_active(conn, admin_id)?;
            conn.transaction::<_, ApiError, _>(|conn| {
                let user = {
                    use crate::schema::users::dsl::*;
                    diesel::update(users.find(target_id))
                        .set((is_active.eq(active), updated_at.eq(Utc::now().naive_utc())))
                        .returning(User::as_returning())
                        .get_result::<User>(conn)
                        .optional()?
                        .ok_or_else(|| ApiError::not_found("User"))?
                };

                if !active {
                    use crate::schema::refresh_token::dsl::*;
                    diesel::delete(refresh_token.filter(user_id.eq(target_id))).execute(conn)?;
                }

                Ok(user)
            })
        })
        .await?;

        info!("User {} active flag set to {} by admin {}", target_id, active, admin_id);
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deactivated_accounts_are_forbidden() {
        assert!(account_gate(Some(true)).is_ok());
        assert!(matches!(account_gate(Some(false)), Err(ApiError::Forbidden(_))));
    }

    #[test]
    fn deleted_accounts_must_authenticate_again() {
        assert!(matches!(account_gate(None), Err(ApiError::AuthError(_))));
    }
}
