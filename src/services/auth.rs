use crate::models::*;
use crate::config::{AppConfig, DbPool};
use crate::db;
use crate::errors::ApiError;
use crate::services::user::ensure_active;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::pg::PgConnection;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, error, info};
use uuid::Uuid;

pub struct AuthService;

impl AuthService {
    pub fn hash_password(password: &str) -> Result<String, ApiError> {
        hash(password, DEFAULT_COST)
            .map_err(|e| {
                error!("Failed to hash password: {}", e);
                ApiError::InternalError("Failed to hash password".to_string())
            })
    }

    pub fn verify_password(password: &str, hash: &str) -> Result<bool, ApiError> {
        verify(password, hash)
            .map_err(|e| {
                error!("Failed to verify password: {}", e);
                ApiError::InternalError("Failed to verify password".to_string())
            })
    }

    pub fn generate_token(user_id: i32, email: &str, role: UserRole, config: &AppConfig) -> Result<String, ApiError> {
        let now = Utc::now();
        let iat = now.timestamp() as usize;
        let exp = (now + Duration::hours(config.jwt_expiry)).timestamp() as usize;

        let claims = Claims {
            sub: user_id.to_string(),
            exp,
            iat,
            user_id,
            email: email.to_string(),
            role,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes())
        )
        .map_err(|e| {
            error!("Failed to generate token: {}", e);
            ApiError::InternalError("Failed to generate token".to_string())
        })
    }

    pub fn verify_token(token: &str, config: &AppConfig) -> Result<Claims, ApiError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|e| {
            debug!("Rejected access token: {}", e);
            ApiError::AuthError("Invalid or expired token".to_string())
        })
    }

    pub fn generate_refresh_token() -> String {
        Uuid::new_v4().to_string()
    }

    fn store_refresh_token(conn: &mut PgConnection, user_id_param: i32, refresh_expiry: i64) -> Result<String, ApiError> {
        use crate::schema::refresh_token::dsl::*;

        let new_token = NewRefreshToken {
            user_id: user_id_param,
            token: Self::generate_refresh_token(),
            expires_at: (Utc::now() + Duration::days(refresh_expiry)).naive_utc(),
        };

        diesel::insert_into(refresh_token)
            .values(&new_token)
            .execute(conn)?;

        Ok(new_token.token)
    }

    fn auth_response(user: User, refresh: String, config: &AppConfig) -> Result<AuthResponse, ApiError> {
        let role: UserRole = user.role.parse()?;
        let token = Self::generate_token(user.user_id, &user.email, role, config)?;
        Ok(AuthResponse { token, refresh_token: refresh, user })
    }

    pub async fn register(request: RegisterRequest, config: &AppConfig, pool: &DbPool) -> Result<AuthResponse, ApiError> {
        if request.role == UserRole::Admin {
            return Err(ApiError::forbidden("Admin accounts cannot be self-registered"));
        }
        let request = request.checked()?;

        let email_addr = request.email.to_lowercase();
        let refresh_expiry = config.refresh_expiry;

        let (user, refresh) = db::run(pool, move |conn| {
            use crate::schema::users::dsl::*;

            let new_user = NewUser {
                name: request.name,
                email: email_addr.clone(),
                password_hash: Self::hash_password(&request.password)?,
                phone_number: request.phone_number,
                role: request.role.as_str().to_string(),
            };

            conn.transaction::<_, ApiError, _>(|conn| {
                let user = diesel::insert_into(users)
                    .values(&new_user)
                    .returning(User::as_returning())
                    .get_result::<User>(conn)
                    .map_err(|e| match ApiError::from(e) {
                        ApiError::Conflict(_) => {
                            debug!("Attempted to register with existing email: {}", email_addr);
                            ApiError::Conflict("Email already exists".to_string())
                        },
                        other => other,
                    })?;
                let refresh = Self::store_refresh_token(conn, user.user_id, refresh_expiry)?;
                Ok((user, refresh))
            })
        })
        .await?;

        info!("Registered new {} with ID: {}", user.role, user.user_id);
        Self::auth_response(user, refresh, config)
    }

    pub async fn login(request: LoginRequest, config: &AppConfig, pool: &DbPool) -> Result<AuthResponse, ApiError> {
        let email_addr = request.email.to_lowercase();
        let refresh_expiry = config.refresh_expiry;

        let (user, refresh) = db::run(pool, move |conn| {
            use crate::schema::users::dsl::*;

            let user = users
                .filter(email.eq(email_addr.as_str()))
                .select(User::as_select())
                .first::<User>(conn)
                .optional()?
                .ok_or_else(|| {
                    debug!("Login failed: User not found with email {}", email_addr);
                    ApiError::AuthError("Invalid credentials".to_string())
                })?;

            if !Self::verify_password(&request.password, &user.password_hash)? {
                debug!("Login failed: Invalid password for user {}", email_addr);
                return Err(ApiError::AuthError("Invalid credentials".to_string()));
            }

            if !user.is_active {
                return Err(ApiError::forbidden("This account has been deactivated"));
            }

            let now = Utc::now().naive_utc();
            let user = diesel::update(users.find(user.user_id))
                .set(last_login.eq(Some(now)))
                .returning(User::as_returning())
                .get_result::<User>(conn)?;

            let refresh = Self::store_refresh_token(conn, user.user_id, refresh_expiry)?;
            Ok((user, refresh))
        })
        .await?;

        info!("User {} logged in successfully", user.email);
        Self::auth_response(user, refresh, config)
    }

    /// Rotates a refresh token: the presented one is consumed and a new pair is issued.
    pub async fn refresh(presented: String, config: &AppConfig, pool: &DbPool) -> Result<AuthResponse, ApiError> {
        let refresh_expiry = config.refresh_expiry;

        let (user, refresh) = db::run(pool, move |conn| {
            conn.transaction::<_, ApiError, _>(|conn| {
                let record = {
                    use crate::schema::refresh_token::dsl::*;
                    diesel::delete(
                        refresh_token
                            .filter(token.eq(presented.as_str()))
                            .filter(expires_at.gt(Utc::now().naive_utc()))
                    )
                    .returning((token_id, user_id))
                    .get_result::<(i32, i32)>(conn)
                    .optional()?
                };

                let (_, owner) = record
                    .ok_or_else(|| ApiError::AuthError("Invalid or expired refresh token".to_string()))?;

                let user = {
                    use crate::schema::users::dsl::*;
                    users.find(owner).select(User::as_select()).first::<User>(conn)?
                };

                if !user.is_active {
                    return Err(ApiError::forbidden("This account has been deactivated"));
                }

                let refresh = Self::store_refresh_token(conn, user.user_id, refresh_expiry)?;
                Ok((user, refresh))
            })
        })
        .await?;

        info!("Token refreshed for user {}", user.email);
        Self::auth_response(user, refresh, config)
    }

    pub async fn logout(presented: String, caller_id: i32, pool: &DbPool) -> Result<(), ApiError> {
        let deleted = db::run(pool, move |conn| {
            use crate::schema::refresh_token::dsl::*;
            Ok(diesel::delete(
                refresh_token
                    .filter(token.eq(presented))
                    .filter(user_id.eq(caller_id))
            )
            .execute(conn)?)
        })
        .await?;

        debug!("Logout for user {} removed {} refresh token(s)", caller_id, deleted);
        Ok(())
    }

    pub async fn change_password(
        caller_id: i32,
        request: ChangePasswordRequest,
        pool: &DbPool,
    ) -> Result<(), ApiError> {
        let request = request.checked()?;
        db::run(pool, move |conn| {
            ensure_active(conn, caller_id)?;
            let current_hash = {
                use crate::schema::users::dsl::*;
                users.find(caller_id).select(password_hash).first::<String>(conn)?
            };

            if !Self::verify_password(&request.current_password, &current_hash)? {
                return Err(ApiError::validation("Current password is incorrect"));
            }

            let new_hash = Self::hash_password(&request.new_password)?;

            conn.transaction::<_, ApiError, _>(|conn| {
                {
                    use crate::schema::users::dsl::*;
                    diesel::update(users.find(caller_id))
                        .set((password_hash.eq(new_hash), updated_at.eq(Utc::now().naive_utc())))
                        .execute(conn)?;
                }
                {
                    use crate::schema::refresh_token::dsl::*;
                    diesel::delete(refresh_token.filter(user_id.eq(caller_id))).execute(conn)?;
                }
                Ok(())
            })
        })
        .await?;

        info!("Password changed for user {}; refresh tokens revoked", caller_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    #[test]
    fn token_round_trip_carries_role() {
        let config = test_config();
        let token = AuthService::generate_token(42, "sari@example.com", UserRole::Renter, &config).unwrap();
        let claims = AuthService::verify_token(&token, &config).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.role, UserRole::Renter);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut config = test_config();
        config.jwt_expiry = -2;
        let token = AuthService::generate_token(1, "a@example.com", UserRole::Owner, &config).unwrap();
        let err = AuthService::verify_token(&token, &config).unwrap_err();
        assert!(matches!(err, ApiError::AuthError(_)));
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(AuthService::verify_token("not.a.jwt", &test_config()).is_err());
    }

    #[test]
    fn password_hash_verifies() {
        let hashed = AuthService::hash_password("correct horse").unwrap();
        assert!(AuthService::verify_password("correct horse", &hashed).unwrap());
        assert!(!AuthService::verify_password("wrong horse", &hashed).unwrap());
    }

    #[test]
    fn refresh_tokens_are_unique() {
        assert_ne!(AuthService::generate_refresh_token(), AuthService::generate_refresh_token());
    }
}
