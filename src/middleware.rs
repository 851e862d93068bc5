use actix_web::dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, Error, FromRequest, HttpRequest};
use log::{info, warn, error};
use std::future::{ready, Ready, Future};
use std::pin::Pin;
use std::rc::Rc;

use crate::config::AppConfig;
use crate::errors::ApiError;
use crate::models::UserRole;
use crate::services::AuthService;

pub const BEARER_PREFIX: &str = "Bearer ";

// Logger middleware to log all requests and responses
pub struct RequestLogger;

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestLoggerMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + 'static>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let method = req.method().clone();
        let path = req.path().to_owned();
        let client_ip = req.connection_info().realip_remote_addr()
            .map(|s| s.to_owned())
            .unwrap_or_else(|| String::from("unknown"));

        info!(
            "→ Request: \x1B[1;34m{} {}\x1B[0m from IP: {}",
            method, path, client_ip
        );

        let service = self.service.clone();

        Box::pin(async move {
            let start = std::time::Instant::now();
            let res = service.call(req).await?;
            let elapsed = start.elapsed();

            let status = res.status();

            if status.is_success() {
                info!(
                    "← Response: \x1B[1;32m{}\x1B[0m for {} {} completed in {:.2?}",
                    status, method, path, elapsed
                );
            } else if status.is_client_error() {
                warn!(
                    "← Response: \x1B[1;33m{}\x1B[0m for {} {} completed in {:.2?}",
                    status, method, path, elapsed
                );
            } else {
                error!(
                    "← Response: \x1B[1;31m{}\x1B[0m for {} {} completed in {:.2?}",
                    status, method, path, elapsed
                );
            }

            Ok(res)
        })
    }
}

/// The caller, as identified by a valid bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i32,
    pub email: String,
    pub role: UserRole,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn require_role(&self, role: UserRole) -> Result<(), ApiError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!("This action requires the {} role", role)))
        }
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        self.require_role(UserRole::Admin)
    }
}

fn authenticate(req: &HttpRequest) -> Result<AuthUser, ApiError> {
    let config = req
        .app_data::<web::Data<AppConfig>>()
        .ok_or_else(|| ApiError::InternalError("AppConfig is not registered".to_string()))?;

    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::AuthError("Authentication required".to_string()))?;

    let token = header
        .strip_prefix(BEARER_PREFIX)
        .ok_or_else(|| ApiError::AuthError("Authorization header must use the Bearer scheme".to_string()))?;

    let claims = AuthService::verify_token(token, config)?;

    Ok(AuthUser {
        user_id: claims.user_id,
        email: claims.email,
        role: claims.role,
    })
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App, HttpResponse, http::StatusCode};

    async fn whoami(user: AuthUser) -> HttpResponse {
        HttpResponse::Ok().json(serde_json::json!({ "user_id": user.user_id, "role": user.role }))
    }

    async fn admin_only(user: AuthUser) -> Result<HttpResponse, ApiError> {
        user.require_admin()?;
        Ok(HttpResponse::Ok().finish())
    }

    macro_rules! app {
        ($config:expr) => {
            test::init_service(
                App::new()
                    .wrap(RequestLogger)
                    .app_data(web::Data::new($config))
                    .route("/whoami", web::get().to(whoami))
                    .route("/admin", web::get().to(admin_only)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn missing_token_is_unauthorized() {
        let app = app!(crate::config::test_config());
        let req = test::TestRequest::get().uri("/whoami").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn wrong_scheme_is_unauthorized() {
        let app = app!(crate::config::test_config());
        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header((AUTHORIZATION, "Basic abc"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn valid_token_identifies_user() {
        let config = crate::config::test_config();
        let token = AuthService::generate_token(9, "owner@example.com", UserRole::Owner, &config).unwrap();
        let app = app!(config);
        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header((AUTHORIZATION, format!("Bearer {}", token)))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["user_id"], 9);
        assert_eq!(body["role"], "owner");
    }

    #[actix_web::test]
    async fn token_signed_with_other_secret_is_rejected() {
        let mut other = crate::config::test_config();
        other.jwt_secret = "a-completely-different-secret-value".into();
        let token = AuthService::generate_token(9, "owner@example.com", UserRole::Owner, &other).unwrap();

        let app = app!(crate::config::test_config());
        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header((AUTHORIZATION, format!("Bearer {}", token)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn non_admin_is_forbidden() {
        let config = crate::config::test_config();
        let token = AuthService::generate_token(3, "renter@example.com", UserRole::Renter, &config).unwrap();
        let app = app!(config);
        let req = test::TestRequest::get()
            .uri("/admin")
            .insert_header((AUTHORIZATION, format!("Bearer {}", token)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
