use actix_web::{get, post, web, HttpRequest, HttpResponse};
use log::debug;

use crate::config::{AppConfig, DbPool};
use crate::errors::ApiError;
use crate::event_handlers::EventPublisher;
use crate::middleware::AuthUser;
use crate::models::{LoginRequest, RefreshRequest, RegisterRequest};
use crate::services::{AuthService, UserService};

#[post("/auth/register")]
async fn register(
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    events: web::Data<EventPublisher>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    debug!("Registration attempt for: {}", body.email);

    let response = AuthService::register(body.into_inner(), &config, &pool).await?;
    events.user_registered(&response.user).await;

    Ok(HttpResponse::Created().json(response))
}

#[post("/auth/login")]
async fn login(
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    events: web::Data<EventPublisher>,
    body: web::Json<LoginRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    debug!("Login attempt for user: {}", body.email);

    let response = AuthService::login(body.into_inner(), &config, &pool).await?;

    let ip_address = req.connection_info().realip_remote_addr().map(|s| s.to_owned());
    events.user_login(&response.user, ip_address).await;

    Ok(HttpResponse::Ok().json(response))
}

#[post("/auth/refresh")]
async fn refresh(
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    body: web::Json<RefreshRequest>,
) -> Result<HttpResponse, ApiError> {
    let response = AuthService::refresh(body.into_inner().refresh_token, &config, &pool).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[post("/auth/logout")]
async fn logout(
    user: AuthUser,
    pool: web::Data<DbPool>,
    body: web::Json<RefreshRequest>,
) -> Result<HttpResponse, ApiError> {
    AuthService::logout(body.into_inner().refresh_token, user.user_id, &pool).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/auth/me")]
async fn me(user: AuthUser, pool: web::Data<DbPool>) -> Result<HttpResponse, ApiError> {
    let profile = UserService::get_user_by_id(user.user_id, &pool).await?;
    Ok(HttpResponse::Ok().json(profile))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(register)
        .service(login)
        .service(refresh)
        .service(logout)
        .service(me);
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::api_app;
    use actix_web::{http::StatusCode, test};
    use serde_json::json;

    #[actix_web::test]
    async fn admin_cannot_self_register() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({
                "name": "Mallory",
                "email": "mallory@example.com",
                "password": "supersecret",
                "role": "admin"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn short_password_is_unprocessable() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({
                "name": "Sari",
                "email": "sari@example.com",
                "password": "short",
                "role": "renter"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_web::test]
    async fn me_requires_a_token() {
        let app = api_app!();
        let req = test::TestRequest::get().uri("/api/auth/me").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
