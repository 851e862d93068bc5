use actix_web::{get, put, web, HttpResponse};

use crate::config::DbPool;
use crate::errors::ApiError;
use crate::middleware::AuthUser;
use crate::models::{ChangePasswordRequest, SetActiveRequest, UpdateProfileRequest, UserListQuery};
use crate::services::{AuthService, UserService};

#[put("/users/me")]
async fn update_profile(
    user: AuthUser,
    pool: web::Data<DbPool>,
    body: web::Json<UpdateProfileRequest>,
) -> Result<HttpResponse, ApiError> {
    let updated = UserService::update_profile(user.user_id, body.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[put("/users/me/password")]
async fn change_password(
    user: AuthUser,
    pool: web::Data<DbPool>,
    body: web::Json<ChangePasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    AuthService::change_password(user.user_id, body.into_inner(), &pool).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/admin/users")]
async fn list_users(
    user: AuthUser,
    pool: web::Data<DbPool>,
    query: web::Query<UserListQuery>,
) -> Result<HttpResponse, ApiError> {
    user.require_admin()?;
    let page = UserService::list_users(query.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[put("/admin/users/{user_id}/active")]
async fn set_user_active(
    user: AuthUser,
    pool: web::Data<DbPool>,
    path: web::Path<i32>,
    body: web::Json<SetActiveRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require_admin()?;
    let updated = UserService::set_active(user.user_id, path.into_inner(), body.is_active, &pool).await?;
    Ok(HttpResponse::Ok().json(updated))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(update_profile)
        .service(change_password)
        .service(list_users)
        .service(set_user_active);
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::{api_app, bearer};
    use crate::models::UserRole;
    use actix_web::{http::StatusCode, test};

    #[actix_web::test]
    async fn user_listing_is_admin_only() {
        let app = api_app!();
        let req = test::TestRequest::get()
            .uri("/api/admin/users")
            .insert_header(("Authorization", bearer(3, UserRole::Owner)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn admin_cannot_deactivate_self() {
        let app = api_app!();
        let req = test::TestRequest::put()
            .uri("/api/admin/users/1/active")
            .insert_header(("Authorization", bearer(1, UserRole::Admin)))
            .set_json(serde_json::json!({ "is_active": false }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
