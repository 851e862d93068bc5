use actix_web::{delete, get, post, put, web, HttpResponse};

use crate::config::DbPool;
use crate::errors::ApiError;
use crate::middleware::AuthUser;
use crate::models::CreatePayoutMethodRequest;
use crate::services::PayoutService;

#[get("/payout-methods")]
async fn list_methods(user: AuthUser, pool: web::Data<DbPool>) -> Result<HttpResponse, ApiError> {
    let methods = PayoutService::list(user, &pool).await?;
    Ok(HttpResponse::Ok().json(methods))
}

#[post("/payout-methods")]
async fn create_method(
    user: AuthUser,
    pool: web::Data<DbPool>,
    body: web::Json<CreatePayoutMethodRequest>,
) -> Result<HttpResponse, ApiError> {
    let method = PayoutService::create(user, body.into_inner(), &pool).await?;
    Ok(HttpResponse::Created().json(method))
}

#[put("/payout-methods/{method_id}/default")]
async fn set_default(user: AuthUser, pool: web::Data<DbPool>, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let method = PayoutService::set_default(user, path.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(method))
}

#[delete("/payout-methods/{method_id}")]
async fn delete_method(user: AuthUser, pool: web::Data<DbPool>, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    PayoutService::delete(user, path.into_inner(), &pool).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_methods)
        .service(create_method)
        .service(set_default)
        .service(delete_method);
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::{api_app, bearer};
    use crate::models::UserRole;
    use actix_web::{http::StatusCode, test};
    use serde_json::json;

    #[actix_web::test]
    async fn account_number_must_be_digits() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/payout-methods")
            .insert_header(("Authorization", bearer(2, UserRole::Owner)))
            .set_json(json!({
                "method_type": "bank_transfer",
                "provider_code": "BCA",
                "account_number": "12AB-5678",
                "account_holder": "Budi Santoso"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_web::test]
    async fn renters_have_no_payout_methods() {
        let app = api_app!();
        let req = test::TestRequest::get()
            .uri("/api/payout-methods")
            .insert_header(("Authorization", bearer(3, UserRole::Renter)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
