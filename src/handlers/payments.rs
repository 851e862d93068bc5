use actix_web::{get, post, web, HttpRequest, HttpResponse};
use log::warn;

use crate::config::{AppConfig, DbPool};
use crate::errors::ApiError;
use crate::event_handlers::EventPublisher;
use crate::gateway::PaymentGateway;
use crate::middleware::AuthUser;
use crate::models::{CheckoutRequest, GatewayCallback, PaymentListQuery};
use crate::services::PaymentService;

pub const CALLBACK_TOKEN_HEADER: &str = "X-Callback-Token";

fn verify_callback_token(req: &HttpRequest, config: &AppConfig) -> Result<(), ApiError> {
    let presented = req
        .headers()
        .get(CALLBACK_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok());

    match presented {
        Some(token) if token == config.payment_callback_token => Ok(()),
        _ => {
            warn!("Rejected payment callback with missing or wrong token");
            Err(ApiError::AuthError("Invalid callback token".to_string()))
        }
    }
}

#[post("/payments/checkout")]
async fn checkout(
    user: AuthUser,
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    gateway: web::Data<PaymentGateway>,
    body: web::Json<CheckoutRequest>,
) -> Result<HttpResponse, ApiError> {
    let response = PaymentService::checkout(user, body.into_inner(), &config, &gateway, &pool).await?;
    Ok(HttpResponse::Created().json(response))
}

#[post("/payments/callback")]
async fn gateway_callback(
    req: HttpRequest,
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    events: web::Data<EventPublisher>,
    body: web::Json<GatewayCallback>,
) -> Result<HttpResponse, ApiError> {
    verify_callback_token(&req, &config)?;
    let result = PaymentService::gateway_callback(body.into_inner(), &events, &pool).await?;
    Ok(HttpResponse::Ok().json(result))
}

#[get("/payments/mine")]
async fn my_payments(
    user: AuthUser,
    pool: web::Data<DbPool>,
    query: web::Query<PaymentListQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = PaymentService::list_mine(user, query.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[get("/payments/received")]
async fn received_payments(
    user: AuthUser,
    pool: web::Data<DbPool>,
    query: web::Query<PaymentListQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = PaymentService::list_received(user, query.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[get("/payments/{payment_id:\\d+}")]
async fn show_payment(user: AuthUser, pool: web::Data<DbPool>, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let payment = PaymentService::show(user, path.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(payment))
}

#[get("/admin/payments")]
async fn all_payments(
    user: AuthUser,
    pool: web::Data<DbPool>,
    query: web::Query<PaymentListQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = PaymentService::list_all(user, query.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(page))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(checkout)
        .service(gateway_callback)
        .service(my_payments)
        .service(received_payments)
        .service(show_payment)
        .service(all_payments);
}

#[cfg(test)]
mod tests {
    use super::CALLBACK_TOKEN_HEADER;
    use crate::handlers::test_support::{api_app, bearer};
    use crate::models::UserRole;
    use actix_web::{http::StatusCode, test};
    use serde_json::json;

    #[actix_web::test]
    async fn callback_without_token_is_unauthorized() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/payments/callback")
            .set_json(json!({ "reference": "INV-1", "status": "PAID" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn callback_with_wrong_token_is_unauthorized() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/payments/callback")
            .insert_header((CALLBACK_TOKEN_HEADER, "guess"))
            .set_json(json!({ "reference": "INV-1", "status": "PAID" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn unknown_callback_status_is_a_bad_request() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/payments/callback")
            .insert_header((CALLBACK_TOKEN_HEADER, "callback-secret"))
            .set_json(json!({ "reference": "INV-1", "status": "REFUNDED" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn checkout_months_are_bounded() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/payments/checkout")
            .insert_header(("Authorization", bearer(3, UserRole::Renter)))
            .set_json(json!({ "room_id": 1, "months": 24 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_web::test]
    async fn payment_listing_for_admins_only() {
        let app = api_app!();
        let req = test::TestRequest::get()
            .uri("/api/admin/payments")
            .insert_header(("Authorization", bearer(3, UserRole::Renter)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
