use actix_web::{get, web, HttpResponse, Responder};
use serde_json::json;

use crate::errors::ApiError;

pub mod auth;
pub mod users;
pub mod rooms;
pub mod bookmarks;
pub mod appointments;
pub mod messages;
pub mod payouts;
pub mod payments;
pub mod disbursements;
pub mod reviews;
pub mod reports;

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

// Malformed bodies, query strings and path segments come back in the same JSON error shape
fn extractor_configs(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        ApiError::BadRequest(format!("Invalid request body: {}", err)).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        ApiError::BadRequest(format!("Invalid query string: {}", err)).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| {
        ApiError::BadRequest(format!("Invalid path: {}", err)).into()
    }));
}

/// Registers every API route. Mounted under `/api`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    extractor_configs(cfg);
    cfg.service(health_check);
    auth::configure(cfg);
    users::configure(cfg);
    rooms::configure(cfg);
    bookmarks::configure(cfg);
    appointments::configure(cfg);
    messages::configure(cfg);
    payouts::configure(cfg);
    payments::configure(cfg);
    disbursements::configure(cfg);
    reviews::configure(cfg);
    reports::configure(cfg);
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use diesel::pg::PgConnection;
    use diesel::r2d2::{ConnectionManager, Pool};

    use crate::config::{test_config, DbPool};
    use crate::event_handlers::EventPublisher;
    use crate::gateway::PaymentGateway;
    use crate::kafka::{DummyKafkaProducer, KafkaProducer};
    use crate::models::UserRole;
    use crate::services::AuthService;

    /// A pool that never connects; only for requests rejected before touching the database.
    pub fn idle_pool() -> DbPool {
        let manager = ConnectionManager::<PgConnection>::new("postgres://127.0.0.1:1/unused");
        Pool::builder().max_size(1).min_idle(Some(0)).build_unchecked(manager)
    }

    pub fn publisher() -> EventPublisher {
        EventPublisher::new(Arc::new(KafkaProducer::Dummy(DummyKafkaProducer::new())))
    }

    pub fn gateway() -> PaymentGateway {
        PaymentGateway::from_config(&test_config())
    }

    pub fn bearer(user_id: i32, role: UserRole) -> String {
        let token = AuthService::generate_token(user_id, "someone@example.com", role, &test_config())
            .expect("token");
        format!("Bearer {}", token)
    }

    macro_rules! api_app {
        () => {
            actix_web::test::init_service(
                actix_web::App::new()
                    .app_data(actix_web::web::Data::new($crate::config::test_config()))
                    .app_data(actix_web::web::Data::new($crate::handlers::test_support::idle_pool()))
                    .app_data(actix_web::web::Data::new($crate::handlers::test_support::publisher()))
                    .app_data(actix_web::web::Data::new($crate::handlers::test_support::gateway()))
                    .service(actix_web::web::scope("/api").configure($crate::handlers::configure)),
            )
            .await
        };
    }
    pub(crate) use api_app;
}

#[cfg(test)]
mod tests {
    use super::test_support::api_app;
    use actix_web::test;

    #[actix_web::test]
    async fn health_reports_version() {
        let app = api_app!();
        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert!(body["timestamp"].is_string());
    }

    #[actix_web::test]
    async fn malformed_json_is_a_bad_request() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap_or_default().starts_with("Invalid request body"));
    }
}
