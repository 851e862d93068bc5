use actix_web::{get, post, put, web, HttpResponse};

use crate::config::DbPool;
use crate::errors::ApiError;
use crate::event_handlers::EventPublisher;
use crate::middleware::AuthUser;
use crate::models::{CreateReportRequest, ReportListQuery, RespondReportRequest, UpdateReportStatusRequest};
use crate::services::ReportService;

#[post("/reports")]
async fn create_report(
    user: AuthUser,
    pool: web::Data<DbPool>,
    events: web::Data<EventPublisher>,
    body: web::Json<CreateReportRequest>,
) -> Result<HttpResponse, ApiError> {
    let report = ReportService::create(user, body.into_inner(), &events, &pool).await?;
    Ok(HttpResponse::Created().json(report))
}

#[get("/reports/mine")]
async fn my_reports(user: AuthUser, pool: web::Data<DbPool>, query: web::Query<ReportListQuery>) -> Result<HttpResponse, ApiError> {
    let page = ReportService::list_mine(user, query.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[get("/reports/my-rooms")]
async fn reports_for_my_rooms(
    user: AuthUser,
    pool: web::Data<DbPool>,
    query: web::Query<ReportListQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = ReportService::list_for_my_rooms(user, query.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[post("/reports/{report_id}/respond")]
async fn respond(
    user: AuthUser,
    pool: web::Data<DbPool>,
    events: web::Data<EventPublisher>,
    path: web::Path<i32>,
    body: web::Json<RespondReportRequest>,
) -> Result<HttpResponse, ApiError> {
    let report = ReportService::respond(user, path.into_inner(), body.into_inner(), &events, &pool).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[get("/admin/reports")]
async fn all_reports(user: AuthUser, pool: web::Data<DbPool>, query: web::Query<ReportListQuery>) -> Result<HttpResponse, ApiError> {
    let page = ReportService::list_all(user, query.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[put("/admin/reports/{report_id}/status")]
async fn update_status(
    user: AuthUser,
    pool: web::Data<DbPool>,
    events: web::Data<EventPublisher>,
    path: web::Path<i32>,
    body: web::Json<UpdateReportStatusRequest>,
) -> Result<HttpResponse, ApiError> {
    let report = ReportService::update_status(user, path.into_inner(), body.into_inner(), &events, &pool).await?;
    Ok(HttpResponse::Ok().json(report))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(create_report)
        .service(my_reports)
        .service(reports_for_my_rooms)
        .service(respond)
        .service(all_reports)
        .service(update_status);
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::{api_app, bearer};
    use crate::models::UserRole;
    use actix_web::{http::StatusCode, test};
    use serde_json::json;

    #[actix_web::test]
    async fn short_description_is_unprocessable() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/reports")
            .insert_header(("Authorization", bearer(3, UserRole::Renter)))
            .set_json(json!({ "room_id": 1, "report_type": "fraud", "description": "scam" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_web::test]
    async fn unknown_report_type_is_a_bad_request() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/reports")
            .insert_header(("Authorization", bearer(3, UserRole::Renter)))
            .set_json(json!({ "room_id": 1, "report_type": "noise", "description": "Very loud neighbours all night" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn status_changes_are_admin_only() {
        let app = api_app!();
        let req = test::TestRequest::put()
            .uri("/api/admin/reports/1/status")
            .insert_header(("Authorization", bearer(2, UserRole::Owner)))
            .set_json(json!({ "status": "resolved" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
