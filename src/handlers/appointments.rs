use actix_web::{get, post, put, web, HttpResponse};

use crate::config::DbPool;
use crate::errors::ApiError;
use crate::event_handlers::EventPublisher;
use crate::middleware::AuthUser;
use crate::models::{AppointmentQuery, BookAppointmentRequest, CancelAppointmentRequest, RescheduleRequest};
use crate::services::AppointmentService;

#[post("/appointments")]
async fn book(
    user: AuthUser,
    pool: web::Data<DbPool>,
    events: web::Data<EventPublisher>,
    body: web::Json<BookAppointmentRequest>,
) -> Result<HttpResponse, ApiError> {
    let appointment = AppointmentService::book(user, body.into_inner(), &events, &pool).await?;
    Ok(HttpResponse::Created().json(appointment))
}

#[get("/appointments/mine")]
async fn my_appointments(
    user: AuthUser,
    pool: web::Data<DbPool>,
    query: web::Query<AppointmentQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = AppointmentService::list_mine(user, query.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[get("/appointments/incoming")]
async fn incoming_appointments(
    user: AuthUser,
    pool: web::Data<DbPool>,
    query: web::Query<AppointmentQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = AppointmentService::list_incoming(user, query.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(page))
}

// The body is optional; an empty POST cancels without a reason
#[post("/appointments/{appointment_id}/cancel")]
async fn cancel(
    user: AuthUser,
    pool: web::Data<DbPool>,
    events: web::Data<EventPublisher>,
    path: web::Path<i32>,
    body: Option<web::Json<CancelAppointmentRequest>>,
) -> Result<HttpResponse, ApiError> {
    let request = body.map(|b| b.into_inner()).unwrap_or_default();
    let appointment = AppointmentService::cancel(user, path.into_inner(), request, &events, &pool).await?;
    Ok(HttpResponse::Ok().json(appointment))
}

#[put("/appointments/{appointment_id}/reschedule")]
async fn reschedule(
    user: AuthUser,
    pool: web::Data<DbPool>,
    path: web::Path<i32>,
    body: web::Json<RescheduleRequest>,
) -> Result<HttpResponse, ApiError> {
    let appointment = AppointmentService::reschedule(user, path.into_inner(), body.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(appointment))
}

#[post("/appointments/{appointment_id}/complete")]
async fn complete(
    user: AuthUser,
    pool: web::Data<DbPool>,
    events: web::Data<EventPublisher>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let appointment = AppointmentService::complete(user, path.into_inner(), &events, &pool).await?;
    Ok(HttpResponse::Ok().json(appointment))
}

#[post("/appointments/{appointment_id}/no-show")]
async fn no_show(
    user: AuthUser,
    pool: web::Data<DbPool>,
    events: web::Data<EventPublisher>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let appointment = AppointmentService::mark_no_show(user, path.into_inner(), &events, &pool).await?;
    Ok(HttpResponse::Ok().json(appointment))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(book)
        .service(my_appointments)
        .service(incoming_appointments)
        .service(cancel)
        .service(reschedule)
        .service(complete)
        .service(no_show);
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::{api_app, bearer};
    use crate::models::UserRole;
    use actix_web::{http::StatusCode, test};
    use serde_json::json;

    #[actix_web::test]
    async fn owners_cannot_book_surveys() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/appointments")
            .insert_header(("Authorization", bearer(2, UserRole::Owner)))
            .set_json(json!({ "room_id": 1, "scheduled_at": "2099-01-01T10:00:00" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn past_survey_time_is_unprocessable() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/appointments")
            .insert_header(("Authorization", bearer(3, UserRole::Renter)))
            .set_json(json!({ "room_id": 1, "scheduled_at": "2001-01-01T10:00:00" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
