use actix_web::{delete, get, post, web, HttpResponse};

use crate::config::DbPool;
use crate::errors::ApiError;
use crate::middleware::AuthUser;
use crate::models::{CreateReviewRequest, PageQuery};
use crate::services::ReviewService;

#[post("/reviews")]
async fn create_review(
    user: AuthUser,
    pool: web::Data<DbPool>,
    body: web::Json<CreateReviewRequest>,
) -> Result<HttpResponse, ApiError> {
    let review = ReviewService::create(user, body.into_inner(), &pool).await?;
    Ok(HttpResponse::Created().json(review))
}

#[get("/rooms/{room_id:\\d+}/reviews")]
async fn room_reviews(pool: web::Data<DbPool>, path: web::Path<i32>, query: web::Query<PageQuery>) -> Result<HttpResponse, ApiError> {
    let page = ReviewService::list_for_room(path.into_inner(), query.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[get("/rooms/{room_id:\\d+}/rating")]
async fn room_rating(pool: web::Data<DbPool>, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let summary = ReviewService::summary(path.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[delete("/reviews/{review_id}")]
async fn delete_review(user: AuthUser, pool: web::Data<DbPool>, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    ReviewService::delete(user, path.into_inner(), &pool).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(create_review)
        .service(room_reviews)
        .service(room_rating)
        .service(delete_review);
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::{api_app, bearer};
    use crate::models::UserRole;
    use actix_web::{http::StatusCode, test};
    use serde_json::json;

    #[actix_web::test]
    async fn rating_out_of_range_is_unprocessable() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/reviews")
            .insert_header(("Authorization", bearer(3, UserRole::Renter)))
            .set_json(json!({ "payment_id": 1, "rating": 6.0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
