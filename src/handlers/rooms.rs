use actix_web::{delete, get, post, put, web, HttpResponse};

use crate::config::DbPool;
use crate::errors::ApiError;
use crate::middleware::AuthUser;
use crate::models::{
    AddImageRequest, CreateRoomRequest, NewFacility, PageQuery, RoomSearchQuery, SetFacilitiesRequest,
    UpdateRoomRequest,
};
use crate::services::RoomService;

#[get("/rooms")]
async fn search_rooms(pool: web::Data<DbPool>, query: web::Query<RoomSearchQuery>) -> Result<HttpResponse, ApiError> {
    let page = RoomService::search(query.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[get("/rooms/mine")]
async fn my_rooms(user: AuthUser, pool: web::Data<DbPool>, query: web::Query<PageQuery>) -> Result<HttpResponse, ApiError> {
    let page = RoomService::list_mine(user, query.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[get("/rooms/{room_id:\\d+}")]
async fn show_room(pool: web::Data<DbPool>, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let room = RoomService::show(path.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(room))
}

#[post("/rooms")]
async fn create_room(
    user: AuthUser,
    pool: web::Data<DbPool>,
    body: web::Json<CreateRoomRequest>,
) -> Result<HttpResponse, ApiError> {
    let room = RoomService::create(user, body.into_inner(), &pool).await?;
    Ok(HttpResponse::Created().json(room))
}

#[put("/rooms/{room_id:\\d+}")]
async fn update_room(
    user: AuthUser,
    pool: web::Data<DbPool>,
    path: web::Path<i32>,
    body: web::Json<UpdateRoomRequest>,
) -> Result<HttpResponse, ApiError> {
    let room = RoomService::update(user, path.into_inner(), body.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(room))
}

#[delete("/rooms/{room_id:\\d+}")]
async fn delete_room(user: AuthUser, pool: web::Data<DbPool>, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    RoomService::delete(user, path.into_inner(), &pool).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/rooms/{room_id:\\d+}/images")]
async fn add_image(
    user: AuthUser,
    pool: web::Data<DbPool>,
    path: web::Path<i32>,
    body: web::Json<AddImageRequest>,
) -> Result<HttpResponse, ApiError> {
    let image = RoomService::add_image(user, path.into_inner(), body.into_inner(), &pool).await?;
    Ok(HttpResponse::Created().json(image))
}

#[delete("/rooms/{room_id:\\d+}/images/{image_id:\\d+}")]
async fn delete_image(
    user: AuthUser,
    pool: web::Data<DbPool>,
    path: web::Path<(i32, i32)>,
) -> Result<HttpResponse, ApiError> {
    let (room_id, image_id) = path.into_inner();
    RoomService::delete_image(user, room_id, image_id, &pool).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[put("/rooms/{room_id:\\d+}/images/{image_id:\\d+}/primary")]
async fn set_primary_image(
    user: AuthUser,
    pool: web::Data<DbPool>,
    path: web::Path<(i32, i32)>,
) -> Result<HttpResponse, ApiError> {
    let (room_id, image_id) = path.into_inner();
    let image = RoomService::set_primary_image(user, room_id, image_id, &pool).await?;
    Ok(HttpResponse::Ok().json(image))
}

#[put("/rooms/{room_id:\\d+}/facilities")]
async fn set_room_facilities(
    user: AuthUser,
    pool: web::Data<DbPool>,
    path: web::Path<i32>,
    body: web::Json<SetFacilitiesRequest>,
) -> Result<HttpResponse, ApiError> {
    let facilities = RoomService::set_room_facilities(user, path.into_inner(), body.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(facilities))
}

#[get("/facilities")]
async fn list_facilities(pool: web::Data<DbPool>) -> Result<HttpResponse, ApiError> {
    let facilities = RoomService::list_facilities(&pool).await?;
    Ok(HttpResponse::Ok().json(facilities))
}

#[post("/facilities")]
async fn create_facility(
    user: AuthUser,
    pool: web::Data<DbPool>,
    body: web::Json<NewFacility>,
) -> Result<HttpResponse, ApiError> {
    let facility = RoomService::create_facility(user, body.into_inner(), &pool).await?;
    Ok(HttpResponse::Created().json(facility))
}

#[delete("/facilities/{facility_id}")]
async fn delete_facility(user: AuthUser, pool: web::Data<DbPool>, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    RoomService::delete_facility(user, path.into_inner(), &pool).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(search_rooms)
        .service(my_rooms)
        .service(show_room)
        .service(create_room)
        .service(update_room)
        .service(delete_room)
        .service(add_image)
        .service(delete_image)
        .service(set_primary_image)
        .service(set_room_facilities)
        .service(list_facilities)
        .service(create_facility)
        .service(delete_facility);
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::{api_app, bearer};
    use crate::models::UserRole;
    use actix_web::{http::StatusCode, test};
    use serde_json::json;

    #[actix_web::test]
    async fn inverted_price_range_is_unprocessable() {
        let app = api_app!();
        let req = test::TestRequest::get()
            .uri("/api/rooms?min_price=2000000&max_price=1000000")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_web::test]
    async fn unknown_sort_is_a_bad_request() {
        let app = api_app!();
        let req = test::TestRequest::get().uri("/api/rooms?sort=cheapest").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn renters_cannot_list_rooms() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/rooms")
            .insert_header(("Authorization", bearer(5, UserRole::Renter)))
            .set_json(json!({
                "title": "Room with a view",
                "address": "Jl. Dago 100",
                "city": "Bandung",
                "price_per_month": "1500000"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn facility_creation_is_admin_only() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/facilities")
            .insert_header(("Authorization", bearer(5, UserRole::Owner)))
            .set_json(json!({ "name": "Sauna" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
