use actix_web::{get, post, web, HttpResponse};

use crate::config::DbPool;
use crate::errors::ApiError;
use crate::middleware::AuthUser;
use crate::models::PageQuery;
use crate::services::BookmarkService;

#[post("/rooms/{room_id:\\d+}/bookmark")]
async fn toggle_bookmark(user: AuthUser, pool: web::Data<DbPool>, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let state = BookmarkService::toggle(user.user_id, path.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(state))
}

#[get("/rooms/{room_id:\\d+}/bookmark")]
async fn bookmark_status(user: AuthUser, pool: web::Data<DbPool>, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let state = BookmarkService::status(user.user_id, path.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(state))
}

#[get("/bookmarks")]
async fn my_bookmarks(user: AuthUser, pool: web::Data<DbPool>, query: web::Query<PageQuery>) -> Result<HttpResponse, ApiError> {
    let page = BookmarkService::list_mine(user.user_id, query.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(page))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(toggle_bookmark)
        .service(bookmark_status)
        .service(my_bookmarks);
}
