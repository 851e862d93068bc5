use actix_web::{get, post, web, HttpResponse};

use crate::config::DbPool;
use crate::errors::ApiError;
use crate::middleware::AuthUser;
use crate::models::{ConversationQuery, SendMessageRequest};
use crate::services::MessageService;

#[post("/messages")]
async fn send_message(
    user: AuthUser,
    pool: web::Data<DbPool>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, ApiError> {
    let message = MessageService::send(user.user_id, body.into_inner(), &pool).await?;
    Ok(HttpResponse::Created().json(message))
}

#[get("/messages/conversations")]
async fn conversations(user: AuthUser, pool: web::Data<DbPool>) -> Result<HttpResponse, ApiError> {
    let list = MessageService::conversations(user.user_id, &pool).await?;
    Ok(HttpResponse::Ok().json(list))
}

#[get("/messages/unread-count")]
async fn unread_count(user: AuthUser, pool: web::Data<DbPool>) -> Result<HttpResponse, ApiError> {
    let count = MessageService::unread_count(user.user_id, &pool).await?;
    Ok(HttpResponse::Ok().json(count))
}

// Clients poll this with after_id set to the last message they hold
#[get("/messages/with/{partner_id}")]
async fn conversation(
    user: AuthUser,
    pool: web::Data<DbPool>,
    path: web::Path<i32>,
    query: web::Query<ConversationQuery>,
) -> Result<HttpResponse, ApiError> {
    let messages = MessageService::conversation(user.user_id, path.into_inner(), query.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(messages))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(send_message)
        .service(conversations)
        .service(unread_count)
        .service(conversation);
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::{api_app, bearer};
    use crate::models::UserRole;
    use actix_web::{http::StatusCode, test};
    use serde_json::json;

    #[actix_web::test]
    async fn messaging_yourself_is_rejected() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/messages")
            .insert_header(("Authorization", bearer(7, UserRole::Renter)))
            .set_json(json!({ "receiver_id": 7, "body": "hello me" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
