use actix_web::{get, post, web, HttpResponse};

use crate::config::{AppConfig, DbPool};
use crate::errors::ApiError;
use crate::middleware::AuthUser;
use crate::models::DisbursementListQuery;
use crate::services::DisbursementService;

#[get("/disbursements/mine")]
async fn my_disbursements(
    user: AuthUser,
    pool: web::Data<DbPool>,
    query: web::Query<DisbursementListQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = DisbursementService::list_mine(user, query.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[get("/admin/disbursements")]
async fn all_disbursements(
    user: AuthUser,
    pool: web::Data<DbPool>,
    query: web::Query<DisbursementListQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = DisbursementService::list(user, query.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[post("/admin/disbursements/{disbursement_id}/retry")]
async fn retry_disbursement(
    user: AuthUser,
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let disbursement = DisbursementService::retry(user, path.into_inner(), &config, &pool).await?;
    Ok(HttpResponse::Ok().json(disbursement))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(my_disbursements)
        .service(all_disbursements)
        .service(retry_disbursement);
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::{api_app, bearer};
    use crate::models::UserRole;
    use actix_web::{http::StatusCode, test};

    #[actix_web::test]
    async fn retry_is_admin_only() {
        let app = api_app!();
        let req = test::TestRequest::post()
            .uri("/api/admin/disbursements/4/retry")
            .insert_header(("Authorization", bearer(2, UserRole::Owner)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
