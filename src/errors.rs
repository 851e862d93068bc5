use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use std::fmt;
use std::error::Error as StdError;
use serde_json::json;
use log::{warn, error, debug};

use crate::gateway::GatewayError;

// Custom error handling
#[derive(Debug)]
pub enum ApiError {
    DatabaseError(String),
    ValidationError(String),
    BadRequest(String),
    AuthError(String),
    Forbidden(String),
    NotFoundError(String),
    Conflict(String),
    InternalError(String),
}

impl StdError for ApiError {}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::AuthError(msg) => write!(f, "Authentication error: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFoundError(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal server error: {}", msg),
        }
    }
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::ValidationError(msg.into())
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFoundError(format!("{} not found", what))
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError::Forbidden(msg.into())
    }

    /// Replaces the generic unique-violation message with one that names the rule.
    pub fn with_conflict_message(self, msg: &str) -> Self {
        match self {
            ApiError::Conflict(_) => ApiError::Conflict(msg.to_string()),
            other => other,
        }
    }

    /// Message returned to the client. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            ApiError::DatabaseError(_) => "A database error occurred".to_string(),
            ApiError::InternalError(_) => "An internal error occurred".to_string(),
            ApiError::ValidationError(msg)
            | ApiError::BadRequest(msg)
            | ApiError::AuthError(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFoundError(msg)
            | ApiError::Conflict(msg) => msg.clone(),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        match self {
            ApiError::DatabaseError(msg) => {
                error!("\x1B[1;31mDATABASE ERROR:\x1B[0m {}", msg);
            },
            ApiError::InternalError(msg) => {
                error!("\x1B[1;31mINTERNAL SERVER ERROR:\x1B[0m {}", msg);
            },
            ApiError::ValidationError(msg) | ApiError::BadRequest(msg) => {
                warn!("\x1B[1;33mVALIDATION ERROR:\x1B[0m {}", msg);
            },
            ApiError::AuthError(msg) | ApiError::Forbidden(msg) => {
                warn!("\x1B[1;33mAUTHENTICATION ERROR:\x1B[0m {}", msg);
            },
            ApiError::NotFoundError(msg) | ApiError::Conflict(msg) => {
                debug!("\x1B[1;36mREQUEST ERROR:\x1B[0m {}", msg);
            },
        }

        HttpResponse::build(self.status_code()).json(json!({ "error": self.public_message() }))
    }

    fn status_code(&self) -> StatusCode {
        match *self {
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::AuthError(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFoundError(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DieselError> for ApiError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::NotFound => ApiError::NotFoundError("Record not found".to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                debug!("Unique violation: {}", info.message());
                ApiError::Conflict("Record already exists".to_string())
            },
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                debug!("Foreign key violation: {}", info.message());
                ApiError::ValidationError("Referenced record does not exist".to_string())
            },
            DieselError::DatabaseError(DatabaseErrorKind::CheckViolation, info) => {
                debug!("Check violation: {}", info.message());
                ApiError::ValidationError("Value violates a data constraint".to_string())
            },
            other => ApiError::DatabaseError(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for ApiError {
    fn from(e: r2d2::Error) -> Self {
        ApiError::DatabaseError(format!("Failed to get database connection: {}", e))
    }
}

impl From<actix_web::error::BlockingError> for ApiError {
    fn from(e: actix_web::error::BlockingError) -> Self {
        ApiError::InternalError(format!("Database operation error: {}", e))
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{} is invalid", field))
                })
            })
            .collect();
        messages.sort();
        ApiError::ValidationError(messages.join(", "))
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Rejected(msg) => ApiError::BadRequest(format!("Payment gateway rejected the request: {}", msg)),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(ApiError::validation("x").status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ApiError::BadRequest("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::AuthError("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::forbidden("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::not_found("Room").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(ApiError::DatabaseError("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn diesel_not_found_maps_to_404() {
        let err: ApiError = DieselError::NotFound.into();
        assert!(matches!(err, ApiError::NotFoundError(_)));
    }

    #[test]
    fn conflict_message_only_rewrites_conflicts() {
        let err = ApiError::Conflict("Record already exists".into()).with_conflict_message("Only one default");
        assert!(matches!(err, ApiError::Conflict(ref m) if m == "Only one default"));
        let err = ApiError::not_found("Room").with_conflict_message("Only one default");
        assert!(matches!(err, ApiError::NotFoundError(_)));
    }

    #[actix_web::test]
    async fn internal_details_are_not_leaked() {
        let err = ApiError::DatabaseError("relation \"rooms\" does not exist".into());
        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "A database error occurred");
    }

    #[actix_web::test]
    async fn client_errors_keep_their_message() {
        let err = ApiError::not_found("Room");
        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Room not found");
    }
}
