use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use diesel::prelude::*;
use validator::Validate;

use super::{trim_opt, Checked};

db_enum!(UserRole {
    Admin => "admin",
    Owner => "owner",
    Renter => "renter",
});

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub user_id: i32,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub phone_number: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub profile_image: Option<String>,
    pub last_login: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::users)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub phone_number: Option<String>,
    pub role: String,
}

#[derive(AsChangeset, Debug, Default)]
#[diesel(table_name = crate::schema::users)]
pub struct UserChanges {
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub profile_image: Option<String>,
    pub updated_at: Option<NaiveDateTime>,
}

/// What other users get to see about someone.
#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::users)]
pub struct PublicUser {
    pub user_id: i32,
    pub name: String,
    pub profile_image: Option<String>,
}

#[derive(Queryable, Serialize, Debug)]
pub struct RefreshToken {
    pub token_id: i32,
    pub user_id: i32,
    pub token: String,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::refresh_token)]
pub struct NewRefreshToken {
    pub user_id: i32,
    pub token: String,
    pub expires_at: NaiveDateTime,
}

// DTOs
#[derive(Deserialize, Validate, Debug)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 120, message = "Name must be between 1 and 120 characters"))]
    pub name: String,
    #[validate(email(message = "Email address is invalid"))]
    pub email: String,
    #[validate(length(min = 8, max = 72, message = "Password must be between 8 and 72 characters"))]
    pub password: String,
    #[validate(length(max = 50, message = "Phone number is too long"))]
    pub phone_number: Option<String>,
    pub role: UserRole,
}

impl Checked for RegisterRequest {
    fn trimmed(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.email = self.email.trim().to_string();
        self.phone_number = trim_opt(self.phone_number);
        self
    }
}

#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Debug)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Serialize, Debug)]
pub struct AuthResponse {
    pub token: String,
    pub refresh_token: String,
    pub user: User,
}

#[derive(Deserialize, Validate, Debug)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 120, message = "Name must be between 1 and 120 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 50, message = "Phone number is too long"))]
    pub phone_number: Option<String>,
    #[validate(url(message = "Profile image must be a URL"))]
    pub profile_image: Option<String>,
}

impl Checked for UpdateProfileRequest {
    fn trimmed(mut self) -> Self {
        self.name = trim_opt(self.name);
        self.phone_number = trim_opt(self.phone_number);
        self.profile_image = trim_opt(self.profile_image);
        self
    }
}

#[derive(Deserialize, Validate, Debug)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    #[validate(length(min = 8, max = 72, message = "Password must be between 8 and 72 characters"))]
    pub new_password: String,
}

// Passwords are taken as typed.
impl Checked for ChangePasswordRequest {}

#[derive(Deserialize, Debug)]
pub struct UserListQuery {
    pub role: Option<UserRole>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Deserialize, Debug)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Claims {
    pub sub: String,      // Subject (user_id)
    pub exp: usize,       // Expiration time
    pub iat: usize,       // Issued at
    pub user_id: i32,
    pub email: String,
    pub role: UserRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            name: "Sari".to_string(),
            email: email.to_string(),
            password: password.to_string(),
            phone_number: None,
            role: UserRole::Renter,
        }
    }

    #[test]
    fn register_request_validation() {
        assert!(register("sari@example.com", "longenough").validate().is_ok());
        assert!(register("not-an-email", "longenough").validate().is_err());
        assert!(register("sari@example.com", "short").validate().is_err());
    }

    #[test]
    fn whitespace_name_fails_once_trimmed() {
        let mut request = register("  sari@example.com ", "longenough");
        request.name = "   ".to_string();
        assert!(request.checked().is_err());

        let checked = register("  sari@example.com ", "longenough").checked().unwrap();
        assert_eq!(checked.email, "sari@example.com");
    }

    #[test]
    fn blank_profile_name_is_rejected() {
        let request = UpdateProfileRequest { name: Some("  ".to_string()), phone_number: None, profile_image: None };
        assert!(request.checked().is_err());
    }

    #[test]
    fn role_round_trips_through_text() {
        for role in UserRole::ALL {
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), *role);
        }
        assert!("superuser".parse::<UserRole>().is_err());
    }

    #[test]
    fn role_deserializes_from_lowercase() {
        let role: UserRole = serde_json::from_str("\"owner\"").unwrap();
        assert_eq!(role, UserRole::Owner);
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let now = chrono::Utc::now().naive_utc();
        let user = User {
            user_id: 1,
            name: "Sari".into(),
            email: "sari@example.com".into(),
            password_hash: "$2b$12$secret".into(),
            phone_number: None,
            role: "renter".into(),
            is_active: true,
            profile_image: None,
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["email"], "sari@example.com");
    }
}
