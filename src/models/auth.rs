// src/models/auth.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

// Maps the staff_role type created in the migrations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "staff_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StaffRole {
    Owner,
    Telecaller,
    Surveyor,
    Accountant,
    #[default]
    Operator,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Owner => "owner",
            StaffRole::Telecaller => "telecaller",
            StaffRole::Surveyor => "surveyor",
            StaffRole::Accountant => "accountant",
            StaffRole::Operator => "operator",
        }
    }
}

impl fmt::Display for StaffRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// A staff member as stored in the database
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    #[schema(example = "Ramesh Patel")]
    pub name: String,
    #[schema(example = "ramesh@afinfosys.in")]
    pub email: String,

    #[serde(skip_serializing)]
    #[schema(ignore)]
    pub password_hash: String,

    pub role: StaffRole,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterUserPayload {
    #[validate(length(min = 1, message = "Name is required."))]
    #[schema(example = "Ramesh Patel")]
    pub name: String,
    #[validate(email(message = "The e-mail address is invalid."))]
    #[schema(example = "ramesh@afinfosys.in")]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters."))]
    pub password: String,
    #[serde(default)]
    pub role: StaffRole,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginUserPayload {
    #[validate(email(message = "The e-mail address is invalid."))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters."))]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
}

// JWT claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,  // user id
    pub exp: usize,
    pub iat: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_defaults_to_operator_and_uses_lowercase_names() {
        let payload: RegisterUserPayload = serde_json::from_value(serde_json::json!({
            "name": "Asha",
            "email": "asha@example.com",
            "password": "secret1"
        }))
        .unwrap();
        assert_eq!(payload.role, StaffRole::Operator);

        let role: StaffRole = serde_json::from_str("\"accountant\"").unwrap();
        assert_eq!(role, StaffRole::Accountant);
        assert_eq!(role.to_string(), "accountant");
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(serde_json::from_str::<StaffRole>("\"manager\"").is_err());
    }
}
