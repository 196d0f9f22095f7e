// src/common/error.rs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::clients::{messaging::ChannelError, sheets::SheetsError};
use crate::services::portal::PortalRunError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation failed")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("{0}")]
    BadRequest(String),

    #[error("E-mail already registered")]
    EmailAlreadyExists,

    #[error("Invalid e-mail or password")]
    InvalidCredentials,

    #[error("Missing or invalid authentication token")]
    InvalidToken,

    #[error("Role '{0}' is not allowed to perform this action")]
    Forbidden(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Lead not found")]
    LeadNotFound,

    // Missing-data errors carry the identifier they were looking for.
    #[error("{0}")]
    NotFound(String),

    #[error("Missing or invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("Messaging channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Ledger error: {0}")]
    Sheets(#[from] SheetsError),

    #[error("Portal automation failed: {0}")]
    Portal(#[from] PortalRunError),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error")]
    InternalServerError(#[from] anyhow::Error),

    #[error("Bcrypt error: {0}")]
    BcryptError(#[from] bcrypt::BcryptError),

    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest(_) | AppError::InvalidPhone(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::EmailAlreadyExists => StatusCode::CONFLICT,
            AppError::InvalidCredentials | AppError::InvalidToken => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::UserNotFound | AppError::LeadNotFound | AppError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AppError::Channel(ChannelError::NotReady) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Channel(_) | AppError::Sheets(_) | AppError::Portal(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if let AppError::ValidationError(errors) = &self {
            let mut details = std::collections::HashMap::new();
            for (field, field_errors) in errors.field_errors() {
                let messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                details.insert(field.to_string(), messages);
            }
            let body = Json(json!({
                "success": false,
                "message": "One or more fields are invalid.",
                "details": details,
            }));
            return (status, body).into_response();
        }

        // The portal failure also reports where the browser was when it gave up.
        if let AppError::Portal(run_error) = &self {
            tracing::error!("🔥 Portal run failed: {}", run_error);
            let body = Json(json!({
                "success": false,
                "message": run_error.to_string(),
                "url": run_error.last_url,
            }));
            return (status, body).into_response();
        }

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal server error: {}", self);
            "An unexpected error occurred.".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({ "success": false, "message": message }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn channel_not_ready_maps_to_503() {
        let response = AppError::Channel(ChannelError::NotReady).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("not connected"));
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let response = AppError::InternalServerError(anyhow::anyhow!("pool exploded")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["message"], "An unexpected error occurred.");
    }

    #[tokio::test]
    async fn missing_data_keeps_context() {
        let response = AppError::NotFound("Milkat ID 42 not found in sheet.".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["message"], "Milkat ID 42 not found in sheet.");
    }
}
