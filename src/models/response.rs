// src/models/response.rs

use serde::Serialize;
use utoipa::ToSchema;

// Every ad-hoc endpoint answers with a success flag and a message
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }
}
