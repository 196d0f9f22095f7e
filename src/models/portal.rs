// src/models/portal.rs

use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct PortalLoginResponse {
    pub success: bool,
    pub message: String,
    #[schema(example = "https://portal.example.gov.in/Tax/PropertyList.aspx")]
    pub url: String,
}
