// src/handlers/portal.rs

use axum::{extract::State, Json};

use crate::{common::error::AppError, config::AppState, models::portal::PortalLoginResponse};

// GET /api/portal/login
#[utoipa::path(
    get,
    path = "/api/portal/login",
    tag = "Portal",
    responses(
        (status = 200, description = "Logged in and on the listing page", body = PortalLoginResponse),
        (status = 502, description = "A login step failed; body carries the step message and last URL")
    )
)]
pub async fn run_portal_login(
    State(app_state): State<AppState>,
) -> Result<Json<PortalLoginResponse>, AppError> {
    let login = app_state.portal_service.run_login().await?;
    Ok(Json(PortalLoginResponse {
        success: true,
        message: "Logged in to the portal.".into(),
        url: login.url,
    }))
}
