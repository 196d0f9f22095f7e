// src/handlers/receipts.rs

use axum::{extract::State, Json};

use crate::{
    common::error::AppError,
    config::AppState,
    models::{receipt::SendReceiptPayload, response::ActionResponse},
};

// POST /send-receipt
#[utoipa::path(
    post,
    path = "/send-receipt",
    tag = "Receipts",
    request_body = SendReceiptPayload,
    responses(
        (status = 200, description = "Receipt sent", body = ActionResponse),
        (status = 400, description = "Missing m_id or unusable phone number"),
        (status = 404, description = "Ledger row is empty"),
        (status = 503, description = "Messaging channel not connected")
    )
)]
pub async fn send_receipt(
    State(app_state): State<AppState>,
    Json(payload): Json<SendReceiptPayload>,
) -> Result<Json<ActionResponse>, AppError> {
    let sent = app_state.receipt_service.send(payload.m_id.as_ref()).await?;
    Ok(Json(ActionResponse::ok(format!("Receipt sent to {}", sent.phone))))
}
