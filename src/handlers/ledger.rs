// src/handlers/ledger.rs

use axum::{extract::State, Json};

use crate::{
    common::error::AppError,
    config::AppState,
    models::{
        ledger::{SheetDataResponse, SyncAction, UpdateReceiptPayload, UpdateSheetRecordPayload},
        response::ActionResponse,
    },
};

// POST /update-sheet-record
#[utoipa::path(
    post,
    path = "/update-sheet-record",
    tag = "Ledger",
    request_body = UpdateSheetRecordPayload,
    responses(
        (status = 200, description = "Row updated in place or appended", body = ActionResponse),
        (status = 400, description = "Missing milkatId or rowData"),
        (status = 502, description = "Sheets API failure")
    )
)]
pub async fn update_sheet_record(
    State(app_state): State<AppState>,
    Json(payload): Json<UpdateSheetRecordPayload>,
) -> Result<Json<ActionResponse>, AppError> {
    let (milkat_id, action) = app_state
        .ledger_service
        .upsert(payload.milkat_id.as_ref(), payload.row_data.as_deref())
        .await?;

    let message = match action {
        SyncAction::Updated { .. } => format!("Record for Milkat ID {milkat_id} updated."),
        SyncAction::Appended => format!("Record for Milkat ID {milkat_id} appended."),
    };
    Ok(Json(ActionResponse::ok(message)))
}

// POST /update-receipt
#[utoipa::path(
    post,
    path = "/update-receipt",
    tag = "Ledger",
    request_body = UpdateReceiptPayload,
    responses(
        (status = 200, description = "Receipt number and date written", body = ActionResponse),
        (status = 400, description = "Missing milkatId or receiptNumber"),
        (status = 404, description = "Milkat ID not in the sheet")
    )
)]
pub async fn update_receipt(
    State(app_state): State<AppState>,
    Json(payload): Json<UpdateReceiptPayload>,
) -> Result<Json<ActionResponse>, AppError> {
    let row = app_state
        .ledger_service
        .update_receipt(payload.milkat_id.as_ref(), payload.receipt_number.as_ref())
        .await?;
    Ok(Json(ActionResponse::ok(format!("Receipt and date updated at row {row}."))))
}

// GET /get-all-sheet-data
#[utoipa::path(
    get,
    path = "/get-all-sheet-data",
    tag = "Ledger",
    responses(
        (status = 200, description = "Every ledger row except the placeholder row", body = SheetDataResponse)
    )
)]
pub async fn get_all_sheet_data(
    State(app_state): State<AppState>,
) -> Result<Json<SheetDataResponse>, AppError> {
    let data = app_state.ledger_service.all_rows().await?;
    Ok(Json(SheetDataResponse {
        success: true,
        data,
        message: format!("Successfully fetched all data from {}.", app_state.ledger_service.sheet()),
    }))
}
