// src/models/ledger.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// One row of the billing ledger, cell values rendered as text.
pub type LedgerRow = Vec<String>;

/// Renders a JSON cell the way the sheet would display it.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSheetRecordPayload {
    #[schema(value_type = Option<String>, example = "1042")]
    pub milkat_id: Option<Value>,
    #[schema(value_type = Option<Vec<Object>>)]
    pub row_data: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReceiptPayload {
    #[schema(value_type = Option<String>, example = "1042")]
    pub milkat_id: Option<Value>,
    #[schema(value_type = Option<String>, example = "R-2025-0088")]
    pub receipt_number: Option<Value>,
}

/// What a ledger upsert ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Updated { row: usize },
    Appended,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SheetDataResponse {
    pub success: bool,
    pub data: Vec<LedgerRow>,
    pub message: String,
}
