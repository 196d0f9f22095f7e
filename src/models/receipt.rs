// src/models/receipt.rs

use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendReceiptPayload {
    // Arrives as a number or a numeric string
    #[schema(value_type = Option<String>, example = "17")]
    pub m_id: Option<Value>,
}
