// src/services/receipt.rs

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::{
    clients::{
        messaging::{ChannelError, Jid, MessagingChannel, OutgoingMessage, UrlButton},
        sheets::{sheet_range, SheetRecordStore},
    },
    common::error::AppError,
    models::ledger::cell_text,
};

const NAME_COLUMN: usize = 1;
const PHONE_COLUMN: usize = 17;
const AMOUNT_COLUMNS: std::ops::RangeInclusive<usize> = 19..=30;
/// Records start two rows below the `m_id` numbering.
const RECORD_OFFSET: u64 = 2;

const FOOTER: &str = "Meghraj Gram Panchayat";
const BUTTON_TEXT: &str = "રસીદ જુઓ / View Receipt";
const DEFAULT_NAME: &str = "Valued Customer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptSent {
    pub phone: String,
    pub jid: Jid,
    pub total: String,
}

/// Reads a ledger amount the way the sheet front-end does: plain or
/// exponent notation, else the leading number (`"100 Rs"` is 100).
fn parse_amount(cell: &str) -> Option<Decimal> {
    let cell = cell.trim();
    if let Ok(value) = Decimal::from_str(cell).or_else(|_| Decimal::from_scientific(cell)) {
        return Some(value);
    }

    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in cell.char_indices() {
        match c {
            '0'..='9' => {}
            '.' if !seen_dot => seen_dot = true,
            '-' | '+' if i == 0 => {}
            _ => break,
        }
        end = i + c.len_utf8();
    }
    Decimal::from_str(cell[..end].trim_end_matches('.')).ok()
}

/// Sum of the amount columns; blank or non-numeric cells count as zero.
/// `None` when the sum does not fit in a `Decimal`.
pub fn total_amount(row: &[String]) -> Option<String> {
    let total = AMOUNT_COLUMNS
        .filter_map(|i| row.get(i))
        .filter_map(|cell| parse_amount(cell))
        .try_fold(Decimal::ZERO, |sum, amount| sum.checked_add(amount))?;
    Some(format!("{:.2}", total))
}

pub fn receipt_message(owner: &str, total: &str, receipt_url: &str) -> OutgoingMessage {
    let text = format!(
        "નમસ્તે {owner},\n\nતમારી ગ્રામ પંચાયતની રસીદ તૈયાર છે. કુલ રકમ ₹{total} છે.\n\n\
         નીચે આપેલા બટન પર ક્લિક કરીને તમારી રસીદ જુઓ અને ચુકવણી કરો.\n{receipt_url}\n\nઆભાર,\nગ્રામ પંચાયત"
    );
    OutgoingMessage {
        text,
        footer: FOOTER.to_string(),
        button: UrlButton {
            display_text: BUTTON_TEXT.to_string(),
            url: receipt_url.to_string(),
        },
    }
}

fn parse_m_id(value: Option<&Value>) -> Result<u32, AppError> {
    let raw = value
        .map(cell_text)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing m_id in request.".into()))?;
    match raw.parse::<i64>() {
        Ok(id) if id >= 0 => u32::try_from(id)
            .map_err(|_| AppError::BadRequest(format!("m_id {id} is beyond the last ledger row"))),
        _ => Err(AppError::BadRequest(format!("m_id must be a non-negative integer, got '{raw}'"))),
    }
}

#[derive(Clone)]
pub struct ReceiptService {
    store: Arc<dyn SheetRecordStore>,
    channel: Arc<dyn MessagingChannel>,
    sheet: String,
    receipt_base_url: String,
}

impl ReceiptService {
    pub fn new(
        store: Arc<dyn SheetRecordStore>,
        channel: Arc<dyn MessagingChannel>,
        sheet: String,
        receipt_base_url: String,
    ) -> Self {
        Self {
            store,
            channel,
            sheet,
            receipt_base_url,
        }
    }

    pub async fn send(&self, m_id: Option<&Value>) -> Result<ReceiptSent, AppError> {
        if !self.channel.is_ready() {
            return Err(ChannelError::NotReady.into());
        }
        let m_id = parse_m_id(m_id)?;

        let record_id = u64::from(m_id) + RECORD_OFFSET;
        let row_number = record_id + 1;
        tracing::info!(m_id, record_id, row = row_number, "Receipt requested");

        let range = sheet_range(&self.sheet, &format!("A{row_number}:AZ{row_number}"));
        let row = self
            .store
            .get_values(&range)
            .await?
            .into_iter()
            .next()
            .filter(|cells| cells.iter().any(|c| !c.trim().is_empty()))
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Record with ID '{record_id}' not found (m_id {m_id}, sheet row {row_number})."
                ))
            })?;

        let owner = row
            .get(NAME_COLUMN)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_NAME);
        let phone = row
            .get(PHONE_COLUMN)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                AppError::InvalidPhone(format!("no phone number at index {PHONE_COLUMN} for m_id {record_id}"))
            })?;
        let jid = Jid::from_phone(&phone).ok_or_else(|| AppError::InvalidPhone(phone.clone()))?;

        let total = total_amount(&row).ok_or_else(|| {
            AppError::BadRequest(format!(
                "Amounts for m_id {m_id} (sheet row {row_number}) add up past the largest supported total."
            ))
        })?;
        let receipt_url = format!("{}?m_id={m_id}", self.receipt_base_url);
        let message = receipt_message(owner, &total, &receipt_url);

        self.channel.send(&jid, &message).await?;
        tracing::info!(record_id, %jid, %total, "✅ Sent receipt");

        Ok(ReceiptSent { phone, jid, total })
    }
}
