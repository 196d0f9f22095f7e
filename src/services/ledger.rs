// src/services/ledger.rs

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;

use crate::{
    clients::sheets::{sheet_range, SheetRecordStore, ValueInputOption},
    common::error::AppError,
    models::ledger::{cell_text, LedgerRow, SyncAction},
};

/// Column F holds the Milkat (property) number.
pub const MILKAT_COLUMN: usize = 5;
/// Row index 2 is a header/placeholder row and never a record.
pub const SKIPPED_ROW: usize = 2;
/// Column kept from the stored row when an update leaves it blank.
pub const PRESERVED_COLUMN: usize = 18;
pub const PRESERVED_FALLBACK: &str = "Meghraj - MEGHRAJ";

const FULL_WIDTH: &str = "A:AZ";
const RECEIPT_COLUMN: &str = "AF";
const RECEIPT_DATE_COLUMN: &str = "AG";

/// Index of the first row whose Milkat ID equals `milkat_id`, both trimmed.
pub fn find_row(rows: &[LedgerRow], milkat_id: &str) -> Option<usize> {
    let wanted = milkat_id.trim();
    if wanted.is_empty() {
        return None;
    }
    rows.iter()
        .enumerate()
        .filter(|(i, _)| *i != SKIPPED_ROW)
        .find(|(_, row)| row.get(MILKAT_COLUMN).is_some_and(|cell| cell.trim() == wanted))
        .map(|(i, _)| i)
}

/// Fills a blank preserved column from the stored row (or the fallback).
pub fn merge_preserved_column(mut incoming: LedgerRow, stored: &[String]) -> LedgerRow {
    if incoming.len() <= PRESERVED_COLUMN {
        incoming.resize(PRESERVED_COLUMN + 1, String::new());
    }
    if incoming[PRESERVED_COLUMN].trim().is_empty() {
        incoming[PRESERVED_COLUMN] = stored
            .get(PRESERVED_COLUMN)
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| PRESERVED_FALLBACK.to_string());
    }
    incoming
}

fn required_text(value: Option<&Value>) -> Option<String> {
    value
        .map(cell_text)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn SheetRecordStore>,
    sheet: String,
}

impl LedgerService {
    pub fn new(store: Arc<dyn SheetRecordStore>, sheet: String) -> Self {
        Self { store, sheet }
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    async fn read_all(&self) -> Result<Vec<LedgerRow>, AppError> {
        Ok(self.store.get_values(&sheet_range(&self.sheet, FULL_WIDTH)).await?)
    }

    /// Updates the row holding `milkat_id`, or appends `row_data` if none does.
    pub async fn upsert(
        &self,
        milkat_id: Option<&Value>,
        row_data: Option<&[Value]>,
    ) -> Result<(String, SyncAction), AppError> {
        let (Some(milkat_id), Some(row_data)) = (required_text(milkat_id), row_data) else {
            return Err(AppError::BadRequest("Missing milkatId or rowData in request.".into()));
        };
        let incoming: LedgerRow = row_data.iter().map(cell_text).collect();

        let rows = self.read_all().await?;
        let Some(index) = find_row(&rows, &milkat_id) else {
            self.store
                .append_values(
                    &sheet_range(&self.sheet, "A1"),
                    vec![incoming],
                    ValueInputOption::UserEntered,
                )
                .await?;
            tracing::info!(%milkat_id, "Milkat record not found, appended as new row");
            return Ok((milkat_id, SyncAction::Appended));
        };

        let row_number = index + 1;
        let stored = self
            .store
            .get_values(&sheet_range(&self.sheet, &format!("A{row_number}:AZ{row_number}")))
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        let merged = merge_preserved_column(incoming, &stored);

        let updated = self
            .store
            .update_values(
                &sheet_range(&self.sheet, &format!("A{row_number}")),
                vec![merged],
                ValueInputOption::UserEntered,
            )
            .await?;
        tracing::info!(%milkat_id, row = row_number, cells = updated, "✅ Milkat record updated");
        Ok((milkat_id, SyncAction::Updated { row: row_number }))
    }

    pub async fn update_receipt(
        &self,
        milkat_id: Option<&Value>,
        receipt_number: Option<&Value>,
    ) -> Result<usize, AppError> {
        let today = chrono::Local::now().date_naive();
        self.update_receipt_on(milkat_id, receipt_number, today).await
    }

    /// Writes the receipt number (AF) and `date` as DD/MM/YYYY (AG) into
    /// the matched row; returns its 1-indexed row number.
    pub async fn update_receipt_on(
        &self,
        milkat_id: Option<&Value>,
        receipt_number: Option<&Value>,
        date: NaiveDate,
    ) -> Result<usize, AppError> {
        let (Some(milkat_id), Some(receipt)) = (required_text(milkat_id), required_text(receipt_number))
        else {
            return Err(AppError::BadRequest(
                "Missing milkatId or receiptNumber in request.".into(),
            ));
        };

        let rows = self.read_all().await?;
        let index = find_row(&rows, &milkat_id)
            .ok_or_else(|| AppError::NotFound(format!("Milkat ID {milkat_id} not found in sheet.")))?;
        let row_number = index + 1;

        let entries = vec![
            (
                sheet_range(&self.sheet, &format!("{RECEIPT_COLUMN}{row_number}")),
                vec![vec![receipt.clone()]],
            ),
            (
                sheet_range(&self.sheet, &format!("{RECEIPT_DATE_COLUMN}{row_number}")),
                vec![vec![date.format("%d/%m/%Y").to_string()]],
            ),
        ];
        self.store.batch_update(entries, ValueInputOption::Raw).await?;

        tracing::info!(%milkat_id, %receipt, row = row_number, "✅ Receipt and date updated");
        Ok(row_number)
    }

    /// Every row except the skipped placeholder row.
    pub async fn all_rows(&self) -> Result<Vec<LedgerRow>, AppError> {
        let rows = self.read_all().await?;
        let filtered: Vec<LedgerRow> = rows
            .into_iter()
            .enumerate()
            .filter(|(i, _)| *i != SKIPPED_ROW)
            .map(|(_, row)| row)
            .collect();
        tracing::info!(rows = filtered.len(), sheet = %self.sheet, "Fetched ledger rows");
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::sheets::memory::MemorySheet;
    use serde_json::json;

    fn row(milkat: &str, col18: &str) -> Vec<String> {
        let mut r = vec![String::new(); 20];
        r[0] = "1".into();
        r[MILKAT_COLUMN] = milkat.into();
        r[PRESERVED_COLUMN] = col18.into();
        r
    }

    fn sheet() -> Arc<MemorySheet> {
        let header = vec!["Sr", "Name", "", "", "", "Milkat"];
        let placeholder = vec!["", "", "", "", "", "1042"];
        let mut rows: Vec<Vec<&str>> = vec![header.clone(), header, placeholder];
        rows.push(vec!["1", "Ramesh", "", "", "", " 1042 "]);
        rows.push(vec!["2", "Sita", "", "", "", "77"]);
        Arc::new(MemorySheet::with_rows(rows))
    }

    fn service(store: Arc<MemorySheet>) -> LedgerService {
        LedgerService::new(store, "AC MAST".into())
    }

    #[test]
    fn matching_is_exact_after_trimming_and_skips_placeholder_row() {
        let rows = vec![
            row("Milkat", ""),
            row("x", ""),
            row("1042", ""),
            row(" 1042", ""),
        ];
        assert_eq!(find_row(&rows, "1042 "), Some(3));
        assert_eq!(find_row(&rows, "104"), None);
        assert_eq!(find_row(&rows, "1042.0"), None);
        assert_eq!(find_row(&rows, "  "), None);
    }

    #[test]
    fn blank_preserved_column_keeps_stored_value() {
        let merged = merge_preserved_column(row("1", " "), &row("1", "Ward 4 - MEGHRAJ"));
        assert_eq!(merged[PRESERVED_COLUMN], "Ward 4 - MEGHRAJ");
    }

    #[test]
    fn non_blank_preserved_column_overwrites() {
        let merged = merge_preserved_column(row("1", "Ward 9"), &row("1", "Ward 4 - MEGHRAJ"));
        assert_eq!(merged[PRESERVED_COLUMN], "Ward 9");
    }

    #[test]
    fn short_rows_are_padded_and_fall_back_when_nothing_is_stored() {
        let merged = merge_preserved_column(vec!["1".into(), "Ramesh".into()], &[]);
        assert_eq!(merged.len(), PRESERVED_COLUMN + 1);
        assert_eq!(merged[1], "Ramesh");
        assert_eq!(merged[PRESERVED_COLUMN], PRESERVED_FALLBACK);
    }

    #[test]
    fn blank_stored_value_also_takes_the_fallback() {
        let merged = merge_preserved_column(row("1", ""), &row("1", "   "));
        assert_eq!(merged[PRESERVED_COLUMN], PRESERVED_FALLBACK);
    }

    #[tokio::test]
    async fn upsert_updates_matching_row_in_place() {
        let store = sheet();
        let mut data: Vec<Value> = vec![json!(1), json!("Ramesh Patel"), json!(""), json!(""), json!(""), json!(1042)];
        data.resize(19, json!(""));

        let (id, action) = service(Arc::clone(&store))
            .upsert(Some(&json!(1042)), Some(data.as_slice()))
            .await
            .unwrap();

        assert_eq!(id, "1042");
        assert_eq!(action, SyncAction::Updated { row: 4 });
        assert_eq!(store.row(3)[1], "Ramesh Patel");
        assert_eq!(store.row(3)[PRESERVED_COLUMN], PRESERVED_FALLBACK);
        assert!(store.appended.lock().unwrap().is_empty());

        let writes = store.writes.lock().unwrap();
        assert_eq!(writes[0].0, "'AC MAST'!A4");
        assert_eq!(writes[0].2, ValueInputOption::UserEntered);
    }

    #[tokio::test]
    async fn upsert_appends_unknown_ids() {
        let store = sheet();
        let data = vec![json!(3), json!("New owner"), json!(""), json!(""), json!(""), json!("555")];

        let (_, action) = service(Arc::clone(&store))
            .upsert(Some(&json!("555")), Some(data.as_slice()))
            .await
            .unwrap();

        assert_eq!(action, SyncAction::Appended);
        let appended = store.appended.lock().unwrap();
        assert_eq!(appended.len(), 1);
        assert_eq!(appended[0][MILKAT_COLUMN], "555");
    }

    #[tokio::test]
    async fn upsert_requires_both_fields() {
        let err = service(sheet()).upsert(Some(&json!("1042")), None).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = service(sheet()).upsert(Some(&json!("")), Some(&[][..])).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn receipt_and_date_land_in_af_and_ag() {
        let store = sheet();
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();

        let row_number = service(Arc::clone(&store))
            .update_receipt_on(Some(&json!("77")), Some(&json!("R-88")), date)
            .await
            .unwrap();

        assert_eq!(row_number, 5);
        assert_eq!(store.row(4)[31], "R-88");
        assert_eq!(store.row(4)[32], "07/03/2025");
        let writes = store.writes.lock().unwrap();
        assert!(writes.iter().all(|(_, _, input)| *input == ValueInputOption::Raw));
    }

    #[tokio::test]
    async fn receipt_for_unknown_id_is_not_found() {
        let err = service(sheet())
            .update_receipt(Some(&json!("9999")), Some(&json!("R-1")))
            .await
            .unwrap_err();
        match err {
            AppError::NotFound(message) => assert!(message.contains("9999")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn all_rows_drops_the_placeholder_row() {
        let rows = service(sheet()).all_rows().await.unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.get(MILKAT_COLUMN).map(String::as_str) != Some("1042")));
    }
}
