// src/clients/sheets.rs

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::ledger::{cell_text, LedgerRow};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets/";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("invalid Google credentials: {0}")]
    Credentials(String),

    #[error("could not obtain access token: {0}")]
    Auth(String),

    #[error("Sheets API returned {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("request to Sheets API failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueInputOption {
    Raw,
    UserEntered,
}

impl ValueInputOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueInputOption::Raw => "RAW",
            ValueInputOption::UserEntered => "USER_ENTERED",
        }
    }
}

/// Tabular ledger addressed by A1 ranges (1-indexed rows).
#[async_trait]
pub trait SheetRecordStore: Send + Sync {
    async fn get_values(&self, range: &str) -> Result<Vec<LedgerRow>, SheetsError>;

    /// Returns the number of updated cells.
    async fn update_values(
        &self,
        range: &str,
        rows: Vec<LedgerRow>,
        input: ValueInputOption,
    ) -> Result<u64, SheetsError>;

    async fn append_values(
        &self,
        range: &str,
        rows: Vec<LedgerRow>,
        input: ValueInputOption,
    ) -> Result<u64, SheetsError>;

    async fn batch_update(
        &self,
        entries: Vec<(String, Vec<LedgerRow>)>,
        input: ValueInputOption,
    ) -> Result<u64, SheetsError>;
}

// =============================================================================
//  A1 NOTATION
// =============================================================================

/// Prefixes `cells` with a quoted sheet name, e.g. `'AC MAST'!A5`.
pub fn sheet_range(sheet: &str, cells: &str) -> String {
    format!("'{}'!{}", sheet.replace('\'', "''"), cells)
}

// =============================================================================
//  SERVICE ACCOUNT
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    /// Parses the credentials JSON kept in the environment.
    ///
    /// Environment files usually carry the PEM with literal `\n` sequences;
    /// those are turned back into newlines before the key is used.
    pub fn from_json(raw: &str) -> Result<Self, SheetsError> {
        let mut key: ServiceAccountKey = serde_json::from_str(raw).map_err(|e| {
            SheetsError::Credentials(format!("GOOGLE_CREDENTIALS_JSON is not valid JSON ({e})"))
        })?;

        if key.private_key.trim().is_empty() {
            return Err(SheetsError::Credentials(
                "private key missing in Google credentials JSON".into(),
            ));
        }
        key.private_key = key.private_key.replace("\\n", "\n");
        Ok(key)
    }
}

#[derive(Debug, Serialize)]
struct GrantClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    value: String,
    expires_at: i64,
}

// =============================================================================
//  GOOGLE SHEETS CLIENT
// =============================================================================

pub struct GoogleSheetsClient {
    http: Client,
    spreadsheet_id: String,
    key: ServiceAccountKey,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleSheetsClient {
    pub fn new(spreadsheet_id: String, key: ServiceAccountKey) -> Result<Self, SheetsError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            spreadsheet_id,
            key,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, SheetsError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now().timestamp();

        if let Some(token) = cached.as_ref() {
            if token.expires_at - 60 > now {
                return Ok(token.value.clone());
            }
        }

        let token_uri = self.key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let claims = GrantClaims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: token_uri,
            iat: now,
            exp: now + 3600,
        };
        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| SheetsError::Credentials(e.to_string()))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| SheetsError::Auth(e.to_string()))?;

        let response = self
            .http
            .post(token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SheetsError::Auth(format!("{status}: {body}")));
        }

        let grant: TokenResponse = response.json().await?;
        tracing::debug!(expires_in = grant.expires_in, "Google access token refreshed");

        *cached = Some(CachedToken {
            value: grant.access_token.clone(),
            expires_at: now + grant.expires_in,
        });
        Ok(grant.access_token)
    }

    fn api_url(&self, segments: &[&str]) -> Result<Url, SheetsError> {
        let mut url = Url::parse(SHEETS_API)
            .map_err(|e| SheetsError::Credentials(format!("bad API base url: {e}")))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| SheetsError::Credentials("bad API base url".into()))?;
            path.pop_if_empty().push(&self.spreadsheet_id);
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn values_url(&self, range: &str) -> Result<Url, SheetsError> {
        self.api_url(&["values", range])
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> Result<Value, SheetsError> {
        let token = self.access_token().await?;
        let response = request.bearer_auth(token).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SheetsError::Api { status, body });
        }
        Ok(response.json().await?)
    }
}

fn rows_from(body: &Value) -> Vec<LedgerRow> {
    body.get("values")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| cells.iter().map(cell_text).collect())
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

fn updated_cells(body: &Value, pointer: &str) -> u64 {
    body.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

#[async_trait]
impl SheetRecordStore for GoogleSheetsClient {
    async fn get_values(&self, range: &str) -> Result<Vec<LedgerRow>, SheetsError> {
        let url = self.values_url(range)?;
        let body = self.send_json(self.http.get(url)).await?;
        Ok(rows_from(&body))
    }

    async fn update_values(
        &self,
        range: &str,
        rows: Vec<LedgerRow>,
        input: ValueInputOption,
    ) -> Result<u64, SheetsError> {
        let url = self.values_url(range)?;
        let request = self
            .http
            .put(url)
            .query(&[("valueInputOption", input.as_str())])
            .json(&json!({ "range": range, "values": rows }));
        let body = self.send_json(request).await?;
        Ok(updated_cells(&body, "/updatedCells"))
    }

    async fn append_values(
        &self,
        range: &str,
        rows: Vec<LedgerRow>,
        input: ValueInputOption,
    ) -> Result<u64, SheetsError> {
        let url = self.values_url(&format!("{range}:append"))?;
        let request = self
            .http
            .post(url)
            .query(&[("valueInputOption", input.as_str())])
            .json(&json!({ "values": rows }));
        let body = self.send_json(request).await?;
        Ok(updated_cells(&body, "/updates/updatedCells"))
    }

    async fn batch_update(
        &self,
        entries: Vec<(String, Vec<LedgerRow>)>,
        input: ValueInputOption,
    ) -> Result<u64, SheetsError> {
        let url = self.api_url(&["values:batchUpdate"])?;

        let data: Vec<Value> = entries
            .into_iter()
            .map(|(range, values)| json!({ "range": range, "values": values }))
            .collect();
        let request = self.http.post(url).json(&json!({
            "valueInputOption": input.as_str(),
            "data": data,
        }));
        let body = self.send_json(request).await?;
        Ok(updated_cells(&body, "/totalUpdatedCells"))
    }
}

// =============================================================================
//  IN-MEMORY STORE (tests)
// =============================================================================

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// A single-sheet grid that understands the handful of A1 shapes the
    /// services produce (`A:AZ`, `A5`, `A5:AZ5`, `AF5`).
    #[derive(Default)]
    pub struct MemorySheet {
        pub rows: StdMutex<Vec<LedgerRow>>,
        pub appended: StdMutex<Vec<LedgerRow>>,
        pub writes: StdMutex<Vec<(String, Vec<LedgerRow>, ValueInputOption)>>,
    }

    impl MemorySheet {
        pub fn with_rows(rows: Vec<Vec<&str>>) -> Self {
            let rows = rows
                .into_iter()
                .map(|r| r.into_iter().map(str::to_string).collect())
                .collect();
            Self {
                rows: StdMutex::new(rows),
                ..Default::default()
            }
        }

        pub fn row(&self, index: usize) -> LedgerRow {
            self.rows.lock().unwrap().get(index).cloned().unwrap_or_default()
        }
    }

    fn column_index(letters: &str) -> usize {
        letters
            .bytes()
            .fold(0usize, |acc, b| acc * 26 + (b - b'A' + 1) as usize)
            - 1
    }

    // (column, optional 1-indexed row)
    fn cell(part: &str) -> (usize, Option<usize>) {
        let split = part.find(|c: char| c.is_ascii_digit()).unwrap_or(part.len());
        let (letters, digits) = part.split_at(split);
        (column_index(letters), digits.parse().ok())
    }

    fn cells_of(range: &str) -> &str {
        range.rsplit('!').next().unwrap_or(range)
    }

    #[async_trait]
    impl SheetRecordStore for MemorySheet {
        async fn get_values(&self, range: &str) -> Result<Vec<LedgerRow>, SheetsError> {
            let rows = self.rows.lock().unwrap();
            let cells = cells_of(range);
            let (start, end) = cells.split_once(':').unwrap_or((cells, cells));
            let (first_col, first_row) = cell(start);
            let (last_col, _) = cell(end);

            let slice: Vec<LedgerRow> = match first_row {
                None => rows.clone(),
                Some(n) => rows.get(n - 1).cloned().into_iter().collect(),
            };
            Ok(slice
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .skip(first_col)
                        .take(last_col - first_col + 1)
                        .collect::<Vec<_>>()
                })
                .filter(|row| first_row.is_none() || !row.is_empty())
                .collect())
        }

        async fn update_values(
            &self,
            range: &str,
            new_rows: Vec<LedgerRow>,
            input: ValueInputOption,
        ) -> Result<u64, SheetsError> {
            self.writes
                .lock()
                .unwrap()
                .push((range.to_string(), new_rows.clone(), input));

            let (col, row) = cell(cells_of(range).split(':').next().unwrap_or_default());
            let row = row.unwrap_or(1);
            let mut rows = self.rows.lock().unwrap();
            let mut count = 0;
            for (offset, values) in new_rows.into_iter().enumerate() {
                let index = row - 1 + offset;
                if rows.len() <= index {
                    rows.resize(index + 1, Vec::new());
                }
                let target = &mut rows[index];
                for (i, value) in values.into_iter().enumerate() {
                    if target.len() <= col + i {
                        target.resize(col + i + 1, String::new());
                    }
                    target[col + i] = value;
                    count += 1;
                }
            }
            Ok(count)
        }

        async fn append_values(
            &self,
            _range: &str,
            new_rows: Vec<LedgerRow>,
            _input: ValueInputOption,
        ) -> Result<u64, SheetsError> {
            let count = new_rows.iter().map(|r| r.len() as u64).sum();
            self.appended.lock().unwrap().extend(new_rows.iter().cloned());
            self.rows.lock().unwrap().extend(new_rows);
            Ok(count)
        }

        async fn batch_update(
            &self,
            entries: Vec<(String, Vec<LedgerRow>)>,
            input: ValueInputOption,
        ) -> Result<u64, SheetsError> {
            let mut total = 0;
            for (range, values) in entries {
                total += self.update_values(&range, values, input).await?;
            }
            Ok(total)
        }
    }
}
