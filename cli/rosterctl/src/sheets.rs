//! Spreadsheet ledger.
//!
//! The ledger is one tab: a header row, then one row per recorded assignment
//! in columns A..F. New batches are inserted directly under the header so the
//! newest rows sit at the top, in batch order.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use roster_reconcile::{Ledger, LedgerError, LedgerRow, LEDGER_COLUMNS};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::{authorized_client, base_url, endpoint};
use crate::config::SheetsConfig;

/// First data row (0-based), just below the header.
const FIRST_DATA_ROW: usize = 1;

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    sheets: Vec<Sheet>,
}

#[derive(Debug, Deserialize)]
struct Sheet {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

/// Ledger backed by a spreadsheet tab.
#[derive(Debug, Clone)]
pub struct SheetsClient {
    client: reqwest::Client,
    base: Url,
    spreadsheet_id: String,
    tab: String,
}

impl SheetsClient {
    pub fn new(config: &SheetsConfig, token: &str) -> Result<Self> {
        Ok(Self {
            client: authorized_client(token, Duration::from_secs(config.timeout_secs))?,
            base: base_url(&config.base_url)?,
            spreadsheet_id: config.spreadsheet_id.clone(),
            tab: config.tab.clone(),
        })
    }

    /// Range holding every data row.
    fn range(&self) -> String {
        format!("{}!A2:F", self.tab)
    }

    async fn sheet_id(&self) -> Result<i64, LedgerError> {
        let url = endpoint(&self.base, &["v4", "spreadsheets", &self.spreadsheet_id]);
        let response = self
            .client
            .get(url)
            .query(&[("fields", "sheets.properties")])
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        let spreadsheet: Spreadsheet = decode(response).await?;

        spreadsheet
            .sheets
            .into_iter()
            .find(|s| s.properties.title == self.tab)
            .map(|s| s.properties.sheet_id)
            .ok_or_else(|| LedgerError::Rejected(format!("no tab named {:?}", self.tab)))
    }
}

fn status_error(status: StatusCode) -> LedgerError {
    let message = format!("HTTP {}", status.as_u16());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        LedgerError::Unavailable(message)
    } else {
        LedgerError::Rejected(message)
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, LedgerError> {
    let status = response.status();
    if !status.is_success() {
        return Err(status_error(status));
    }
    response
        .json()
        .await
        .map_err(|e| LedgerError::Malformed(e.to_string()))
}

/// Build the `batchUpdate` body: shift rows down, then fill the gap.
fn insert_rows_request(sheet_id: i64, rows: &[LedgerRow]) -> Value {
    let end_row = FIRST_DATA_ROW + rows.len();
    let cells: Vec<Value> = rows
        .iter()
        .map(|row| {
            let values: Vec<Value> = row
                .to_cells()
                .into_iter()
                .map(|cell| json!({ "userEnteredValue": { "stringValue": cell } }))
                .collect();
            json!({ "values": values })
        })
        .collect();

    json!({
        "requests": [
            {
                "insertRange": {
                    "range": {
                        "sheetId": sheet_id,
                        "startRowIndex": FIRST_DATA_ROW,
                        "endRowIndex": end_row,
                    },
                    "shiftDimension": "ROWS",
                }
            },
            {
                "updateCells": {
                    "range": {
                        "sheetId": sheet_id,
                        "startRowIndex": FIRST_DATA_ROW,
                        "endRowIndex": end_row,
                        "startColumnIndex": 0,
                        "endColumnIndex": LEDGER_COLUMNS,
                    },
                    "rows": cells,
                    "fields": "userEnteredValue",
                }
            }
        ]
    })
}

#[async_trait]
impl Ledger for SheetsClient {
    async fn read_existing(&self) -> Result<Vec<Vec<String>>, LedgerError> {
        let range = self.range();
        let url = endpoint(
            &self.base,
            &["v4", "spreadsheets", &self.spreadsheet_id, "values", &range],
        );
        let response = self
            .client
            .get(url)
            .query(&[("majorDimension", "ROWS")])
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        let values: ValueRange = decode(response).await?;

        debug!(range = %range, rows = values.values.len(), "Read ledger range");
        Ok(values.values)
    }

    async fn append_rows(&self, rows: &[LedgerRow]) -> Result<(), LedgerError> {
        if rows.is_empty() {
            return Ok(());
        }

        let sheet_id = self.sheet_id().await?;
        let batch_target = format!("{}:batchUpdate", self.spreadsheet_id);
        let url = endpoint(&self.base, &["v4", "spreadsheets", &batch_target]);

        let response = self
            .client
            .post(url)
            .json(&insert_rows_request(sheet_id, rows))
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        let _: Value = decode(response).await?;

        info!(tab = %self.tab, rows = rows.len(), "Inserted ledger rows");
        Ok(())
    }
}
