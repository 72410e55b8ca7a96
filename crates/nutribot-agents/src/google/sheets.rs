use nutribot_common::{Error, Result};
use nutribot_db::{NutritionRecord, SharedStore};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use url::Url;

use super::google_error_message;
use super::oauth::GoogleOAuthClient;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
const SPREADSHEET_TITLE: &str = "Nutritional Log";
const HEADER_RANGE: &str = "A1:H1";

pub const WORKSHEET_NAME: &str = "Nutritional Log";
pub const SHEET_HEADERS: [&str; 8] = [
    "Id",
    "Date",
    "Meal Type",
    "Calories",
    "Proteins",
    "Carbs",
    "Fats",
    "Extra Details",
];

pub fn spreadsheet_url(spreadsheet_id: &str) -> String {
    format!("https://docs.google.com/spreadsheets/d/{spreadsheet_id}")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSpreadsheet {
    spreadsheet_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Credentials in use for one Sheets operation. Refreshed at most once.
struct Session {
    user_id: i64,
    access_token: String,
    refresh_token: String,
    refreshed: bool,
}

/// Appends nutrition rows to a per-user Google spreadsheet, creating it on demand.
#[derive(Clone)]
pub struct SheetsClient {
    http: Client,
    oauth: GoogleOAuthClient,
    store: SharedStore,
    api_base: String,
}

impl SheetsClient {
    pub fn new(oauth: GoogleOAuthClient, store: SharedStore) -> Self {
        Self {
            http: Client::new(),
            oauth,
            store,
            api_base: SHEETS_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Append `record` to the user's sheet and return the spreadsheet id used.
    pub async fn append_record(&self, record: &NutritionRecord) -> Result<String> {
        let user_id = record.user_id;
        let config = self
            .store
            .lock()
            .await
            .spreadsheet_config(user_id)?
            .ok_or_else(|| {
                Error::Validation(format!("no spreadsheet config for user {user_id}"))
            })?;

        let mut session = Session {
            user_id,
            access_token: config.access_token,
            refresh_token: config.refresh_token,
            refreshed: false,
        };

        let spreadsheet_id = self
            .ensure_spreadsheet(&mut session, config.spreadsheet_id)
            .await?;

        let url = self.values_url(&spreadsheet_id, &format!("{WORKSHEET_NAME}!A:H:append"))?;
        let body = json!({ "values": [row_for(record)] });
        let response = self
            .send(&mut session, |http, token| {
                http.post(url.clone())
                    .bearer_auth(token)
                    .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
                    .json(&body)
            })
            .await?;
        expect_success(response, "append row").await?;

        info!(
            user_id,
            spreadsheet_id = %spreadsheet_id,
            record_id = record.id,
            meal_type = record.meal_type.as_str(),
            "appended nutrition row to spreadsheet"
        );
        Ok(spreadsheet_id)
    }

    async fn ensure_spreadsheet(
        &self,
        session: &mut Session,
        existing: Option<String>,
    ) -> Result<String> {
        let Some(spreadsheet_id) = existing else {
            info!(user_id = session.user_id, "creating spreadsheet");
            return self.create_spreadsheet(session).await;
        };

        let url = self.values_url(&spreadsheet_id, HEADER_RANGE)?;
        let response = self
            .send(session, |http, token| http.get(url.clone()).bearer_auth(token))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            warn!(
                user_id = session.user_id,
                spreadsheet_id = %spreadsheet_id,
                "spreadsheet not found, creating a new one"
            );
            return self.create_spreadsheet(session).await;
        }

        let range: ValueRange = expect_success(response, "read header row")
            .await?
            .json()
            .await
            .map_err(|e| Error::Agent(format!("invalid Sheets header response: {e}")))?;

        if !header_matches(&range) {
            info!(spreadsheet_id = %spreadsheet_id, "header row missing or different, rewriting");
            self.write_headers(session, &spreadsheet_id).await?;
        }
        Ok(spreadsheet_id)
    }

    async fn create_spreadsheet(&self, session: &mut Session) -> Result<String> {
        let url = self.endpoint(&["v4", "spreadsheets"])?;
        let header_cells: Vec<Value> = SHEET_HEADERS
            .iter()
            .map(|h| json!({ "userEnteredValue": { "stringValue": h } }))
            .collect();
        let body = json!({
            "properties": { "title": SPREADSHEET_TITLE },
            "sheets": [{
                "properties": { "title": WORKSHEET_NAME },
                "data": [{ "rowData": [{ "values": header_cells }] }]
            }]
        });

        let response = self
            .send(session, |http, token| {
                http.post(url.clone()).bearer_auth(token).json(&body)
            })
            .await?;
        let created: CreatedSpreadsheet = expect_success(response, "create spreadsheet")
            .await?
            .json()
            .await
            .map_err(|e| Error::Agent(format!("invalid Sheets create response: {e}")))?;

        self.store
            .lock()
            .await
            .set_spreadsheet_id(session.user_id, Some(&created.spreadsheet_id))?;
        self.write_headers(session, &created.spreadsheet_id).await?;

        info!(
            user_id = session.user_id,
            spreadsheet_id = %created.spreadsheet_id,
            "created spreadsheet"
        );
        Ok(created.spreadsheet_id)
    }

    async fn write_headers(&self, session: &mut Session, spreadsheet_id: &str) -> Result<()> {
        let url = self.values_url(spreadsheet_id, HEADER_RANGE)?;
        let body = json!({ "values": [SHEET_HEADERS] });
        let response = self
            .send(session, |http, token| {
                http.put(url.clone())
                    .bearer_auth(token)
                    .query(&[("valueInputOption", "RAW")])
                    .json(&body)
            })
            .await?;
        expect_success(response, "write header row").await?;
        Ok(())
    }

    /// Issue a request; on 401 refresh the access token, persist it, and retry once.
    async fn send<F>(&self, session: &mut Session, build: F) -> Result<Response>
    where
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        let response = build(&self.http, &session.access_token)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("Sheets request failed: {e}")))?;

        if response.status() != StatusCode::UNAUTHORIZED || session.refreshed {
            return Ok(response);
        }

        info!(user_id = session.user_id, "Google access token rejected, refreshing");
        let fresh = self.oauth.refresh_access_token(&session.refresh_token).await?;
        self.store
            .lock()
            .await
            .update_spreadsheet_access_token(session.user_id, &fresh)?;
        session.access_token = fresh;
        session.refreshed = true;

        build(&self.http, &session.access_token)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("Sheets request failed: {e}")))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| Error::Config(format!("invalid Sheets API base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config("Sheets API base cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn values_url(&self, spreadsheet_id: &str, range: &str) -> Result<Url> {
        self.endpoint(&["v4", "spreadsheets", spreadsheet_id, "values", range])
    }
}

fn header_matches(range: &ValueRange) -> bool {
    range.values.first().is_some_and(|row| {
        row.len() == SHEET_HEADERS.len()
            && row
                .iter()
                .zip(SHEET_HEADERS)
                .all(|(cell, header)| cell.as_str() == Some(header))
    })
}

fn row_for(record: &NutritionRecord) -> Value {
    json!([
        record.id,
        record.created_at.format("%Y-%m-%d").to_string(),
        record.meal_type.as_str(),
        record.calories,
        record.proteins,
        record.carbs,
        record.fats,
        record.extra_details.clone().unwrap_or_default(),
    ])
}

async fn expect_success(response: Response, action: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Agent(format!(
        "Sheets {action} failed ({status}): {}",
        google_error_message(&body)
    )))
}
