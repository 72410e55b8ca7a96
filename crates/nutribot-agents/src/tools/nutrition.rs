use chrono::{DateTime, NaiveDate, Utc};
use nutribot_common::{Error, Result};
use nutribot_db::{MealType, NewNutritionRecord, SharedStore};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::ToolOutput;
use crate::google::{GoogleOAuthClient, SheetsClient, spreadsheet_url};
use crate::providers::ToolDefinition;

pub const REGISTER_NUTRITIONAL_INFO: &str = "register_nutritional_info";
pub const QUERY_NUTRITIONAL_INFO: &str = "query_nutritional_info";
pub const REGISTER_GOOGLE_ACCOUNT: &str = "register_google_account";

#[derive(Debug, Deserialize)]
struct RegisterMealInput {
    calories: f64,
    proteins: f64,
    carbs: f64,
    fats: f64,
    meal_type: String,
    #[serde(default)]
    extra_details: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryInput {
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
}

/// The tools one agent call may use, bound to the user the call is for.
#[derive(Clone)]
pub struct NutritionToolbox {
    user_id: i64,
    redirect_uri: Option<String>,
    store: SharedStore,
    oauth: Option<GoogleOAuthClient>,
    sheets: Option<SheetsClient>,
}

impl NutritionToolbox {
    pub fn new(user_id: i64, redirect_uri: Option<String>, store: SharedStore) -> Self {
        Self {
            user_id,
            redirect_uri,
            store,
            oauth: None,
            sheets: None,
        }
    }

    pub fn with_google(mut self, oauth: GoogleOAuthClient, sheets: SheetsClient) -> Self {
        self.oauth = Some(oauth);
        self.sheets = Some(sheets);
        self
    }

    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: REGISTER_NUTRITIONAL_INFO.to_string(),
                description: "Register the nutritional information of a meal the user ate. \
                    Always saves to the internal records and, when the user connected Google, \
                    to their Google Sheet as well."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "calories": { "type": "number", "description": "Calories (kcal)" },
                        "proteins": { "type": "number", "description": "Proteins in grams" },
                        "carbs": { "type": "number", "description": "Carbohydrates in grams" },
                        "fats": { "type": "number", "description": "Fats in grams" },
                        "meal_type": {
                            "type": "string",
                            "enum": ["breakfast", "lunch", "dinner", "snack"]
                        },
                        "extra_details": {
                            "type": "string",
                            "description": "Ingredients, estimated portions and per-ingredient macros"
                        }
                    },
                    "required": ["calories", "proteins", "carbs", "fats", "meal_type"]
                }),
            },
            ToolDefinition {
                name: QUERY_NUTRITIONAL_INFO.to_string(),
                description: "Query the user's registered meals, optionally between two dates \
                    (YYYY-MM-DD, inclusive). Use it for questions like \"how many calories did \
                    I eat today?\"."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "start_date": { "type": "string", "description": "YYYY-MM-DD" },
                        "end_date": { "type": "string", "description": "YYYY-MM-DD" }
                    }
                }),
            },
            ToolDefinition {
                name: REGISTER_GOOGLE_ACCOUNT.to_string(),
                description: "Connect the user's Google account so meals are also logged to a \
                    Google Sheet. Returns an authorization link, or confirms an existing connection."
                    .to_string(),
                input_schema: json!({ "type": "object", "properties": {} }),
            },
        ]
    }

    /// Run a tool by name. Failures come back as error output for the model.
    pub async fn execute(&self, name: &str, input: serde_json::Value) -> ToolOutput {
        let (result, action) = match name {
            REGISTER_NUTRITIONAL_INFO => (
                self.register_from_json(input).await,
                "register your nutritional information",
            ),
            QUERY_NUTRITIONAL_INFO => (
                self.query_from_json(input).await,
                "query your nutritional information",
            ),
            REGISTER_GOOGLE_ACCOUNT => (
                self.register_google_account().await,
                "register your Google account",
            ),
            other => return ToolOutput::error(format!("unknown tool: {other}")),
        };

        match result {
            Ok(text) => ToolOutput::success(text),
            Err(e) => {
                warn!(user_id = self.user_id, tool = name, error = %e, "tool call failed");
                ToolOutput::error(format!(
                    "I encountered an error while trying to {action}: {e}"
                ))
            }
        }
    }

    async fn register_from_json(&self, input: serde_json::Value) -> Result<String> {
        let input: RegisterMealInput = serde_json::from_value(input)
            .map_err(|e| Error::Validation(format!("invalid meal arguments: {e}")))?;
        let meal_type = MealType::parse(&input.meal_type).ok_or_else(|| {
            Error::Validation(format!(
                "meal_type must be one of breakfast, lunch, dinner, snack (got {:?})",
                input.meal_type
            ))
        })?;
        self.register_nutritional_info(NewNutritionRecord {
            calories: input.calories,
            proteins: input.proteins,
            carbs: input.carbs,
            fats: input.fats,
            meal_type,
            extra_details: input.extra_details.filter(|d| !d.trim().is_empty()),
        })
        .await
    }

    async fn query_from_json(&self, input: serde_json::Value) -> Result<String> {
        let input: QueryInput = if input.is_null() {
            QueryInput::default()
        } else {
            serde_json::from_value(input)
                .map_err(|e| Error::Validation(format!("invalid query arguments: {e}")))?
        };
        let start = parse_date(input.start_date.as_deref())?;
        let end = parse_date(input.end_date.as_deref())?;
        self.query_nutritional_info(start, end).await
    }

    /// Save a meal, mirror it to the user's sheet when connected, and summarize.
    pub async fn register_nutritional_info(&self, meal: NewNutritionRecord) -> Result<String> {
        info!(user_id = self.user_id, calories = meal.calories, "registering meal");
        let (record, has_sheet_config) = {
            let store = self.store.lock().await;
            let record = store.save_nutrition_record(self.user_id, &meal)?;
            let has_config = store.spreadsheet_config(self.user_id)?.is_some();
            (record, has_config)
        };

        let spreadsheet_id = match (&self.sheets, has_sheet_config) {
            (Some(sheets), true) => match sheets.append_record(&record).await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(
                        user_id = self.user_id,
                        record_id = record.id,
                        error = %e,
                        "failed to mirror meal to spreadsheet, kept internal record"
                    );
                    None
                }
            },
            _ => None,
        };

        let mut lines = vec![
            "Successfully registered your meal information!".to_string(),
            format!("Calories: {}", record.calories),
            format!("Proteins: {}g", record.proteins),
            format!("Carbs: {}g", record.carbs),
            format!("Fats: {}g", record.fats),
            format!("Meal Type: {}", record.meal_type.as_str()),
        ];
        match spreadsheet_id {
            Some(id) => lines.push(format!(
                "The data has been saved to your internal records and Google Sheet.\n\n📊 View your spreadsheet: {}",
                spreadsheet_url(&id)
            )),
            None => lines.push(
                "The data has been saved to your internal records, if you want to see it in your \
                 Google Sheet, you need to connect your Google account, ask me how in case you \
                 want to do that."
                    .to_string(),
            ),
        }
        Ok(lines.join("\n"))
    }

    /// Meals between two days (inclusive), oldest first. Missing bounds mean
    /// "from the beginning" and "through today".
    pub async fn query_nutritional_info(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<String> {
        let start = start.unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH.date_naive());
        let end = end.unwrap_or_else(|| Utc::now().date_naive());
        info!(user_id = self.user_id, %start, %end, "querying meals");

        let records = self
            .store
            .lock()
            .await
            .nutrition_records_between(self.user_id, start, end)?;

        if records.is_empty() {
            return Ok("No nutritional records found.".to_string());
        }

        let lines: Vec<String> = records
            .iter()
            .map(|r| {
                let mut parts = vec![
                    format!("Date: {}", r.created_at.format("%Y-%m-%d")),
                    format!("Time: {}", r.created_at.format("%H:%M:%S")),
                    format!("Meal: {}", r.meal_type.as_str()),
                    format!("Calories: {}", r.calories),
                    format!("Proteins: {}g", r.proteins),
                    format!("Carbs: {}g", r.carbs),
                    format!("Fats: {}g", r.fats),
                ];
                if let Some(details) = &r.extra_details {
                    parts.push(format!("Details: {details}"));
                }
                parts.join(" | ")
            })
            .collect();
        Ok(lines.join("\n"))
    }

    pub async fn register_google_account(&self) -> Result<String> {
        if self.store.lock().await.spreadsheet_config(self.user_id)?.is_some() {
            return Ok("Your Google account is already connected! Your nutritional data will be \
                 automatically saved to your Google Sheet when you register meals."
                .to_string());
        }

        let (Some(oauth), Some(redirect_uri)) = (&self.oauth, self.redirect_uri.as_deref()) else {
            return Ok("I need to connect your Google account to enable Google Sheets \
                 integration. However, the server configuration is incomplete. Please contact \
                 support."
                .to_string());
        };

        let url = oauth.authorization_url(self.user_id, redirect_uri)?;
        info!(user_id = self.user_id, "issued Google authorization link");
        Ok(format!(
            "To enable Google Sheets integration, I need permission to access your Google \
             Sheets. Please authorize the connection by clicking this link:\n\n{url}\n\nAfter \
             authorizing, your nutritional data will be automatically saved to your Google Sheet."
        ))
    }
}

fn parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| Error::Validation(format!("invalid date {s:?}, expected YYYY-MM-DD: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nutribot_common::IdentityKey;
    use nutribot_db::{ConversationStore, UserProfile};
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn toolbox(redirect: Option<&str>) -> NutritionToolbox {
        let store = ConversationStore::in_memory().unwrap().into_shared();
        let user_id = store
            .lock()
            .await
            .resolve_or_create_user(&[IdentityKey::Telegram("99".into())], &UserProfile::default())
            .unwrap()
            .id;
        NutritionToolbox::new(user_id, redirect.map(str::to_string), store)
    }

    #[tokio::test]
    async fn register_without_google_keeps_internal_record() {
        let tools = toolbox(None).await;
        let out = tools
            .execute(
                REGISTER_NUTRITIONAL_INFO,
                json!({
                    "calories": 450, "proteins": 30, "carbs": 40.5, "fats": 12,
                    "meal_type": "Lunch", "extra_details": "rice and chicken"
                }),
            )
            .await;

        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.starts_with("Successfully registered your meal information!"));
        assert!(out.content.contains("Carbs: 40.5g"));
        assert!(out.content.contains("Meal Type: lunch"));
        assert!(out.content.contains("saved to your internal records, if you want"));

        let listing = tools.query_nutritional_info(None, None).await.unwrap();
        assert!(listing.contains("Meal: lunch"));
        assert!(listing.contains("Details: rice and chicken"));
    }

    #[tokio::test]
    async fn invalid_meal_arguments_become_error_output() {
        let tools = toolbox(None).await;

        let bad_meal = tools
            .execute(
                REGISTER_NUTRITIONAL_INFO,
                json!({"calories": 1, "proteins": 1, "carbs": 1, "fats": 1, "meal_type": "brunch"}),
            )
            .await;
        assert!(bad_meal.is_error);
        assert!(bad_meal.content.starts_with("I encountered an error while trying to register"));

        let negative = tools
            .execute(
                REGISTER_NUTRITIONAL_INFO,
                json!({"calories": -5, "proteins": 1, "carbs": 1, "fats": 1, "meal_type": "snack"}),
            )
            .await;
        assert!(negative.is_error);

        assert_eq!(
            tools.query_nutritional_info(None, None).await.unwrap(),
            "No nutritional records found."
        );
    }

    #[tokio::test]
    async fn query_respects_date_bounds_and_rejects_bad_dates() {
        let tools = toolbox(None).await;
        tools
            .register_nutritional_info(NewNutritionRecord {
                calories: 200.0,
                proteins: 5.0,
                carbs: 30.0,
                fats: 4.0,
                meal_type: MealType::Snack,
                extra_details: None,
            })
            .await
            .unwrap();

        let today = Utc::now().date_naive();
        let hits = tools.query_nutritional_info(Some(today), Some(today)).await.unwrap();
        assert_eq!(hits.lines().count(), 1);
        assert!(hits.starts_with(&format!("Date: {today} | Time: ")));
        assert!(!hits.contains("Details:"));

        let yesterday = today.pred_opt().unwrap();
        let misses = tools
            .query_nutritional_info(Some(yesterday), Some(yesterday))
            .await
            .unwrap();
        assert_eq!(misses, "No nutritional records found.");

        let bad = tools
            .execute(QUERY_NUTRITIONAL_INFO, json!({"start_date": "04/03/2026"}))
            .await;
        assert!(bad.is_error);
    }

    #[tokio::test]
    async fn google_account_messages() {
        let incomplete = toolbox(None).await;
        let text = incomplete.register_google_account().await.unwrap();
        assert!(text.contains("server configuration is incomplete"));

        let tools = toolbox(Some("https://bot.example.com/auth/google/callback"))
            .await
            .with_google(
                GoogleOAuthClient::new("cid", "secret"),
                SheetsClient::new(
                    GoogleOAuthClient::new("cid", "secret"),
                    ConversationStore::in_memory().unwrap().into_shared(),
                ),
            );
        let link = tools.register_google_account().await.unwrap();
        assert!(link.contains("https://accounts.google.com/o/oauth2/auth?"));
        assert!(link.contains(&format!("state={}", tools.user_id)));

        tools
            .store
            .lock()
            .await
            .save_spreadsheet_config(tools.user_id, "ya29.a", "1//r", None)
            .unwrap();
        let connected = tools.register_google_account().await.unwrap();
        assert!(connected.starts_with("Your Google account is already connected!"));
    }

    #[tokio::test]
    async fn connected_user_gets_spreadsheet_link() {
        let server = MockServer::start().await;
        let tools = toolbox(Some("https://bot.example.com/auth/google/callback")).await;
        tools
            .store
            .lock()
            .await
            .save_spreadsheet_config(tools.user_id, "ya29.a", "1//r", None)
            .unwrap();
        let oauth = GoogleOAuthClient::new("cid", "secret")
            .with_endpoints(format!("{}/auth", server.uri()), format!("{}/token", server.uri()));
        let sheets = SheetsClient::new(oauth.clone(), tools.store.clone()).with_api_base(server.uri());
        let tools = tools.with_google(oauth, sheets);

        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"spreadsheetId": "abc123"})))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v4/spreadsheets/abc123/values/A1:H1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/v4/spreadsheets/abc123/values/.*:append$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let out = tools
            .execute(
                REGISTER_NUTRITIONAL_INFO,
                json!({"calories": 600, "proteins": 40, "carbs": 50, "fats": 20, "meal_type": "dinner"}),
            )
            .await;
        assert!(!out.is_error);
        assert!(out
            .content
            .contains("📊 View your spreadsheet: https://docs.google.com/spreadsheets/d/abc123"));
    }

    #[tokio::test]
    async fn sheet_failure_still_reports_success() {
        let server = MockServer::start().await;
        let tools = toolbox(None).await;
        tools
            .store
            .lock()
            .await
            .save_spreadsheet_config(tools.user_id, "ya29.a", "1//r", Some("broken"))
            .unwrap();
        let oauth = GoogleOAuthClient::new("cid", "secret")
            .with_endpoints(format!("{}/auth", server.uri()), format!("{}/token", server.uri()));
        let sheets = SheetsClient::new(oauth.clone(), tools.store.clone()).with_api_base(server.uri());
        let tools = tools.with_google(oauth, sheets);

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let out = tools
            .execute(
                REGISTER_NUTRITIONAL_INFO,
                json!({"calories": 100, "proteins": 1, "carbs": 20, "fats": 1, "meal_type": "snack"}),
            )
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("saved to your internal records, if you want"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let tools = toolbox(None).await;
        let out = tools.execute("delete_everything", json!({})).await;
        assert!(out.is_error);
        assert_eq!(out.content, "unknown tool: delete_everything");
    }
}
