pub mod oauth;
pub mod sheets;

pub use oauth::{GoogleOAuthClient, GoogleTokens};
pub use sheets::{SHEET_HEADERS, SheetsClient, WORKSHEET_NAME, spreadsheet_url};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct GoogleApiErrorBody {
    error: Option<GoogleApiError>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GoogleApiError {
    Object { message: Option<String> },
    String(String),
}

/// Best-effort human-readable message from a Google error payload.
fn google_error_message(body: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<GoogleApiErrorBody>(body) else {
        return body.trim().to_string();
    };
    let main = match parsed.error {
        Some(GoogleApiError::Object { message: Some(m) }) => Some(m),
        Some(GoogleApiError::String(s)) => Some(s),
        _ => None,
    };
    match (main, parsed.error_description) {
        (Some(m), Some(d)) => format!("{m}: {d}"),
        (Some(m), None) => m,
        (None, Some(d)) => d,
        (None, None) => body.trim().to_string(),
    }
}
