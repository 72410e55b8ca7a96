use nutribot_common::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use super::google_error_message;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

pub const GOOGLE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/userinfo.email",
    "openid",
    "https://www.googleapis.com/auth/userinfo.profile",
];

/// Token pair returned by a successful authorization-code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleTokens {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// Google OAuth 2.0 web-server flow for Sheets access.
#[derive(Clone)]
pub struct GoogleOAuthClient {
    http: Client,
    client_id: String,
    client_secret: String,
    auth_url: String,
    token_url: String,
}

impl GoogleOAuthClient {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }

    /// Point the client at different endpoints (used against mock servers).
    pub fn with_endpoints(mut self, auth_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into();
        self.token_url = token_url.into();
        self
    }

    /// Consent URL for `user_id`. The internal user id travels in `state`
    /// so the callback knows whose tokens it received.
    pub fn authorization_url(&self, user_id: i64, redirect_uri: &str) -> Result<String> {
        let scope = GOOGLE_SCOPES.join(" ");
        let state = user_id.to_string();
        let url = Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("include_granted_scopes", "true"),
                ("prompt", "consent"),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| Error::Config(format!("invalid Google auth URL: {e}")))?;
        Ok(url.into())
    }

    /// Trade an authorization code for tokens. A refresh token is mandatory
    /// because rows are appended long after the user leaves the consent page.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<GoogleTokens> {
        let payload = self
            .token_request(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .await?;

        let access_token = payload
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Agent("Google token response missing access_token".into()))?;
        let Some(refresh_token) = payload.refresh_token.filter(|t| !t.is_empty()) else {
            warn!("Google token exchange returned no refresh token");
            return Err(Error::Agent(
                "no refresh token received; revoke the app's access in your Google account and try again"
                    .into(),
            ));
        };

        info!("exchanged Google authorization code");
        Ok(GoogleTokens {
            access_token,
            refresh_token,
        })
    }

    /// Obtain a fresh access token from a stored refresh token.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<String> {
        let payload = self
            .token_request(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .await?;

        payload
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Agent("Google token refresh returned no access_token".into()))
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<GoogleTokenResponse> {
        let response = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("Google token request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Agent(format!("failed to read Google token response: {e}")))?;

        if !status.is_success() {
            return Err(Error::Agent(format!(
                "Google token endpoint returned {status}: {}",
                google_error_message(&body)
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::Agent(format!("invalid Google token response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn authorization_url_carries_offline_consent_and_state() {
        let client = GoogleOAuthClient::new("cid.apps.googleusercontent.com", "secret");
        let url = client
            .authorization_url(42, "https://bot.example.com/auth/google/callback")
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("accounts.google.com"));
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["state"], "42");
        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["prompt"], "consent");
        assert_eq!(pairs["include_granted_scopes"], "true");
        assert_eq!(pairs["redirect_uri"], "https://bot.example.com/auth/google/callback");
        assert!(pairs["scope"].contains("https://www.googleapis.com/auth/spreadsheets"));
        assert!(pairs["scope"].contains("openid"));
    }

    #[tokio::test]
    async fn exchange_code_returns_both_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.fresh",
                "refresh_token": "1//refresh",
                "expires_in": 3599
            })))
            .mount(&server)
            .await;

        let client = GoogleOAuthClient::new("cid", "secret")
            .with_endpoints(format!("{}/auth", server.uri()), format!("{}/token", server.uri()));
        let tokens = client.exchange_code("4/abc", "https://x/cb").await.unwrap();
        assert_eq!(tokens.access_token, "ya29.fresh");
        assert_eq!(tokens.refresh_token, "1//refresh");
    }

    #[tokio::test]
    async fn exchange_without_refresh_token_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "ya29.only"})),
            )
            .mount(&server)
            .await;

        let client = GoogleOAuthClient::new("cid", "secret")
            .with_endpoints(format!("{}/auth", server.uri()), format!("{}/token", server.uri()));
        let err = client.exchange_code("4/abc", "https://x/cb").await.unwrap_err();
        assert!(err.to_string().contains("no refresh token"));
    }

    #[tokio::test]
    async fn refresh_surfaces_google_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let client = GoogleOAuthClient::new("cid", "secret")
            .with_endpoints(format!("{}/auth", server.uri()), format!("{}/token", server.uri()));
        let err = client.refresh_access_token("1//stale").await.unwrap_err();
        assert!(err.to_string().contains("invalid_grant"));
    }
}
