use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::OAuthClientConfig;
use crate::error::{AppError, AppResult};
use crate::services::credentials::Credential;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_CALENDAR_API_URL: &str = "https://www.googleapis.com/calendar/v3";

// ============================================================================
// Provider contract
// ============================================================================

/// The calendar provider as seen by the booking flow.
///
/// One async operation per provider call; the HTTP implementation lives in
/// [`GoogleCalendarClient`].
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// URL of the consent page where a user grants `scopes` and receives a code.
    fn consent_url(&self, scopes: &[String]) -> String;

    async fn exchange_code(&self, code: &str) -> AppResult<Credential>;

    /// Trade the credential's refresh token for a new access token.
    async fn refresh_credential(&self, credential: &Credential) -> AppResult<Credential>;

    async fn query_free_busy(
        &self,
        credential: &Credential,
        request: &FreeBusyRequest,
    ) -> AppResult<FreeBusyResponse>;

    async fn create_event(
        &self,
        credential: &Credential,
        calendar_id: &str,
        event: &EventPayload,
    ) -> AppResult<CreatedEvent>;
}

// ============================================================================
// Free/busy types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeBusyRequest {
    pub time_min: DateTime<Utc>,
    pub time_max: DateTime<Utc>,
    pub time_zone: String,
    pub items: Vec<FreeBusyItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreeBusyItem {
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FreeBusyResponse {
    #[serde(default)]
    pub calendars: HashMap<String, CalendarBusy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalendarBusy {
    #[serde(default)]
    pub busy: Vec<BusyInterval>,
    #[serde(default)]
    pub errors: Vec<FreeBusyError>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FreeBusyError {
    pub domain: Option<String>,
    pub reason: Option<String>,
}

// ============================================================================
// Event types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPayload {
    pub summary: String,
    pub description: String,
    pub start: EventDateTime,
    pub end: EventDateTime,
    pub attendees: Vec<EventAttendee>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    pub date_time: DateTime<Utc>,
    pub time_zone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventAttendee {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedEvent {
    pub id: Option<String>,
    pub html_link: String,
    pub summary: Option<String>,
    pub location: Option<String>,
    pub hangout_link: Option<String>,
}

// ============================================================================
// OAuth types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    fn into_credential(self, previous: Option<&Credential>) -> Credential {
        let expiry_date = self
            .expires_in
            .map(|secs| (Utc::now() + Duration::seconds(secs)).timestamp_millis());

        Credential {
            access_token: self.access_token,
            // Google omits the refresh token on refresh responses
            refresh_token: self
                .refresh_token
                .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
            scope: if self.scope.is_empty() {
                previous.map(|p| p.scope.clone()).unwrap_or_default()
            } else {
                self.scope
            },
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expiry_date,
        }
    }
}

// ============================================================================
// HTTP client
// ============================================================================

#[derive(Debug, Clone)]
pub struct GoogleCalendarClient {
    client: Client,
    oauth: OAuthClientConfig,
    auth_url: String,
    token_url: String,
    api_url: String,
    max_attempts: usize,
}

impl GoogleCalendarClient {
    pub fn new(oauth: OAuthClientConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            oauth,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            api_url: GOOGLE_CALENDAR_API_URL.to_string(),
            max_attempts: 3,
        })
    }

    /// Point the client at different token and calendar endpoints.
    #[cfg(test)]
    pub fn with_base_urls(mut self, token_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self.api_url = api_url.into();
        self
    }

    #[cfg(test)]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Send a request, retrying transient failures (429, 5xx, network errors)
    /// with exponential backoff.
    async fn send_with_backoff<F>(&self, make_request: F) -> AppResult<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut backoff_secs: u64 = 1;
        let max_backoff_secs: u64 = 4;

        for attempt in 0..self.max_attempts {
            match (make_request)().send().await {
                Ok(resp) => {
                    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS
                        || resp.status().is_server_error()
                    {
                        if attempt + 1 >= self.max_attempts {
                            return Ok(resp);
                        }

                        let mut wait_secs = backoff_secs;
                        if let Some(h) = resp.headers().get("retry-after") {
                            if let Ok(s) = h.to_str() {
                                if let Ok(parsed) = s.parse::<u64>() {
                                    wait_secs = parsed.min(max_backoff_secs);
                                }
                            }
                        }

                        tracing::warn!(
                            "Transient Google error (status: {}). Retrying in {}s (attempt {}/{})",
                            resp.status(),
                            wait_secs,
                            attempt + 1,
                            self.max_attempts
                        );

                        tokio::time::sleep(std::time::Duration::from_secs(wait_secs)).await;
                        backoff_secs = std::cmp::min(backoff_secs * 2, max_backoff_secs);
                        continue;
                    }

                    // Callers decide how to treat 4xx
                    return Ok(resp);
                }
                Err(e) => {
                    if attempt + 1 >= self.max_attempts {
                        return Err(e.into());
                    }
                    tracing::warn!(
                        "HTTP request failed: {}. Retrying in {}s (attempt {}/{})",
                        e,
                        backoff_secs,
                        attempt + 1,
                        self.max_attempts
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                    backoff_secs = std::cmp::min(backoff_secs * 2, max_backoff_secs);
                }
            }
        }

        Err(AppError::Provider("No attempts were made".to_string()))
    }

    async fn token_request(&self, params: &[(&str, &str)], what: &str) -> AppResult<TokenResponse> {
        let response = self
            .send_with_backoff(|| self.client.post(&self.token_url).form(params))
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "Failed to {} ({}): {}",
                what, status, error_text
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AppError::Provider(format!("Failed to parse token response: {}", e)))
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendarClient {
    fn consent_url(&self, scopes: &[String]) -> String {
        let scope = scopes.join(" ");
        format!(
            "{}?access_type=offline&scope={}&response_type=code&client_id={}&redirect_uri={}",
            self.auth_url,
            urlencoding::encode(&scope),
            urlencoding::encode(&self.oauth.client_id),
            urlencoding::encode(&self.oauth.redirect_uri)
        )
    }

    async fn exchange_code(&self, code: &str) -> AppResult<Credential> {
        let token = self
            .token_request(
                &[
                    ("code", code),
                    ("client_id", self.oauth.client_id.as_str()),
                    ("client_secret", self.oauth.client_secret.as_str()),
                    ("redirect_uri", self.oauth.redirect_uri.as_str()),
                    ("grant_type", "authorization_code"),
                ],
                "exchange code",
            )
            .await?;

        Ok(token.into_credential(None))
    }

    async fn refresh_credential(&self, credential: &Credential) -> AppResult<Credential> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| AppError::Provider("Credential has no refresh token".to_string()))?;

        let token = self
            .token_request(
                &[
                    ("refresh_token", refresh_token),
                    ("client_id", self.oauth.client_id.as_str()),
                    ("client_secret", self.oauth.client_secret.as_str()),
                    ("grant_type", "refresh_token"),
                ],
                "refresh token",
            )
            .await?;

        Ok(token.into_credential(Some(credential)))
    }

    async fn query_free_busy(
        &self,
        credential: &Credential,
        request: &FreeBusyRequest,
    ) -> AppResult<FreeBusyResponse> {
        let response = self
            .send_with_backoff(|| {
                self.client
                    .post(format!("{}/freeBusy", self.api_url))
                    .bearer_auth(&credential.access_token)
                    .json(request)
            })
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "Failed to query free/busy ({}): {}",
                status, error_text
            )));
        }

        response
            .json::<FreeBusyResponse>()
            .await
            .map_err(|e| AppError::Provider(format!("Failed to parse free/busy response: {}", e)))
    }

    async fn create_event(
        &self,
        credential: &Credential,
        calendar_id: &str,
        event: &EventPayload,
    ) -> AppResult<CreatedEvent> {
        let url = format!(
            "{}/calendars/{}/events",
            self.api_url,
            urlencoding::encode(calendar_id)
        );

        // Not retried: a retry after a lost response could book twice.
        let response = self
            .client
            .post(&url)
            .bearer_auth(&credential.access_token)
            .json(event)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "Failed to create event ({}): {}",
                status, error_text
            )));
        }

        response
            .json::<CreatedEvent>()
            .await
            .map_err(|e| AppError::Provider(format!("Failed to parse event response: {}", e)))
    }
}
