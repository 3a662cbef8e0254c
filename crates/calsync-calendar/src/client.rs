//! Google Calendar API client.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use tracing::instrument;

use crate::error::{CalendarError, PROTECTED_EVENT_MARKER};
use crate::types::*;

pub const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
pub const DEFAULT_CALENDAR_ID: &str = "primary";
pub const DEFAULT_MAX_RESULTS: u32 = 20;

/// Stateless client for one remote calendar. The access token is supplied
/// per call; keeping it fresh is the caller's job.
#[derive(Debug, Clone)]
pub struct CalendarClient {
    client: reqwest::Client,
    base_url: String,
    calendar_id: String,
    max_results: u32,
}

impl Default for CalendarClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CalendarClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: CALENDAR_API_BASE.to_string(),
            calendar_id: DEFAULT_CALENDAR_ID.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_calendar_id(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = calendar_id.into();
        self
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let Ok(client) = reqwest::Client::builder().timeout(timeout).build() {
            self.client = client;
        }
        self
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(&self.calendar_id),
        )
    }

    fn auth_header(access_token: &str) -> Result<String, CalendarError> {
        if access_token.trim().is_empty() {
            return Err(CalendarError::MissingAccessToken);
        }
        Ok(format!("Bearer {}", access_token))
    }

    /// List upcoming events, starting now.
    pub async fn list_upcoming(
        &self,
        access_token: &str,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        self.list_upcoming_from(access_token, Utc::now()).await
    }

    /// List events starting at or after `time_min`, recurring events expanded.
    /// The provider orders by start; that order is kept as received.
    #[instrument(skip(self, access_token), level = "info")]
    pub async fn list_upcoming_from(
        &self,
        access_token: &str,
        time_min: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let auth = Self::auth_header(access_token)?;

        let response = self
            .client
            .get(self.events_url())
            .header("Authorization", auth)
            .query(&[
                ("timeMin", time_min.to_rfc3339_opts(SecondsFormat::Millis, true)),
                ("maxResults", self.max_results.to_string()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_failure(status, body));
        }

        let listing: EventListResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("Unparseable event list: {}", e);
            CalendarError::ProviderError {
                status: status.as_u16(),
                body,
            }
        })?;

        let events = dedupe_listing(listing.items);
        tracing::debug!(count = events.len(), "Listed upcoming events");
        Ok(events)
    }

    /// Create a whole-day event. The created resource is not returned;
    /// re-list to observe it.
    #[instrument(skip(self, access_token, event), fields(summary = %event.summary), level = "info")]
    pub async fn create(&self, access_token: &str, event: &NewEvent) -> Result<(), CalendarError> {
        let auth = Self::auth_header(access_token)?;

        let response = self
            .client
            .post(self.events_url())
            .header("Authorization", auth)
            .json(&event.to_request())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!("Event created");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, body))
    }

    /// Delete an event. Only `204 No Content` counts as success.
    #[instrument(skip(self, access_token), level = "info")]
    pub async fn delete(&self, access_token: &str, event_id: &str) -> Result<(), CalendarError> {
        let auth = Self::auth_header(access_token)?;
        let url = format!("{}/{}", self.events_url(), urlencoding::encode(event_id));

        let response = self
            .client
            .delete(&url)
            .header("Authorization", auth)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            tracing::info!("Event deleted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if body.contains(PROTECTED_EVENT_MARKER) {
            tracing::info!(status = status.as_u16(), "Provider refused to delete a managed event");
            return Err(CalendarError::ProtectedEvent {
                event_id: event_id.to_string(),
            });
        }

        Err(classify_failure(status, body))
    }
}

fn classify_failure(status: StatusCode, body: String) -> CalendarError {
    if status == StatusCode::UNAUTHORIZED {
        tracing::warn!("Calendar request rejected: access token not accepted");
        CalendarError::Unauthorized
    } else {
        tracing::warn!(status = status.as_u16(), "Calendar request failed");
        CalendarError::ProviderError {
            status: status.as_u16(),
            body,
        }
    }
}
