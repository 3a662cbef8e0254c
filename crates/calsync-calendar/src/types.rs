//! Calendar event types and provider wire formats.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Start of an event: a whole day or an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTime {
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
}

impl EventTime {
    /// Instant of the start. A date-only value is midnight UTC of that date.
    pub fn as_datetime(&self) -> DateTime<Utc> {
        match self {
            EventTime::DateTime(dt) => *dt,
            EventTime::Date(d) => d.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    pub fn is_all_day(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }
}

impl std::fmt::Display for EventTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventTime::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M UTC")),
            EventTime::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// One remote calendar entry as exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: Option<String>,
    /// `None` when the provider sent no start or one that could not be parsed.
    pub start: Option<EventTime>,
}

impl CalendarEvent {
    /// Title for display; untitled events render as `(untitled)`.
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("(untitled)")
    }

    /// Start for display; an unknown start renders as `date unavailable`.
    pub fn display_start(&self) -> String {
        match &self.start {
            Some(start) => start.to_string(),
            None => "date unavailable".to_string(),
        }
    }

    /// Convert a provider event. A missing or unparseable start is kept as `None`.
    pub fn from_api(api: ApiEvent) -> Self {
        let start = api.start.as_ref().and_then(parse_event_time);
        if start.is_none() {
            tracing::warn!(event_id = %api.id, "Event has no usable start");
        }
        Self {
            id: api.id,
            title: api.summary,
            start,
        }
    }
}

/// Event to submit to the provider. Whole-day only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub summary: String,
    pub description: Option<String>,
    pub start_date: NaiveDate,
    /// Exclusive end date.
    pub end_date: NaiveDate,
}

impl NewEvent {
    /// A one-day event on `date`.
    pub fn all_day(summary: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            summary: summary.into(),
            description: None,
            start_date: date,
            end_date: date.succ_opt().unwrap_or(date),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.description = (!description.trim().is_empty()).then_some(description);
        self
    }

    pub(crate) fn to_request(&self) -> InsertEventRequest<'_> {
        InsertEventRequest {
            summary: &self.summary,
            description: self.description.as_deref(),
            start: ApiDate {
                date: self.start_date,
            },
            end: ApiDate {
                date: self.end_date,
            },
        }
    }
}

// API Request/Response Types

#[derive(Debug, Serialize)]
pub(crate) struct InsertEventRequest<'a> {
    pub summary: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    pub start: ApiDate,
    pub end: ApiDate,
}

#[derive(Debug, Serialize)]
pub(crate) struct ApiDate {
    pub date: NaiveDate,
}

/// Google Calendar API event response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEvent {
    pub id: String,
    pub summary: Option<String>,
    pub start: Option<ApiEventTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEventTime {
    pub date_time: Option<String>,
    pub date: Option<String>,
}

/// API response for event list.
#[derive(Debug, Deserialize)]
pub struct EventListResponse {
    #[serde(default)]
    pub items: Vec<ApiEvent>,
}

fn parse_event_time(t: &ApiEventTime) -> Option<EventTime> {
    if let Some(dt) = &t.date_time {
        return DateTime::parse_from_rfc3339(dt)
            .ok()
            .map(|d| EventTime::DateTime(d.with_timezone(&Utc)));
    }
    t.date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .map(EventTime::Date)
}

/// Turn a provider listing into an id-unique event list, keeping the
/// provider's order. The first occurrence of a repeated id wins.
pub(crate) fn dedupe_listing(items: Vec<ApiEvent>) -> Vec<CalendarEvent> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|api| {
            let fresh = seen.insert(api.id.clone());
            if !fresh {
                tracing::debug!(event_id = %api.id, "Dropping duplicate event id");
            }
            fresh
        })
        .map(CalendarEvent::from_api)
        .collect()
}
