//! Calendar-specific error types.

use thiserror::Error;

/// Text the provider puts in a delete rejection for system-managed events
/// (birthdays, holidays, out-of-office and similar generated entries).
pub const PROTECTED_EVENT_MARKER: &str = "eventTypeRestriction";

#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("No access token supplied")]
    MissingAccessToken,

    #[error("Access token was rejected by the provider")]
    Unauthorized,

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Provider returned {status}: {body}")]
    ProviderError { status: u16, body: String },

    #[error("Event {event_id} is managed by the provider and cannot be deleted")]
    ProtectedEvent { event_id: String },
}

impl CalendarError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingAccessToken => "Please sign in to your Google account".to_string(),
            Self::Unauthorized => "Your session is no longer valid. Please sign in again.".to_string(),
            Self::Transport(_) => "Network error. Check your connection.".to_string(),
            Self::ProviderError { status, body } => {
                format!("Calendar error ({}): {}", status, body)
            }
            Self::ProtectedEvent { .. } => {
                "This event is created automatically by Google Calendar (for example a birthday or holiday) and can't be deleted from this app.".to_string()
            }
        }
    }

    /// Whether the caller should refresh or re-authorize before trying again.
    pub fn should_reauthorize(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::MissingAccessToken)
    }

    /// Whether a retry may succeed. Only safe for read-only calls: a retried
    /// create can duplicate the event.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
