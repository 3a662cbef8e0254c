use calsync_auth::AuthError;
use calsync_calendar::CalendarError;
use calsync_core::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Calendar(#[from] CalendarError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Not signed in")]
    NotSignedIn,
}

impl SyncError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(e) => e.user_message().to_string(),
            Self::Calendar(e) => e.user_message(),
            Self::Config(e) => e.user_message().to_string(),
            Self::NotSignedIn => "You are not signed in. Run `calsync login` first.".to_string(),
        }
    }

    /// Whether the user has to go through interactive sign-in again.
    pub fn should_reauthorize(&self) -> bool {
        match self {
            Self::Auth(e) => e.should_reauthorize(),
            Self::Calendar(e) => e.should_reauthorize(),
            Self::Config(_) => false,
            Self::NotSignedIn => true,
        }
    }
}
