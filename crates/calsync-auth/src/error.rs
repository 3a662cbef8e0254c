//! Authentication and credential storage errors.

use thiserror::Error;

/// Failures of the durable key-value store backing the credential.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage IO failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Stored value is not valid UTF-8")]
    InvalidEncoding,

    #[error("Credential record could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<keyring::Error> for StorageError {
    fn from(e: keyring::Error) -> Self {
        StorageError::Keyring(e.to_string())
    }
}

/// Outcomes of credential lifecycle operations that are not a usable credential.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The user abandoned the interactive flow. Expected and benign.
    #[error("Authorization cancelled by user")]
    UserCancelled,

    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("Access token expired and no refresh token is available")]
    ExpiredNoRefresh,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("No active session")]
    NotSignedIn,

    #[error("Credential storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::UserCancelled => "Sign-in was cancelled.",
            Self::AuthorizationFailed(_) => "Sign-in failed. Please try again.",
            Self::ExpiredNoRefresh => "Your session has expired. Please sign in again.",
            Self::RefreshFailed(_) => "Could not renew your session. Please sign in again.",
            Self::NotSignedIn => "You are signed out. Please sign in.",
            Self::Storage(_) => "Failed to access saved credentials. Please try again.",
        }
    }

    /// Whether the caller should send the user through interactive authorization.
    pub fn should_reauthorize(&self) -> bool {
        matches!(
            self,
            Self::ExpiredNoRefresh | Self::RefreshFailed(_) | Self::NotSignedIn
        )
    }
}
