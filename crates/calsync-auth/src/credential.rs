use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One authenticated session with the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Access token for API requests
    pub access_token: String,

    /// Absolute instant the access token stops being accepted
    pub access_token_expiry: DateTime<Utc>,

    /// Long-lived token used for silent refresh
    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub id_token: Option<String>,
}

impl Credential {
    /// Time left before the access token expires (negative once expired).
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.access_token_expiry - now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.access_token_expiry
    }

    /// A credential with a blank access token is never handed out as authorized.
    pub fn has_usable_access_token(&self) -> bool {
        !self.access_token.trim().is_empty()
    }

    /// Fold a refresh response into this credential.
    ///
    /// The access token and expiry are replaced; the refresh and id tokens are
    /// kept unless the response carries new ones.
    pub fn merge_refresh(self, grant: TokenGrant) -> Self {
        Self {
            access_token: grant.access_token,
            access_token_expiry: grant.access_token_expiry,
            refresh_token: grant.refresh_token.or(self.refresh_token),
            id_token: grant.id_token.or(self.id_token),
        }
    }
}

/// Tokens returned by an authorization-code exchange or a refresh exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub access_token_expiry: DateTime<Utc>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
}

impl From<TokenGrant> for Credential {
    fn from(grant: TokenGrant) -> Self {
        Self {
            access_token: grant.access_token,
            access_token_expiry: grant.access_token_expiry,
            refresh_token: grant.refresh_token,
            id_token: grant.id_token,
        }
    }
}
