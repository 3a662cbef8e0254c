//! Credential lifecycle for the calendar integration.
//!
//! Obtains a credential through the interactive authorization-code flow,
//! persists it through a [`CredentialStore`], and keeps it fresh with
//! silent refreshes driven by the [`TokenLifecycleManager`].

pub mod credential;
pub mod error;
pub mod google;
pub mod lifecycle;
pub mod oauth;
pub mod storage;

pub use credential::{Credential, TokenGrant};
pub use error::{AuthError, StorageError};
pub use google::{TokenEndpointClient, TokenRefresher};
pub use lifecycle::{
    Clock, RefreshDecision, RefreshOutcome, SessionState, SystemClock, TokenLifecycleManager,
    REFRESH_THRESHOLD_SECS,
};
pub use oauth::{AuthorizationConfig, BrowserAuthorizer, InteractiveAuthorizer};
pub use storage::{
    CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore,
    CREDENTIAL_KEY,
};
