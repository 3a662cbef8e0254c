//! Wiring of the production collaborators from configuration.

use std::time::Duration;

use calsync_auth::{
    AuthorizationConfig, BrowserAuthorizer, CredentialStore, FileCredentialStore,
    KeyringCredentialStore, TokenEndpointClient, TokenLifecycleManager,
};
use calsync_calendar::CalendarClient;
use calsync_core::{CalendarConfig, Config, ConfigError, GoogleConfig, StorageBackend, StorageConfig};

use crate::error::SyncError;
use crate::orchestrator::SyncOrchestrator;

pub type AppOrchestrator =
    SyncOrchestrator<Box<dyn CredentialStore>, BrowserAuthorizer, TokenEndpointClient>;

pub fn authorization_config(google: &GoogleConfig) -> AuthorizationConfig {
    AuthorizationConfig {
        issuer: google.issuer.clone(),
        client_id: google.client_id.clone(),
        client_secret: google.client_secret.clone(),
        redirect_uri: google.redirect_uri.clone(),
        scopes: google.scopes.clone(),
        authorization_endpoint: google.authorization_endpoint.clone(),
        token_endpoint: google.token_endpoint.clone(),
    }
}

pub fn credential_store(storage: &StorageConfig) -> Result<Box<dyn CredentialStore>, ConfigError> {
    match storage.backend {
        StorageBackend::File => {
            let dir = storage.token_directory()?;
            tracing::debug!("Using file credential store at {}", dir.display());
            Ok(Box::new(FileCredentialStore::new(dir)))
        }
        StorageBackend::Keyring => {
            tracing::debug!("Using system keyring credential store");
            Ok(Box::new(KeyringCredentialStore::new()))
        }
    }
}

pub fn calendar_client(calendar: &CalendarConfig) -> CalendarClient {
    CalendarClient::new()
        .with_base_url(calendar.api_base_url.clone())
        .with_calendar_id(calendar.calendar_id.clone())
        .with_max_results(calendar.max_results)
        .with_timeout(Duration::from_secs(calendar.request_timeout_secs))
}

/// Build the orchestrator used by the `calsync` binary.
///
/// # Errors
/// [`SyncError::Config`] when no OAuth client is configured or the token
/// directory cannot be resolved.
pub fn build_orchestrator(config: &Config) -> Result<AppOrchestrator, SyncError> {
    let google = config.require_google()?;
    let auth = authorization_config(google);

    let refresher = auth
        .token_client()
        .with_timeout(Duration::from_secs(config.calendar.request_timeout_secs));
    let authorizer =
        BrowserAuthorizer::new(Duration::from_secs(config.auth.callback_timeout_secs));
    let store = credential_store(&config.storage)?;

    let lifecycle = TokenLifecycleManager::new(store, authorizer, refresher, auth);
    Ok(SyncOrchestrator::new(lifecycle, calendar_client(&config.calendar)))
}
