//! Credential lifecycle state machine.
//!
//! ```text
//! SignedOut ──authorize──▶ Authorizing ──ok──▶ Authorized ──near expiry──▶ Refreshing
//!     ▲                        │ cancel/fail        ▲                          │
//!     │                        └──▶ previous state  └───── ok or degraded ─────┘
//!     └──────────── sign out / expired without refresh token ──────────────────┘
//! ```
//!
//! Transitions are serialised: at most one of `restore`, `authorize_interactively`,
//! `refresh_if_needed` and `sign_out` is in flight at a time, so the persisted
//! record is never written by two transitions concurrently.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::credential::{Credential, TokenGrant};
use crate::error::{AuthError, StorageError};
use crate::google::TokenRefresher;
use crate::oauth::{AuthorizationConfig, InteractiveAuthorizer};
use crate::storage::{CredentialStore, CREDENTIAL_KEY};

/// Access tokens with less than this many seconds left are refreshed.
pub const REFRESH_THRESHOLD_SECS: i64 = 60;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    SignedOut,
    Authorizing,
    Authorized(Credential),
    Refreshing(Credential),
}

impl SessionState {
    pub fn credential(&self) -> Option<&Credential> {
        match self {
            Self::Authorized(cred) | Self::Refreshing(cred) => Some(cred),
            Self::SignedOut | Self::Authorizing => None,
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized(_))
    }
}

/// What `refresh_if_needed` has to do for a given credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshDecision {
    UseAsIs,
    Refresh { refresh_token: String },
    ExpiredNoRefresh,
}

impl RefreshDecision {
    pub fn for_credential(cred: &Credential, now: DateTime<Utc>) -> Self {
        if cred.remaining(now) >= Duration::seconds(REFRESH_THRESHOLD_SECS) {
            return Self::UseAsIs;
        }

        match cred.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => Self::Refresh {
                refresh_token: token.to_string(),
            },
            // Inside the margin but still accepted: use it while it lasts
            None if !cred.is_expired(now) => Self::UseAsIs,
            None => Self::ExpiredNoRefresh,
        }
    }
}

/// A credential handed back by the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Far enough from expiry; returned unchanged without a network call.
    Valid(Credential),
    /// Refreshed and persisted.
    Refreshed(Credential),
    /// The refresh exchange failed; the stale credential is returned as a best effort.
    RefreshFailed { stale: Credential, reason: String },
}

impl RefreshOutcome {
    pub fn credential(&self) -> &Credential {
        match self {
            Self::Valid(cred) | Self::Refreshed(cred) => cred,
            Self::RefreshFailed { stale, .. } => stale,
        }
    }

    pub fn into_credential(self) -> Credential {
        match self {
            Self::Valid(cred) | Self::Refreshed(cred) => cred,
            Self::RefreshFailed { stale, .. } => stale,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::RefreshFailed { .. })
    }
}

/// State and outcome after a refresh exchange finished.
pub fn after_refresh(
    stale: Credential,
    result: Result<TokenGrant, AuthError>,
) -> (SessionState, RefreshOutcome) {
    match result {
        Ok(grant) => {
            let merged = stale.merge_refresh(grant);
            (
                SessionState::Authorized(merged.clone()),
                RefreshOutcome::Refreshed(merged),
            )
        }
        Err(e) => (
            SessionState::Authorized(stale.clone()),
            RefreshOutcome::RefreshFailed {
                stale,
                reason: e.to_string(),
            },
        ),
    }
}

/// State and outcome after the interactive flow finished.
///
/// Only a grant with a usable access token becomes `Authorized`; cancellation
/// and failure leave the session as it was before the attempt.
pub fn after_authorization(
    previous: SessionState,
    result: Result<TokenGrant, AuthError>,
) -> (SessionState, Result<Credential, AuthError>) {
    match result {
        Ok(grant) => {
            let cred = Credential::from(grant);
            if cred.has_usable_access_token() {
                (SessionState::Authorized(cred.clone()), Ok(cred))
            } else {
                (
                    previous,
                    Err(AuthError::AuthorizationFailed(
                        "provider returned an empty access token".to_string(),
                    )),
                )
            }
        }
        Err(AuthError::UserCancelled) => (previous, Err(AuthError::UserCancelled)),
        Err(e @ AuthError::AuthorizationFailed(_)) => (previous, Err(e)),
        Err(e) => (previous, Err(AuthError::AuthorizationFailed(e.to_string()))),
    }
}

/// Owns the single credential and every write to its persisted record.
pub struct TokenLifecycleManager<S, A, R> {
    store: S,
    authorizer: A,
    refresher: R,
    config: AuthorizationConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
    // Single-slot in-flight guard for transitions
    transition: tokio::sync::Mutex<()>,
}

impl<S, A, R> TokenLifecycleManager<S, A, R>
where
    S: CredentialStore,
    A: InteractiveAuthorizer,
    R: TokenRefresher,
{
    pub fn new(store: S, authorizer: A, refresher: R, config: AuthorizationConfig) -> Self {
        Self {
            store,
            authorizer,
            refresher,
            config,
            clock: Arc::new(SystemClock),
            state: Mutex::new(SessionState::SignedOut),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn current_credential(&self) -> Option<Credential> {
        self.state.lock().credential().cloned()
    }

    pub fn config(&self) -> &AuthorizationConfig {
        &self.config
    }

    /// Load the persisted credential and bring it up to date.
    ///
    /// Returns `Ok(None)` when there is no session to restore.
    ///
    /// # Errors
    /// [`AuthError::ExpiredNoRefresh`] when the stored credential can no longer
    /// be used, [`AuthError::Storage`] when the store cannot be read.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn restore(&self) -> Result<Option<RefreshOutcome>, AuthError> {
        let _guard = self.transition.lock().await;

        let Some(cred) = self.load_credential()? else {
            self.set_state(SessionState::SignedOut);
            tracing::info!("No stored session");
            return Ok(None);
        };

        if !cred.has_usable_access_token() {
            tracing::warn!("Stored credential has no access token, discarding it");
            self.store.remove(CREDENTIAL_KEY)?;
            self.set_state(SessionState::SignedOut);
            return Ok(None);
        }

        self.refresh_locked(cred).await.map(Some)
    }

    /// Run the interactive authorization flow and persist the result.
    ///
    /// A successful flow replaces any previously stored credential outright.
    ///
    /// # Errors
    /// [`AuthError::UserCancelled`] when the user backs out (nothing changes),
    /// [`AuthError::AuthorizationFailed`] otherwise.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn authorize_interactively(&self) -> Result<Credential, AuthError> {
        let _guard = self.transition.lock().await;

        let previous = self.set_state(SessionState::Authorizing);
        let result = self.authorizer.authorize(&self.config).await;
        let (next, outcome) = after_authorization(previous.clone(), result);

        match outcome {
            Ok(cred) => {
                if let Err(e) = self.save_credential(&cred) {
                    self.set_state(previous);
                    return Err(e.into());
                }
                self.set_state(next);
                tracing::info!("Signed in; access token valid until {}", cred.access_token_expiry);
                Ok(cred)
            }
            Err(AuthError::UserCancelled) => {
                self.set_state(next);
                tracing::info!("Authorization cancelled by user");
                Err(AuthError::UserCancelled)
            }
            Err(e) => {
                self.set_state(next);
                tracing::warn!("Authorization failed: {}", e);
                Err(e)
            }
        }
    }

    /// Refresh `cred` when it is within the refresh threshold of expiry.
    ///
    /// The manager owns the session: when it already holds a credential that
    /// expires later than `cred` (a concurrent refresh got there first), that
    /// one is evaluated instead.
    ///
    /// # Errors
    /// [`AuthError::NotSignedIn`] when the session was signed out;
    /// [`AuthError::ExpiredNoRefresh`] when the token has expired and there is
    /// no refresh token, in which case the stored record is removed.
    #[tracing::instrument(skip(self, cred), level = "info")]
    pub async fn refresh_if_needed(&self, cred: Credential) -> Result<RefreshOutcome, AuthError> {
        let _guard = self.transition.lock().await;

        let cred = match self.current_credential() {
            None => {
                tracing::info!("Refresh requested after sign-out, ignoring");
                return Err(AuthError::NotSignedIn);
            }
            Some(held) if held.access_token_expiry > cred.access_token_expiry => held,
            Some(_) => cred,
        };
        self.refresh_locked(cred).await
    }

    /// The current credential, refreshed if needed. `Ok(None)` when signed out.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn usable_credential(&self) -> Result<Option<RefreshOutcome>, AuthError> {
        let _guard = self.transition.lock().await;
        match self.current_credential() {
            Some(cred) => self.refresh_locked(cred).await.map(Some),
            None => Ok(None),
        }
    }

    /// Forget the session. Safe to call when already signed out.
    ///
    /// # Errors
    /// [`AuthError::Storage`] when the persisted record cannot be removed.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let _guard = self.transition.lock().await;
        self.set_state(SessionState::SignedOut);
        self.store.remove(CREDENTIAL_KEY)?;
        tracing::info!("Signed out");
        Ok(())
    }

    async fn refresh_locked(&self, cred: Credential) -> Result<RefreshOutcome, AuthError> {
        let now = self.clock.now();

        match RefreshDecision::for_credential(&cred, now) {
            RefreshDecision::UseAsIs => {
                self.set_state(SessionState::Authorized(cred.clone()));
                Ok(RefreshOutcome::Valid(cred))
            }
            RefreshDecision::ExpiredNoRefresh => {
                tracing::info!("Access token expired and no refresh token stored");
                self.set_state(SessionState::SignedOut);
                self.store.remove(CREDENTIAL_KEY)?;
                Err(AuthError::ExpiredNoRefresh)
            }
            RefreshDecision::Refresh { refresh_token } => {
                tracing::debug!(
                    "Access token has {}s left, refreshing",
                    cred.remaining(now).num_seconds()
                );
                self.set_state(SessionState::Refreshing(cred.clone()));

                let result = self.refresher.refresh(&refresh_token).await;
                let (next, outcome) = after_refresh(cred, result);

                match &outcome {
                    RefreshOutcome::Refreshed(merged) => {
                        // Keep the fresh token usable even if it cannot be written
                        if let Err(e) = self.save_credential(merged) {
                            tracing::warn!("Refreshed credential could not be persisted: {}", e);
                        } else {
                            tracing::info!("Access token refreshed");
                        }
                    }
                    RefreshOutcome::RefreshFailed { reason, .. } => {
                        tracing::warn!("Token refresh failed, keeping stale credential: {}", reason);
                    }
                    RefreshOutcome::Valid(_) => {}
                }
                self.set_state(next);
                Ok(outcome)
            }
        }
    }

    /// Replace the state, returning the previous one.
    fn set_state(&self, next: SessionState) -> SessionState {
        std::mem::replace(&mut *self.state.lock(), next)
    }

    fn load_credential(&self) -> Result<Option<Credential>, StorageError> {
        let Some(bytes) = self.store.get(CREDENTIAL_KEY)? else {
            return Ok(None);
        };

        match serde_json::from_slice::<Credential>(&bytes) {
            Ok(cred) => Ok(Some(cred)),
            Err(e) => {
                tracing::warn!("Discarding unreadable credential record: {}", e);
                self.store.remove(CREDENTIAL_KEY)?;
                Ok(None)
            }
        }
    }

    fn save_credential(&self, cred: &Credential) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(cred)?;
        self.store.set(CREDENTIAL_KEY, &bytes)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::storage::MemoryCredentialStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[derive(Default)]
    struct FakeRefresher {
        grant: Option<TokenGrant>,
        delay_ms: u64,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            assert!(!refresh_token.is_empty());
            self.grant
                .clone()
                .ok_or_else(|| AuthError::RefreshFailed("network unreachable".to_string()))
        }
    }

    enum AuthorizerBehavior {
        Grant(TokenGrant),
        Cancel,
        Fail,
    }

    struct FakeAuthorizer(AuthorizerBehavior);

    impl InteractiveAuthorizer for FakeAuthorizer {
        async fn authorize(&self, _config: &AuthorizationConfig) -> Result<TokenGrant, AuthError> {
            match &self.0 {
                AuthorizerBehavior::Grant(grant) => Ok(grant.clone()),
                AuthorizerBehavior::Cancel => Err(AuthError::UserCancelled),
                AuthorizerBehavior::Fail => {
                    Err(AuthError::AuthorizationFailed("consent screen crashed".to_string()))
                }
            }
        }
    }

    type TestManager = TokenLifecycleManager<Arc<MemoryCredentialStore>, FakeAuthorizer, FakeRefresher>;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn credential(expires_in_secs: i64, refresh: Option<&str>) -> Credential {
        Credential {
            access_token: "a1".to_string(),
            access_token_expiry: now() + Duration::seconds(expires_in_secs),
            refresh_token: refresh.map(str::to_string),
            id_token: None,
        }
    }

    fn grant(access: &str, expires_in_secs: i64, refresh: Option<&str>) -> TokenGrant {
        TokenGrant {
            access_token: access.to_string(),
            access_token_expiry: now() + Duration::seconds(expires_in_secs),
            refresh_token: refresh.map(str::to_string),
            id_token: None,
        }
    }

    fn manager(
        store: Arc<MemoryCredentialStore>,
        authorizer: AuthorizerBehavior,
        refresher: FakeRefresher,
    ) -> TestManager {
        TokenLifecycleManager::new(
            store,
            FakeAuthorizer(authorizer),
            refresher,
            AuthorizationConfig::google("client"),
        )
        .with_clock(Arc::new(FixedClock(now())))
    }

    fn stored(store: &MemoryCredentialStore) -> Option<Credential> {
        store
            .get(CREDENTIAL_KEY)
            .unwrap()
            .map(|bytes| serde_json::from_slice(&bytes).unwrap())
    }

    fn persist(store: &MemoryCredentialStore, cred: &Credential) {
        store
            .set(CREDENTIAL_KEY, &serde_json::to_vec(cred).unwrap())
            .unwrap();
    }

    #[test]
    fn test_refresh_decision() {
        let at = now();
        assert_eq!(
            RefreshDecision::for_credential(&credential(3600, Some("r1")), at),
            RefreshDecision::UseAsIs
        );
        assert_eq!(
            RefreshDecision::for_credential(&credential(60, Some("r1")), at),
            RefreshDecision::UseAsIs
        );
        assert_eq!(
            RefreshDecision::for_credential(&credential(59, Some("r1")), at),
            RefreshDecision::Refresh {
                refresh_token: "r1".to_string()
            }
        );
        assert_eq!(
            RefreshDecision::for_credential(&credential(30, None), at),
            RefreshDecision::UseAsIs
        );
        assert_eq!(
            RefreshDecision::for_credential(&credential(0, None), at),
            RefreshDecision::ExpiredNoRefresh
        );
        assert_eq!(
            RefreshDecision::for_credential(&credential(-10, Some("")), at),
            RefreshDecision::ExpiredNoRefresh
        );
    }

    #[test]
    fn test_after_refresh_failure_keeps_stale() {
        let stale = credential(10, Some("r1"));
        let (state, outcome) =
            after_refresh(stale.clone(), Err(AuthError::RefreshFailed("down".into())));

        assert_eq!(state, SessionState::Authorized(stale.clone()));
        assert!(outcome.is_degraded());
        assert_eq!(outcome.into_credential(), stale);
    }

    #[test]
    fn test_after_authorization_cancel_keeps_previous() {
        let previous = SessionState::Authorized(credential(3600, None));
        let (state, result) = after_authorization(previous.clone(), Err(AuthError::UserCancelled));
        assert_eq!(state, previous);
        assert!(matches!(result, Err(AuthError::UserCancelled)));
    }

    #[test]
    fn test_after_authorization_normalizes_errors() {
        let (state, result) = after_authorization(
            SessionState::SignedOut,
            Err(AuthError::RefreshFailed("odd".into())),
        );
        assert_eq!(state, SessionState::SignedOut);
        assert!(matches!(result, Err(AuthError::AuthorizationFailed(_))));
    }

    #[tokio::test]
    async fn test_fresh_credential_skips_network() {
        let store = Arc::new(MemoryCredentialStore::new());
        let mgr = manager(store.clone(), AuthorizerBehavior::Fail, FakeRefresher::default());
        let cred = credential(3600, Some("r1"));
        mgr.set_state(SessionState::Authorized(cred.clone()));

        let outcome = mgr.refresh_if_needed(cred.clone()).await.unwrap();

        assert_eq!(outcome, RefreshOutcome::Valid(cred.clone()));
        assert_eq!(mgr.refresher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(mgr.state(), SessionState::Authorized(cred));
    }

    #[tokio::test]
    async fn test_near_expiry_refreshes_once_and_persists_merge() {
        let store = Arc::new(MemoryCredentialStore::new());
        let refresher = FakeRefresher {
            grant: Some(grant("a2", 3600, None)),
            ..Default::default()
        };
        let mgr = manager(store.clone(), AuthorizerBehavior::Fail, refresher);
        let near_expiry = credential(30, Some("r1"));
        mgr.set_state(SessionState::Authorized(near_expiry.clone()));

        let outcome = mgr.refresh_if_needed(near_expiry).await.unwrap();

        let merged = outcome.credential().clone();
        assert!(matches!(outcome, RefreshOutcome::Refreshed(_)));
        assert_eq!(merged.access_token, "a2");
        assert_eq!(merged.refresh_token.as_deref(), Some("r1"));
        assert_eq!(merged.access_token_expiry, now() + Duration::seconds(3600));
        assert_eq!(mgr.refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stored(&store), Some(merged));
    }

    #[tokio::test]
    async fn test_refresh_failure_degrades_to_stale() {
        let store = Arc::new(MemoryCredentialStore::new());
        let original = credential(30, Some("r1"));
        persist(&store, &original);
        let mgr = manager(store.clone(), AuthorizerBehavior::Fail, FakeRefresher::default());
        mgr.set_state(SessionState::Authorized(original.clone()));

        let outcome = mgr.refresh_if_needed(original.clone()).await.unwrap();

        match outcome {
            RefreshOutcome::RefreshFailed { stale, reason } => {
                assert_eq!(stale, original);
                assert!(reason.contains("network unreachable"));
            }
            other => panic!("expected RefreshFailed, got {:?}", other),
        }
        assert_eq!(stored(&store), Some(original.clone()));
        assert_eq!(mgr.state(), SessionState::Authorized(original));
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token_signs_out() {
        let store = Arc::new(MemoryCredentialStore::new());
        let expired = credential(-5, None);
        persist(&store, &expired);
        let mgr = manager(store.clone(), AuthorizerBehavior::Fail, FakeRefresher::default());

        let result = mgr.restore().await;

        assert!(matches!(result, Err(AuthError::ExpiredNoRefresh)));
        assert!(stored(&store).is_none());
        assert_eq!(mgr.state(), SessionState::SignedOut);
    }

    #[tokio::test]
    async fn test_restore_empty_store() {
        let store = Arc::new(MemoryCredentialStore::new());
        let mgr = manager(store, AuthorizerBehavior::Fail, FakeRefresher::default());

        assert!(mgr.restore().await.unwrap().is_none());
        assert_eq!(mgr.state(), SessionState::SignedOut);
    }

    #[tokio::test]
    async fn test_restore_valid_session() {
        let store = Arc::new(MemoryCredentialStore::new());
        let cred = credential(3600, Some("r1"));
        persist(&store, &cred);
        let mgr = manager(store, AuthorizerBehavior::Fail, FakeRefresher::default());

        let outcome = mgr.restore().await.unwrap().unwrap();
        assert_eq!(outcome, RefreshOutcome::Valid(cred.clone()));
        assert_eq!(mgr.current_credential(), Some(cred));
    }

    #[tokio::test]
    async fn test_restore_discards_corrupt_record() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.set(CREDENTIAL_KEY, b"not json").unwrap();
        let mgr = manager(store.clone(), AuthorizerBehavior::Fail, FakeRefresher::default());

        assert!(mgr.restore().await.unwrap().is_none());
        assert!(store.get(CREDENTIAL_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_discards_blank_access_token() {
        let store = Arc::new(MemoryCredentialStore::new());
        let mut cred = credential(3600, Some("r1"));
        cred.access_token = String::new();
        persist(&store, &cred);
        let mgr = manager(store.clone(), AuthorizerBehavior::Fail, FakeRefresher::default());

        assert!(mgr.restore().await.unwrap().is_none());
        assert!(stored(&store).is_none());
    }

    #[tokio::test]
    async fn test_sign_out_then_restore_yields_no_session() {
        let store = Arc::new(MemoryCredentialStore::new());
        persist(&store, &credential(3600, Some("r1")));
        let mgr = manager(store.clone(), AuthorizerBehavior::Fail, FakeRefresher::default());

        assert!(mgr.restore().await.unwrap().is_some());
        mgr.sign_out().await.unwrap();
        mgr.sign_out().await.unwrap();

        assert_eq!(mgr.state(), SessionState::SignedOut);
        assert!(mgr.restore().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_authorize_overwrites_previous_credential() {
        let store = Arc::new(MemoryCredentialStore::new());
        persist(&store, &credential(3600, Some("old-refresh")));
        let mgr = manager(
            store.clone(),
            AuthorizerBehavior::Grant(grant("fresh", 3600, None)),
            FakeRefresher::default(),
        );

        let cred = mgr.authorize_interactively().await.unwrap();

        assert_eq!(cred.access_token, "fresh");
        // No merge with the old record
        assert!(cred.refresh_token.is_none());
        assert_eq!(stored(&store), Some(cred.clone()));
        assert_eq!(mgr.state(), SessionState::Authorized(cred));
    }

    #[tokio::test]
    async fn test_authorize_cancelled_leaves_store_untouched() {
        let store = Arc::new(MemoryCredentialStore::new());
        let existing = credential(3600, Some("r1"));
        persist(&store, &existing);
        let mgr = manager(store.clone(), AuthorizerBehavior::Cancel, FakeRefresher::default());

        let result = mgr.authorize_interactively().await;

        assert!(matches!(result, Err(AuthError::UserCancelled)));
        assert_eq!(stored(&store), Some(existing));
        assert_eq!(mgr.state(), SessionState::SignedOut);
    }

    #[tokio::test]
    async fn test_authorize_failure_stays_signed_out() {
        let store = Arc::new(MemoryCredentialStore::new());
        let mgr = manager(store.clone(), AuthorizerBehavior::Fail, FakeRefresher::default());

        let result = mgr.authorize_interactively().await;

        assert!(matches!(result, Err(AuthError::AuthorizationFailed(_))));
        assert!(stored(&store).is_none());
        assert_eq!(mgr.state(), SessionState::SignedOut);
    }

    #[tokio::test]
    async fn test_authorize_rejects_blank_access_token() {
        let store = Arc::new(MemoryCredentialStore::new());
        let mgr = manager(
            store.clone(),
            AuthorizerBehavior::Grant(grant("", 3600, Some("r1"))),
            FakeRefresher::default(),
        );

        let result = mgr.authorize_interactively().await;

        assert!(matches!(result, Err(AuthError::AuthorizationFailed(_))));
        assert!(stored(&store).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_are_serialized() {
        let store = Arc::new(MemoryCredentialStore::new());
        let refresher = FakeRefresher {
            grant: Some(grant("a2", 3600, None)),
            delay_ms: 50,
            ..Default::default()
        };
        let mgr = manager(store, AuthorizerBehavior::Fail, refresher);
        let stale = credential(10, Some("r1"));
        mgr.set_state(SessionState::Authorized(stale.clone()));

        let (first, second) = tokio::join!(
            mgr.refresh_if_needed(stale.clone()),
            mgr.refresh_if_needed(stale.clone())
        );

        // The second caller sees the credential the first one obtained
        assert!(matches!(first.unwrap(), RefreshOutcome::Refreshed(_)));
        match second.unwrap() {
            RefreshOutcome::Valid(cred) => assert_eq!(cred.access_token, "a2"),
            other => panic!("expected Valid, got {:?}", other),
        }
        assert_eq!(mgr.refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.refresher.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_racing_sign_out_does_not_revive_session() {
        let store = Arc::new(MemoryCredentialStore::new());
        let refresher = FakeRefresher {
            grant: Some(grant("a2", 3600, Some("r2"))),
            ..Default::default()
        };
        let mgr = manager(store.clone(), AuthorizerBehavior::Fail, refresher);
        let near_expiry = credential(30, Some("r1"));
        persist(&store, &near_expiry);
        mgr.set_state(SessionState::Authorized(near_expiry.clone()));

        let (signed_out, refreshed) =
            tokio::join!(mgr.sign_out(), mgr.refresh_if_needed(near_expiry));

        assert!(signed_out.is_ok());
        assert!(matches!(refreshed, Err(AuthError::NotSignedIn)));
        assert_eq!(mgr.refresher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(mgr.state(), SessionState::SignedOut);
        assert!(stored(&store).is_none());
        assert!(mgr.restore().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_after_refresh_still_clears_session() {
        let store = Arc::new(MemoryCredentialStore::new());
        let refresher = FakeRefresher {
            grant: Some(grant("a2", 3600, None)),
            delay_ms: 20,
            ..Default::default()
        };
        let mgr = manager(store.clone(), AuthorizerBehavior::Fail, refresher);
        let near_expiry = credential(30, Some("r1"));
        persist(&store, &near_expiry);
        mgr.set_state(SessionState::Authorized(near_expiry.clone()));

        let (refreshed, signed_out) =
            tokio::join!(mgr.refresh_if_needed(near_expiry), mgr.sign_out());

        assert_eq!(refreshed.unwrap().credential().access_token, "a2");
        assert!(signed_out.is_ok());
        assert_eq!(mgr.state(), SessionState::SignedOut);
        assert!(mgr.restore().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_when_signed_out_is_rejected() {
        let store = Arc::new(MemoryCredentialStore::new());
        let mgr = manager(store.clone(), AuthorizerBehavior::Fail, FakeRefresher::default());

        let result = mgr.refresh_if_needed(credential(30, Some("r1"))).await;

        assert!(matches!(result, Err(AuthError::NotSignedIn)));
        assert!(stored(&store).is_none());
    }

    /// Reads and removes work; every write fails.
    struct ReadOnlyStore(MemoryCredentialStore);

    impl CredentialStore for ReadOnlyStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.0.get(key)
        }

        fn set(&self, _key: &str, _value: &[u8]) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::other("disk full")))
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.0.remove(key)
        }
    }

    #[tokio::test]
    async fn test_refresh_persist_failure_keeps_fresh_token() {
        let inner = MemoryCredentialStore::new();
        let original = credential(30, Some("r1"));
        persist(&inner, &original);
        let store = Arc::new(ReadOnlyStore(inner));
        let refresher = FakeRefresher {
            grant: Some(grant("a2", 3600, Some("r2"))),
            ..Default::default()
        };
        let mgr = TokenLifecycleManager::new(
            store.clone(),
            FakeAuthorizer(AuthorizerBehavior::Fail),
            refresher,
            AuthorizationConfig::google("client"),
        )
        .with_clock(Arc::new(FixedClock(now())));

        let outcome = mgr.restore().await.unwrap().unwrap();

        let fresh = outcome.credential().clone();
        assert!(matches!(outcome, RefreshOutcome::Refreshed(_)));
        assert_eq!(fresh.access_token, "a2");
        assert_eq!(fresh.refresh_token.as_deref(), Some("r2"));
        assert_eq!(mgr.state(), SessionState::Authorized(fresh));
        assert_eq!(stored(&store.0), Some(original));
    }

    #[tokio::test]
    async fn test_usable_credential_when_signed_out() {
        let store = Arc::new(MemoryCredentialStore::new());
        let mgr = manager(store, AuthorizerBehavior::Fail, FakeRefresher::default());
        assert!(mgr.usable_credential().await.unwrap().is_none());
    }
}
