//! Sequencing of session and calendar operations for one screen.
//!
//! The event list is only ever replaced wholesale by a fresh listing; it is
//! never patched locally after a create or delete.

use calsync_auth::{
    AuthError, Credential, CredentialStore, InteractiveAuthorizer, RefreshOutcome, SessionState,
    TokenLifecycleManager, TokenRefresher,
};
use calsync_calendar::{CalendarClient, CalendarError, CalendarEvent, NewEvent};

use crate::error::SyncError;

/// What the screen should offer the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenState {
    /// No session; show the sign-in affordance.
    #[default]
    SignInRequired,
    /// Signed in and the listing is current.
    Ready,
    /// The provider no longer accepts the session.
    ReauthorizationRequired,
}

/// Result of an explicit sign-in action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignIn {
    Completed,
    Cancelled,
}

pub struct SyncOrchestrator<S, A, R> {
    lifecycle: TokenLifecycleManager<S, A, R>,
    calendar: CalendarClient,
    events: Vec<CalendarEvent>,
    screen: ScreenState,
}

impl<S, A, R> SyncOrchestrator<S, A, R>
where
    S: CredentialStore,
    A: InteractiveAuthorizer,
    R: TokenRefresher,
{
    pub fn new(lifecycle: TokenLifecycleManager<S, A, R>, calendar: CalendarClient) -> Self {
        Self {
            lifecycle,
            calendar,
            events: Vec::new(),
            screen: ScreenState::SignInRequired,
        }
    }

    /// Current listing, in the order the provider returned it.
    pub fn events(&self) -> &[CalendarEvent] {
        &self.events
    }

    pub fn screen(&self) -> ScreenState {
        self.screen
    }

    pub fn session(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> &TokenLifecycleManager<S, A, R> {
        &self.lifecycle
    }

    /// Restore a stored session and list events, or ask for sign-in.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn activate(&mut self) -> Result<ScreenState, SyncError> {
        let restored = self.lifecycle.restore().await;
        let outcome = match restored {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                self.reset(ScreenState::SignInRequired);
                return Ok(self.screen);
            }
            Err(e) => return Err(self.auth_failure(e)),
        };

        let cred = self.accept(outcome);
        self.load_events(&cred).await?;
        Ok(self.screen)
    }

    /// Run interactive sign-in, then list with the new credential.
    ///
    /// A cancelled flow is not an error and changes nothing.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn sign_in(&mut self) -> Result<SignIn, SyncError> {
        let cred = match self.lifecycle.authorize_interactively().await {
            Ok(cred) => cred,
            Err(AuthError::UserCancelled) => return Ok(SignIn::Cancelled),
            Err(e) => return Err(e.into()),
        };

        self.load_events(&cred).await?;
        Ok(SignIn::Completed)
    }

    /// Re-list from the provider.
    pub async fn reload(&mut self) -> Result<(), SyncError> {
        let cred = self.fresh_credential().await?;
        self.load_events(&cred).await
    }

    /// Create an event, then re-list to observe it.
    #[tracing::instrument(skip(self, event), fields(summary = %event.summary), level = "info")]
    pub async fn create_event(&mut self, event: NewEvent) -> Result<(), SyncError> {
        let cred = self.fresh_credential().await?;
        let created = self.calendar.create(&cred.access_token, &event).await;
        if let Err(e) = created {
            return Err(self.calendar_failure(e));
        }
        self.load_events(&cred).await
    }

    /// Delete an event, then re-list. A refused delete leaves the listing as is.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn delete_event(&mut self, event_id: &str) -> Result<(), SyncError> {
        let cred = self.fresh_credential().await?;
        let deleted = self.calendar.delete(&cred.access_token, event_id).await;
        if let Err(e) = deleted {
            return Err(self.calendar_failure(e));
        }
        self.load_events(&cred).await
    }

    /// Drop the session and the listing.
    pub async fn sign_out(&mut self) -> Result<(), SyncError> {
        self.lifecycle.sign_out().await?;
        self.reset(ScreenState::SignInRequired);
        Ok(())
    }

    async fn fresh_credential(&mut self) -> Result<Credential, SyncError> {
        let usable = self.lifecycle.usable_credential().await;
        match usable {
            Ok(Some(outcome)) => Ok(self.accept(outcome)),
            Ok(None) => {
                self.reset(ScreenState::SignInRequired);
                Err(SyncError::NotSignedIn)
            }
            Err(e) => Err(self.auth_failure(e)),
        }
    }

    async fn load_events(&mut self, cred: &Credential) -> Result<(), SyncError> {
        let listed = self.calendar.list_upcoming(&cred.access_token).await;
        match listed {
            Ok(events) => {
                tracing::info!("Loaded {} upcoming events", events.len());
                self.events = events;
                self.screen = ScreenState::Ready;
                Ok(())
            }
            Err(e) => Err(self.calendar_failure(e)),
        }
    }

    fn accept(&self, outcome: RefreshOutcome) -> Credential {
        if let RefreshOutcome::RefreshFailed { reason, .. } = &outcome {
            tracing::warn!("Silent refresh failed, continuing with stored token: {}", reason);
        }
        outcome.into_credential()
    }

    fn auth_failure(&mut self, e: AuthError) -> SyncError {
        if e.should_reauthorize() {
            self.reset(ScreenState::ReauthorizationRequired);
        }
        e.into()
    }

    fn calendar_failure(&mut self, e: CalendarError) -> SyncError {
        if e.should_reauthorize() {
            tracing::warn!("Calendar rejected the session: {}", e);
            self.screen = ScreenState::ReauthorizationRequired;
        }
        e.into()
    }

    fn reset(&mut self, screen: ScreenState) {
        self.events.clear();
        self.screen = screen;
    }
}
