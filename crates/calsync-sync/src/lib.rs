//! Screen-level controller tying the credential lifecycle to the calendar.
//!
//! The [`SyncOrchestrator`] restores or obtains a session, lists upcoming
//! events and re-lists from the provider after every successful mutation.

pub mod error;
pub mod orchestrator;
pub mod setup;

pub use error::SyncError;
pub use orchestrator::{ScreenState, SignIn, SyncOrchestrator};
pub use setup::{build_orchestrator, AppOrchestrator};
