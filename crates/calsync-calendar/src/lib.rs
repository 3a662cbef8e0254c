//! Google Calendar synchronization client.
//!
//! Lists, creates and deletes entries on a remote calendar with a bearer
//! access token, classifying every failure into a [`CalendarError`].

pub mod client;
pub mod error;
pub mod types;

pub use client::CalendarClient;
pub use error::{CalendarError, PROTECTED_EVENT_MARKER};
pub use types::{CalendarEvent, EventTime, NewEvent};
