//! Processing sessions.
//!
//! - [`state`]: the immutable [`SessionState`] snapshot and notifications
//! - [`events`]: pipeline events and collaborator commands
//! - [`controller`]: the [`SessionController`] event loop

pub mod controller;
pub mod events;
pub mod state;

pub use controller::{SessionController, VideoToggle};
pub use events::{SessionCommand, SessionEvent};
pub use state::{Notification, SessionState, Severity};
