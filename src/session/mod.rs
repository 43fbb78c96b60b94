//! Session collaborators of the recording service
//!
//! This module describes what the recording service needs from a live session:
//! - The session id and its short form used in capture URLs
//! - The participants currently publishing media
//! - A notifier for "recording started" / "recording stopped" events

mod notifier;
mod session;

pub use notifier::{LogNotifier, SessionNotifier};
pub use session::{Participant, PublisherStream, Session, StopReason};
