//! Interface layer - Presentation-facing adapters
//!
//! This layer handles:
//! - Fan-out of phone notifications to subscribers
//! - JSON formatting of events

pub mod events;

pub use events::EventBroadcaster;
