//! sipphone - call and account management for a SIP softphone
//!
//! A Domain-Driven Design layering of the state kept on top of a SIP
//! signaling/media stack: calls, the registered account, and the
//! notifications pushed to the user interface.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use application::Phone;
pub use domain::shared::error::{DomainError, Result};
