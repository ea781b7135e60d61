//! Domain layer - Core phone logic and rules
//!
//! This layer contains:
//! - Aggregates: `Call` and `Account` with their state machines
//! - The live `CallRegistry`
//! - Value Objects: identifiers, SIP URIs, media and messaging types

pub mod account;
pub mod call;
pub mod media;
pub mod messaging;
pub mod shared;

// Re-export commonly used types
pub use shared::{DomainError, Result};
