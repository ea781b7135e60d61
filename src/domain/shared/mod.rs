//! Shared kernel - identifiers, errors and value objects used by every context

pub mod error;
pub mod events;
pub mod value_objects;

pub use error::{DomainError, Result};
pub use events::EventMetadata;
pub use value_objects::*;
