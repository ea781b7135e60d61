//! Account bounded context - credentials and the registration state machine

pub mod aggregate;
pub mod value_object;

pub use aggregate::Account;
pub use value_object::{AccountConfig, RegistrationState};
