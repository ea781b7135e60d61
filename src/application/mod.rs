//! Application layer - the phone orchestrator and its ports
//!
//! This layer coordinates the call registry and the account with the
//! signaling stack. It's responsible for:
//! - Validating user commands against local state
//! - Applying stack events to the domain
//! - Pushing notifications to the presentation layer

pub mod metrics;
pub mod notifier;
pub mod phone;
pub mod stack;

pub use notifier::{Notification, Notifier, NullNotifier, PhoneEvent};
pub use phone::Phone;
pub use stack::{SignalingStack, StackError, StackEvent, StackLogLevel};
