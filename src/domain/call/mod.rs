//! Call bounded context - call legs, their states and the live registry

pub mod aggregate;
pub mod dtmf;
pub mod registry;
pub mod value_object;

pub use aggregate::{Call, CallSummary, HeaderMap};
pub use dtmf::DtmfDigit;
pub use registry::{CallRegistry, Transition};
pub use value_object::{CallDirection, CallState};
