//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Signaling stack implementations

pub mod loopback;

pub use loopback::LoopbackStack;
