//! Cadence – a declarative hierarchical state machine interpreter
//!
//! This crate implements event-driven finite state machines with:
//! - Declarative state charts: states, guarded transitions, entry/exit actions
//! - Delayed (`after`) and periodic (`every`) timed transitions on Tokio
//! - Long-running activities with automatic cleanup on state exit
//! - Parent/child machine actors with message passing
//! - Observers for state, context, and completion notifications

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Machine core modules implementing the state chart interpreter
pub mod machine;

// Re-export key types for convenience
pub use machine::{Machine, MachineConfig, MachineOptions};

/// Current version of the cadence crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
