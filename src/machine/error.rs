//! Error types for the interpreter
//!
//! Domain errors use thiserror; non-fatal conditions are reported through
//! `tracing` instead of surfacing as `Err`.

use thiserror::Error;

/// Errors raised by interpreter operations.
///
/// Only programming errors in the embedding code are fatal. Unknown named
/// actions, activities, guards, and delays are reported as warnings and
/// skipped, never raised.
#[derive(Debug, Error)]
pub enum MachineError {
    /// A directed send or stop targeted a child id that is not registered.
    #[error("unknown child actor '{0}'")]
    UnknownChild(String),

    /// `send_parent` was called on a machine that was never spawned.
    #[error("machine '{0}' has no parent")]
    NoParent(String),
}

/// Convenience result alias for interpreter operations.
pub type MachineResult<T> = std::result::Result<T, MachineError>;
