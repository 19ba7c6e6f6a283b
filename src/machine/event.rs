//! Events and machine identity
//!
//! Every dispatch carries an [`Event`]: a type string plus an optional JSON
//! payload. The interpreter reserves a handful of event types for its own
//! lifecycle and timer traffic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Event type fired when the machine starts.
pub const INIT_EVENT: &str = "machine.init";
/// Event type used by one-shot delayed transitions.
pub const AFTER_EVENT: &str = "machine.after";
/// Event type used by recurring activity ticks.
pub const EVERY_EVENT: &str = "machine.every";
/// Event type recorded when the machine stops.
pub const STOP_EVENT: &str = "machine.stop";

/// An event dispatched into a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type, matched against transition tables.
    pub ty: String,

    /// Arbitrary payload, opaque to the interpreter.
    pub payload: Value,

    /// Whether this event was synthesized from inside an action or activity
    /// rather than dispatched externally.
    #[serde(skip)]
    pub(crate) synthetic: bool,
}

impl Event {
    /// Create an event with no payload.
    pub fn new(ty: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            payload: Value::Null,
            synthetic: false,
        }
    }

    /// Attach a payload to the event.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// The name recorded in the context's `event` field. Follow-up events
    /// synthesized during a dispatch carry a `> sync` marker.
    pub(crate) fn recorded_name(&self) -> String {
        if self.synthetic {
            format!("{} > sync", self.ty)
        } else {
            self.ty.clone()
        }
    }

    pub(crate) fn mark_synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    pub(crate) fn init() -> Self {
        Self::new(INIT_EVENT)
    }

    pub(crate) fn after() -> Self {
        Self::new(AFTER_EVENT)
    }

    pub(crate) fn every() -> Self {
        Self::new(EVERY_EVENT)
    }

    pub(crate) fn stop_marker() -> Self {
        Self::new(STOP_EVENT)
    }
}

impl From<&str> for Event {
    fn from(ty: &str) -> Self {
        Self::new(ty)
    }
}

impl From<String> for Event {
    fn from(ty: String) -> Self {
        Self::new(ty)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ty)
    }
}

/// Machine identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineId(pub String);

impl MachineId {
    /// Create an id from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Create a fresh random id.
    pub fn random() -> Self {
        Self(format!("machine-{}", Uuid::new_v4()))
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
