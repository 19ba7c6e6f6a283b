//! Action and activity executors
//!
//! Actions are synchronous effects run in declared order; activities are
//! long-running effects started on state entry whose cleanups are retained
//! until the owning state is exited. Both receive the context, the event
//! that caused them, and a [`Meta`] handle for guard evaluation and
//! re-entrant sends.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::actors::ChildSelector;
use super::context::{Context, StateSnapshot};
use super::event::Event;
use super::guard::GuardFn;
use super::node::{ActionRef, ActivityRef};

/// An action implementation.
pub type ActionFn = Arc<dyn Fn(&mut Context, &Event, &Meta) + Send + Sync>;

/// An activity implementation. The returned cleanup runs exactly once, no
/// later than the owning state's exit or machine stop.
pub type ActivityFn = Arc<dyn Fn(&mut Context, &Event, &Meta) -> Option<Cleanup> + Send + Sync>;

/// Cleanup callback returned by an activity.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Events relayed from inside an action or activity.
///
/// Self-sends are queued and drained within the same dispatch; directed
/// sends are delivered after the in-flight transition completes.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Queue a follow-up event on this machine.
    ToSelf(Event),
    /// Forward an event to the parent machine.
    ToParent(Event),
    /// Forward an event to a child machine.
    ToChild(ChildSelector, Event),
}

/// Relay buffer shared between a dispatch cycle and the metas it hands out.
#[derive(Clone, Default)]
pub(crate) struct EventRelay {
    buf: Arc<Mutex<Vec<Outbound>>>,
}

impl EventRelay {
    pub(crate) fn push(&self, out: Outbound) {
        self.buf.lock().push(out);
    }

    pub(crate) fn drain(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.buf.lock())
    }
}

/// Execution metadata passed to actions, activities, and lifecycle hooks.
///
/// Closures invoked by the interpreter run inside the machine's dispatch
/// cycle and must use the meta's send methods rather than calling back into
/// the machine handle.
#[derive(Clone)]
pub struct Meta {
    /// Snapshot of the interpreter-owned fields at the current effect phase.
    pub state: StateSnapshot,
    guards: HashMap<String, GuardFn>,
    relay: EventRelay,
}

impl Meta {
    pub(crate) fn new(
        state: StateSnapshot,
        guards: HashMap<String, GuardFn>,
        relay: EventRelay,
    ) -> Self {
        Self {
            state,
            guards,
            relay,
        }
    }

    /// Evaluate a named guard from the registry against the given context.
    /// Unknown names are reported and evaluate to `false`.
    pub fn guard(&self, name: &str, context: &Context, event: &Event) -> bool {
        match self.guards.get(name) {
            Some(f) => f(context, event),
            None => {
                tracing::warn!(guard = %name, "unknown guard reference");
                false
            }
        }
    }

    /// Queue a follow-up event on this machine, processed before the dispatch
    /// returns.
    pub fn send(&self, event: impl Into<Event>) {
        self.relay
            .push(Outbound::ToSelf(event.into().mark_synthetic()));
    }

    /// Forward an event to the parent machine after the in-flight transition
    /// completes. Reported (non-fatal) if the machine has no parent.
    pub fn send_parent(&self, event: impl Into<Event>) {
        self.relay.push(Outbound::ToParent(event.into()));
    }

    /// Forward an event to a child machine after the in-flight transition
    /// completes. Reported (non-fatal) if no such child is registered.
    pub fn send_child(&self, event: impl Into<Event>, target: impl Into<ChildSelector>) {
        self.relay
            .push(Outbound::ToChild(target.into(), event.into()));
    }
}

/// Run a list of action references strictly in declared order. A named
/// action with no registered implementation is reported and skipped.
pub(crate) fn run_actions(
    actions: &[ActionRef],
    registry: &HashMap<String, ActionFn>,
    context: &mut Context,
    event: &Event,
    meta: &Meta,
) {
    for action in actions {
        match action {
            ActionRef::Run(f) => f(context, event, meta),
            ActionRef::Named(name) => match registry.get(name) {
                Some(f) => f(context, event, meta),
                None => {
                    tracing::warn!(action = %name, event = %event.ty, "unknown action reference");
                }
            },
        }
    }
}

/// Start a list of activities, collecting their cleanups.
pub(crate) fn start_activities(
    activities: &[ActivityRef],
    registry: &HashMap<String, ActivityFn>,
    context: &mut Context,
    event: &Event,
    meta: &Meta,
) -> Vec<Cleanup> {
    let mut cleanups = Vec::new();
    for activity in activities {
        let started = match activity {
            ActivityRef::Run(f) => f(context, event, meta),
            ActivityRef::Named(name) => match registry.get(name) {
                Some(f) => f(context, event, meta),
                None => {
                    tracing::warn!(activity = %name, "unknown activity reference");
                    None
                }
            },
        };
        if let Some(cleanup) = started {
            cleanups.push(cleanup);
        }
    }
    cleanups
}
