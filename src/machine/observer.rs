//! Observer hub
//!
//! Three independent listener sets: state-changed, context-changed, and
//! done. Delivery is withheld until the machine starts; stopping delivers
//! the final notifications and then removes every registration, so a
//! restarted machine is silent until callers resubscribe. Listeners are
//! always invoked outside the interpreter's core lock, so they may call
//! back into the machine.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::context::{ContextFields, StateSnapshot};

/// Listener over state snapshots, used for both state-changed and done sets.
pub type StateListener = Arc<dyn Fn(&StateSnapshot) + Send + Sync>;

/// Listener over the user-defined context fields.
pub type ContextListener = Arc<dyn Fn(&ContextFields) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListenerKind {
    State,
    Context,
    Done,
}

/// Maintains the three listener sets and the attached/detached delivery gate.
#[derive(Default)]
pub(crate) struct ObserverHub {
    state: Mutex<Vec<(u64, StateListener)>>,
    context: Mutex<Vec<(u64, ContextListener)>>,
    done: Mutex<Vec<(u64, StateListener)>>,
    next_id: AtomicU64,
    attached: AtomicBool,
}

impl ObserverHub {
    pub(crate) fn add_state(&self, listener: StateListener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.lock().push((id, listener));
        id
    }

    pub(crate) fn add_context(&self, listener: ContextListener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.context.lock().push((id, listener));
        id
    }

    pub(crate) fn add_done(&self, listener: StateListener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.done.lock().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, kind: ListenerKind, id: u64) {
        match kind {
            ListenerKind::State => self.state.lock().retain(|(i, _)| *i != id),
            ListenerKind::Context => self.context.lock().retain(|(i, _)| *i != id),
            ListenerKind::Done => self.done.lock().retain(|(i, _)| *i != id),
        }
    }

    /// Begin delivering notifications. Called by `start`.
    pub(crate) fn attach(&self) {
        self.attached.store(true, Ordering::SeqCst);
    }

    /// Suspend delivery. Called by `stop` after the final notifications.
    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    /// Drop every listener registration. Called by `stop`.
    pub(crate) fn clear(&self) {
        self.state.lock().clear();
        self.context.lock().clear();
        self.done.lock().clear();
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    pub(crate) fn notify_state(&self, snapshot: &StateSnapshot) {
        if !self.is_attached() {
            return;
        }
        // Clone out of the lock so listeners can re-enter the hub.
        let listeners = self.state.lock().clone();
        for (_, listener) in listeners {
            listener(snapshot);
        }
    }

    pub(crate) fn notify_context(&self, fields: &ContextFields) {
        if !self.is_attached() {
            return;
        }
        let listeners = self.context.lock().clone();
        for (_, listener) in listeners {
            listener(fields);
        }
    }

    pub(crate) fn notify_done(&self, snapshot: &StateSnapshot) {
        if !self.is_attached() {
            return;
        }
        let listeners = self.done.lock().clone();
        for (_, listener) in listeners {
            listener(snapshot);
        }
    }
}

/// Handle returned by `subscribe`; cancel it to remove the listener.
pub struct Subscription {
    hub: Weak<ObserverHub>,
    kind: ListenerKind,
    id: u64,
}

impl Subscription {
    pub(crate) fn new(hub: &Arc<ObserverHub>, kind: ListenerKind, id: u64) -> Self {
        Self {
            hub: Arc::downgrade(hub),
            kind,
            id,
        }
    }

    /// Remove the listener this subscription refers to.
    pub fn cancel(self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.kind, self.id);
        }
    }
}
