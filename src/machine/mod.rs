//! Statechart interpreter and public API
//!
//! This module provides the main `Machine` type that composes the context
//! store, resolvers, executors, effect orchestrator, timer subsystem, actor
//! registry, and observer hub into the public interpreter surface.

use std::collections::HashMap;
use std::sync::Arc;

// Submodules
pub mod actors;
pub mod context;
pub mod error;
pub mod event;
pub mod exec;
pub mod guard;
mod interp;
pub mod node;
pub mod observer;
pub mod resolve;
mod timers;

use interp::MachineInner;
use observer::ListenerKind;

/// Process-level lifecycle of a machine, independent of the state value
/// being visited while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStatus {
    /// Built but never started.
    NotStarted,
    /// Actively interpreting events.
    Running,
    /// Stopped; the state value is cleared and events are dropped.
    Stopped,
}

/// Whether listeners are notified synchronously on every mutation or once
/// per dispatch cycle, independently for state and context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncPolicy {
    /// Synchronous delivery for state listeners.
    pub state: bool,
    /// Synchronous delivery for context listeners.
    pub context: bool,
}

impl SyncPolicy {
    /// Synchronous delivery for both listener sets.
    pub fn sync() -> Self {
        Self {
            state: true,
            context: true,
        }
    }

    /// Batched (once per dispatch) delivery for both listener sets.
    pub fn batched() -> Self {
        Self::default()
    }
}

impl From<bool> for SyncPolicy {
    fn from(sync: bool) -> Self {
        Self {
            state: sync,
            context: sync,
        }
    }
}

/// Initial state and context override accepted by [`Machine::start_with`].
#[derive(Debug, Clone, Default)]
pub struct InitOverride {
    /// Replacement for the configured initial state.
    pub value: Option<String>,
    /// Partial context merged before the initial transition.
    pub context: Option<ContextFields>,
}

impl InitOverride {
    /// Override only the initial state value.
    pub fn value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    /// Override only the initial context.
    pub fn context(fields: ContextFields) -> Self {
        Self {
            value: None,
            context: Some(fields),
        }
    }

    /// Merge a context override into this one.
    pub fn with_context(mut self, fields: ContextFields) -> Self {
        self.context = Some(fields);
        self
    }
}

impl From<&str> for InitOverride {
    fn from(value: &str) -> Self {
        Self::value(value)
    }
}

/// Immutable machine description: the state graph, initial state and
/// context, lifecycle hooks, and listener sync policy.
#[derive(Clone, Default)]
pub struct MachineConfig {
    /// Machine id; a random one is assigned when absent.
    pub id: Option<String>,
    /// Initial state entered on start (unless overridden).
    pub initial: Option<String>,
    /// State name to node mapping.
    pub states: HashMap<String, StateNode>,
    /// Machine-level transition table, consulted when the current state's
    /// table has no entry for an event.
    pub on: HashMap<String, node::TransitionSpec>,
    /// Initial user context, restored on stop.
    pub context: ContextFields,
    /// Hook fired after the initial transition completes.
    pub on_start: Option<ActionFn>,
    /// Hook fired at the end of the stop sequence.
    pub on_stop: Option<ActionFn>,
    /// Listener delivery policy.
    pub sync: SyncPolicy,
}

impl MachineConfig {
    /// A config with the given initial state.
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            initial: Some(initial.into()),
            ..Self::default()
        }
    }

    /// Name the machine.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Declare a state.
    pub fn state(mut self, name: impl Into<String>, node: StateNode) -> Self {
        self.states.insert(name.into(), node);
        self
    }

    /// Register a machine-level transition table entry.
    pub fn on(mut self, event: impl Into<String>, spec: impl Into<node::TransitionSpec>) -> Self {
        self.on.insert(event.into(), spec.into());
        self
    }

    /// Seed the initial context.
    pub fn context(mut self, fields: ContextFields) -> Self {
        self.context = fields;
        self
    }

    /// Seed one initial context field.
    pub fn context_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Hook fired after the initial transition completes.
    pub fn on_start(
        mut self,
        hook: impl Fn(&mut Context, &Event, &exec::Meta) + Send + Sync + 'static,
    ) -> Self {
        self.on_start = Some(Arc::new(hook));
        self
    }

    /// Hook fired at the end of the stop sequence.
    pub fn on_stop(
        mut self,
        hook: impl Fn(&mut Context, &Event, &exec::Meta) + Send + Sync + 'static,
    ) -> Self {
        self.on_stop = Some(Arc::new(hook));
        self
    }

    /// Set the listener delivery policy.
    pub fn sync(mut self, policy: impl Into<SyncPolicy>) -> Self {
        self.sync = policy.into();
        self
    }
}

/// Named implementation registries resolved by reference at run time,
/// keeping configuration separate from behavior.
#[derive(Clone, Default)]
pub struct MachineOptions {
    /// Named actions.
    pub actions: HashMap<String, ActionFn>,
    /// Named guards.
    pub guards: HashMap<String, guard::GuardFn>,
    /// Named delays.
    pub delays: HashMap<String, resolve::Delay>,
    /// Named activities.
    pub activities: HashMap<String, exec::ActivityFn>,
}

impl MachineOptions {
    /// An empty registry set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named action.
    pub fn action(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&mut Context, &Event, &exec::Meta) + Send + Sync + 'static,
    ) -> Self {
        self.actions.insert(name.into(), Arc::new(f));
        self
    }

    /// Register a named guard.
    pub fn guard(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Context, &Event) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.guards.insert(name.into(), Arc::new(f));
        self
    }

    /// Register a named delay.
    pub fn delay(mut self, name: impl Into<String>, delay: impl Into<resolve::Delay>) -> Self {
        self.delays.insert(name.into(), delay.into());
        self
    }

    /// Register a named activity.
    pub fn activity(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&mut Context, &Event, &exec::Meta) -> Option<exec::Cleanup>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.activities.insert(name.into(), Arc::new(f));
        self
    }
}

/// A statechart interpreter instance.
///
/// `Machine` is a cheap cloneable handle; clones share the same running
/// instance. Derivation operators ([`Machine::with_context`],
/// [`Machine::with_config`], [`Machine::with_options`]) produce fresh,
/// independently-lifecycled instances instead.
#[derive(Clone)]
pub struct Machine {
    inner: Arc<MachineInner>,
}

impl Machine {
    /// Build a machine from a config and its implementation registries.
    pub fn new(config: MachineConfig, options: MachineOptions) -> Self {
        Self {
            inner: Arc::new(MachineInner::new(config, options)),
        }
    }

    /// The machine's id.
    pub fn id(&self) -> MachineId {
        self.inner.id.clone()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> MachineStatus {
        self.inner.core.lock().status
    }

    /// Snapshot of the interpreter-owned context fields.
    pub fn state(&self) -> StateSnapshot {
        self.inner.core.lock().context.snapshot()
    }

    /// Snapshot of the user-defined context fields.
    pub fn context(&self) -> ContextFields {
        self.inner.core.lock().context.fields().clone()
    }

    /// Whether the current state carries the given tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.inner.core.lock().context.has_tag(tag)
    }

    /// Whether this instance was spawned as a child actor.
    pub fn is_actor(&self) -> bool {
        self.inner.actor.load(std::sync::atomic::Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start interpreting from the configured initial state. Idempotent
    /// while running.
    pub fn start(&self) -> &Self {
        self.inner.start(None);
        self
    }

    /// Start with an initial state and/or context override.
    pub fn start_with(&self, init: impl Into<InitOverride>) -> &Self {
        self.inner.start(Some(init.into()));
        self
    }

    /// Stop the machine, tearing down timers, activities, and children.
    /// Idempotent.
    pub fn stop(&self) -> &Self {
        self.inner.stop();
        self
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Dispatch an event against the current state.
    pub fn send(&self, event: impl Into<Event>) {
        self.inner.dispatch(event.into());
    }

    /// Dispatch an event, resolving it against the given state value (or
    /// the current one when `None`). Returns the target state's node when a
    /// transition was taken.
    pub fn transition(&self, state: Option<&str>, event: impl Into<Event>) -> Option<StateNode> {
        let target = self
            .inner
            .dispatch_from(state.map(str::to_string), event.into())?;
        self.inner.config.read().states.get(&target).cloned()
    }

    // ------------------------------------------------------------------
    // Context and derivation
    // ------------------------------------------------------------------

    /// Apply a partial context record, notifying context listeners.
    pub fn set_context(&self, partial: ContextFields) {
        self.inner.set_context(partial);
    }

    /// Derive a fresh, not-started machine with the partial context merged
    /// into the configured initial context.
    pub fn with_context(&self, partial: ContextFields) -> Machine {
        self.with_config(move |config| {
            for (key, value) in partial {
                config.context.insert(key, value);
            }
        })
    }

    /// Derive a fresh, not-started machine from a mutated copy of this
    /// machine's config.
    pub fn with_config(&self, f: impl FnOnce(&mut MachineConfig)) -> Machine {
        let mut config = (**self.inner.config.read()).clone();
        f(&mut config);
        Machine::new(config, self.inner.options.read().clone())
    }

    /// Derive a fresh, not-started machine from a mutated copy of this
    /// machine's options.
    pub fn with_options(&self, f: impl FnOnce(&mut MachineOptions)) -> Machine {
        let mut options = self.inner.options.read().clone();
        f(&mut options);
        Machine::new((**self.inner.config.read()).clone(), options)
    }

    /// Merge new implementations into the named action registry in place.
    pub fn update_actions(&self, actions: impl IntoIterator<Item = (String, ActionFn)>) {
        self.inner.options.write().actions.extend(actions);
    }

    // ------------------------------------------------------------------
    // Actors
    // ------------------------------------------------------------------

    /// Spawn a child machine: set its parent back-reference, register it
    /// under `id` (or its own id), arrange automatic deregistration when it
    /// completes, start it, and return its handle.
    ///
    /// A child belongs to exactly one parent. An instance that already has
    /// one is refused (with a warning) and returned unadopted: it is not
    /// registered here and not started.
    pub fn spawn(
        &self,
        source: impl Into<actors::SpawnSource>,
        id: impl Into<Option<String>>,
    ) -> Machine {
        let child = source.into().build();
        if !child.inner.set_parent(&self.inner) {
            return child;
        }
        let id = id.into().unwrap_or_else(|| child.id().to_string());
        self.inner.children.insert(id.clone(), child.clone());

        let parent = Arc::downgrade(&self.inner);
        let child_id = id;
        child.on_done(move |_| {
            if let Some(parent) = parent.upgrade() {
                parent.children.remove(&child_id);
            }
        });

        child.start();
        child
    }

    /// Stop and deregister a child by id.
    pub fn stop_child(&self, id: &str) -> MachineResult<()> {
        match self.inner.children.remove(id) {
            Some(child) => {
                child.stop();
                Ok(())
            }
            None => Err(error::MachineError::UnknownChild(id.to_string())),
        }
    }

    /// Forward an event to a child, addressed by literal id or a selector
    /// over the current context.
    pub fn send_child(
        &self,
        event: impl Into<Event>,
        target: impl Into<actors::ChildSelector>,
    ) -> MachineResult<()> {
        let selector = target.into();
        let id = {
            let core = self.inner.core.lock();
            selector.resolve(&core.context)
        };
        match self.inner.children.get(&id) {
            Some(child) => {
                child.send(event);
                Ok(())
            }
            None => Err(error::MachineError::UnknownChild(id)),
        }
    }

    /// Forward an event to the parent machine.
    pub fn send_parent(&self, event: impl Into<Event>) -> MachineResult<()> {
        self.inner.send_parent(event.into())
    }

    /// Whether a child with the given id is registered.
    pub fn has_child(&self, id: &str) -> bool {
        self.inner.children.contains(id)
    }

    /// Number of registered children.
    pub fn child_count(&self) -> usize {
        self.inner.children.len()
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Register a state listener. If the machine is running, the current
    /// snapshot is delivered immediately.
    pub fn subscribe(&self, listener: impl Fn(&StateSnapshot) + Send + Sync + 'static) -> Subscription {
        let listener: observer::StateListener = Arc::new(listener);
        self.replay(&listener);
        let id = self.inner.hub.add_state(listener);
        Subscription::new(&self.inner.hub, ListenerKind::State, id)
    }

    /// Register a state listener, chaining. Replays like [`Machine::subscribe`].
    pub fn on_transition(&self, listener: impl Fn(&StateSnapshot) + Send + Sync + 'static) -> &Self {
        let listener: observer::StateListener = Arc::new(listener);
        self.replay(&listener);
        self.inner.hub.add_state(listener);
        self
    }

    /// Register a context listener. No replay on subscribe.
    pub fn on_change(&self, listener: impl Fn(&ContextFields) + Send + Sync + 'static) -> &Self {
        self.inner.hub.add_context(Arc::new(listener));
        self
    }

    /// Register a done listener, fired on every final-state entry.
    pub fn on_done(&self, listener: impl Fn(&StateSnapshot) + Send + Sync + 'static) -> &Self {
        self.inner.hub.add_done(Arc::new(listener));
        self
    }

    fn replay(&self, listener: &observer::StateListener) {
        let snapshot = {
            let core = self.inner.core.lock();
            if core.status != MachineStatus::Running {
                return;
            }
            core.context.snapshot()
        };
        listener(&snapshot);
    }
}

// Re-export commonly used types
pub use actors::{ChildSelector, SpawnSource};
pub use context::{Context, ContextFields, StateSnapshot};
pub use error::{MachineError, MachineResult};
pub use event::{Event, MachineId};
pub use exec::{ActionFn, ActivityFn, Cleanup, Meta};
pub use guard::Guard;
pub use node::{
    ActionRef, ActivityRef, DelayedTransition, EveryDecl, EveryEntry, StateNode, Transition,
    TransitionSpec,
};
pub use observer::Subscription;
pub use resolve::{Delay, StateInfo};
