//! Effect orchestrator and dispatch engine
//!
//! Owns the ordered effect sequence for every transition: exit effects of
//! the current state, transition actions, state assignment, then entry
//! effects of the next state. Each dispatch is atomic with respect to
//! context and value bookkeeping: the core lock is held for the whole
//! effect sequence, follow-up events queued from inside actions are drained
//! before the lock is released, and listener notifications plus directed
//! parent/child sends are delivered only after it is released. A send
//! through a captured handle from inside an action is folded into the
//! in-flight dispatch rather than blocking on the core lock.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::actors::ChildRegistry;
use super::context::Context;
use super::error::{MachineError, MachineResult};
use super::event::{Event, MachineId};
use super::exec::{run_actions, start_activities, Cleanup, EventRelay, Meta, Outbound};
use super::node::{ActionRef, EveryDecl, EveryEntry, StateNode, Transition};
use super::observer::ObserverHub;
use super::resolve::{resolve_info, select_transition, StateInfo};
use super::timers::{self, TimerTable};
use super::{InitOverride, MachineConfig, MachineOptions, MachineStatus};

/// Mutable interpreter state guarded by the core lock.
pub(crate) struct Core {
    pub(crate) status: MachineStatus,
    pub(crate) context: Context,
    /// Activity cleanups keyed by the owning state.
    cleanups: HashMap<String, Vec<Cleanup>>,
    /// Pending one-shot timers keyed by the owning state.
    timers: TimerTable,
}

impl Core {
    fn new(context: Context) -> Self {
        Self {
            status: MachineStatus::NotStarted,
            context,
            cleanups: HashMap::new(),
            timers: TimerTable::default(),
        }
    }
}

/// Work accumulated under the core lock and performed after it is released:
/// listener notifications in mutation order, directed sends, and the tail
/// end of a stop.
#[derive(Default)]
pub(crate) struct Outbox {
    notes: Vec<Note>,
    stopped: bool,
    state_dirty: bool,
    last_noted_gen: Option<u64>,
}

impl Outbox {
    fn begin(&mut self, generation: u64) {
        self.last_noted_gen = Some(generation);
    }
}

enum Note {
    State(super::context::StateSnapshot),
    Context(super::context::ContextFields),
    Done(super::context::StateSnapshot),
    Parent(Event),
    Child(String, Event),
}

/// Shared interpreter state behind the public `Machine` handle.
pub(crate) struct MachineInner {
    pub(crate) id: MachineId,
    pub(crate) config: RwLock<Arc<MachineConfig>>,
    pub(crate) options: RwLock<MachineOptions>,
    pub(crate) core: Mutex<Core>,
    /// Follow-up events queued from inside actions during a dispatch. Held
    /// outside the core lock so a re-entrant send can enqueue while a
    /// dispatch is in flight.
    pending: Mutex<VecDeque<Event>>,
    pub(crate) hub: Arc<ObserverHub>,
    pub(crate) parent: RwLock<Option<Weak<MachineInner>>>,
    pub(crate) children: ChildRegistry,
    pub(crate) actor: AtomicBool,
}

impl MachineInner {
    pub(crate) fn new(config: MachineConfig, options: MachineOptions) -> Self {
        let id = config
            .id
            .as_ref()
            .map(|name| MachineId::new(name.clone()))
            .unwrap_or_else(MachineId::random);
        let context = Context::new(config.context.clone());
        Self {
            id,
            config: RwLock::new(Arc::new(config)),
            options: RwLock::new(options),
            core: Mutex::new(Core::new(context)),
            pending: Mutex::new(VecDeque::new()),
            hub: Arc::new(ObserverHub::default()),
            parent: RwLock::new(None),
            children: ChildRegistry::default(),
            actor: AtomicBool::new(false),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub(crate) fn start(self: &Arc<Self>, init: Option<InitOverride>) {
        let mut outbox = Outbox::default();
        {
            let mut core = self.core.lock();
            if core.status == MachineStatus::Running {
                return;
            }
            let config = self.config.read().clone();
            let options = self.options.read().clone();

            core.status = MachineStatus::Running;
            core.context.set_done(false);
            outbox.begin(core.context.generation());

            let mut target = config.initial.clone();
            if let Some(init) = init {
                if let Some(fields) = init.context {
                    core.context.merge(fields);
                }
                if let Some(value) = init.value {
                    target = Some(value);
                }
            }
            let Some(target) = target else {
                tracing::warn!(machine = %self.id, "cannot start: no initial state");
                core.status = MachineStatus::NotStarted;
                return;
            };
            let Some(node) = config.states.get(&target).cloned() else {
                tracing::warn!(machine = %self.id, state = %target, "cannot start: initial state not configured");
                core.status = MachineStatus::NotStarted;
                return;
            };

            let event = Event::init();
            let relay = EventRelay::default();
            let info = StateInfo {
                transition: Transition::to(&target),
                target: Some(target),
                state_node: Some(node),
            };
            self.execute_change(&mut core, &config, &options, &event, &info, &relay, &mut outbox);
            self.drain_relay(&core, &relay, &mut outbox);

            // Observer delivery begins before the hook so the hook's effects
            // are observable.
            self.hub.attach();

            if core.status == MachineStatus::Running {
                if let Some(hook) = &config.on_start {
                    let meta = Meta::new(
                        core.context.snapshot(),
                        options.guards.clone(),
                        relay.clone(),
                    );
                    hook(&mut core.context, &event, &meta);
                    self.note_context(&core, &mut outbox, config.sync.context);
                    self.drain_relay(&core, &relay, &mut outbox);
                }
            }

            self.drain_queue(&mut core, &mut outbox);
            self.settle(&mut core, &mut outbox);
        }
        self.finish(outbox);
    }

    pub(crate) fn stop(self: &Arc<Self>) {
        let mut outbox = Outbox::default();
        {
            let mut core = self.core.lock();
            if core.status != MachineStatus::Running {
                return;
            }
            outbox.begin(core.context.generation());
            self.stop_core(&mut core, &mut outbox);
        }
        self.finish(outbox);
    }

    /// Teardown under the core lock. The remainder of the stop sequence
    /// (children, hook, detach) runs in `finish`.
    fn stop_core(&self, core: &mut Core, outbox: &mut Outbox) {
        core.context.set_event(Event::stop_marker().recorded_name());
        core.context.clear_value();
        outbox.notes.push(Note::State(core.context.snapshot()));

        let config = self.config.read().clone();
        if !config.context.is_empty() {
            core.context.reset_fields(config.context.clone());
            self.note_context(core, outbox, true);
        }

        for (_, cleanups) in core.cleanups.drain() {
            for cleanup in cleanups {
                cleanup();
            }
        }
        core.timers.cancel_all();
        self.pending.lock().clear();
        core.status = MachineStatus::Stopped;
        outbox.stopped = true;
    }

    /// Apply a partial context record and notify context listeners per the
    /// configured sync policy.
    pub(crate) fn set_context(self: &Arc<Self>, partial: super::context::ContextFields) {
        let mut outbox = Outbox::default();
        {
            let mut core = self.core.lock();
            outbox.begin(core.context.generation());
            core.context.merge(partial);
            let config = self.config.read().clone();
            self.note_context(&core, &mut outbox, config.sync.context);
            self.settle(&mut core, &mut outbox);
        }
        self.finish(outbox);
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    pub(crate) fn dispatch(self: &Arc<Self>, event: Event) {
        self.dispatch_from(None, event);
    }

    /// Dispatch an event, resolving it against the given state value (or the
    /// current one). Returns the resolved target, if any.
    ///
    /// A send issued through a captured handle from inside an action arrives
    /// here while the dispatch lock is already held. It is folded into the
    /// in-flight cycle as a synthetic follow-up instead of blocking on the
    /// non-reentrant lock.
    pub(crate) fn dispatch_from(
        self: &Arc<Self>,
        source: Option<String>,
        event: Event,
    ) -> Option<String> {
        let mut outbox = Outbox::default();
        let result;
        {
            let Some(mut core) = self.core.try_lock() else {
                self.pending.lock().push_back(event.mark_synthetic());
                return None;
            };
            outbox.begin(core.context.generation());
            result = self.process(&mut core, source.as_deref(), event, &mut outbox);
            self.drain_queue(&mut core, &mut outbox);
            self.settle(&mut core, &mut outbox);
        }
        self.finish(outbox);
        self.drain_pending();
        result
    }

    /// One-shot timer callback: re-enter the dispatch path for the delayed
    /// transition at `index`, unless the owning state was already left.
    pub(crate) fn fire_after(self: &Arc<Self>, state: &str, index: usize) {
        let mut outbox = Outbox::default();
        {
            let mut core = self.core.lock();
            if core.status != MachineStatus::Running || core.context.value() != Some(state) {
                return;
            }
            outbox.begin(core.context.generation());

            let config = self.config.read().clone();
            let options = self.options.read().clone();
            let Some(delayed) = config
                .states
                .get(state)
                .and_then(|node| node.after.get(index))
                .cloned()
            else {
                return;
            };

            let event = Event::after();
            // Guards are re-resolved at fire time.
            let Some(chosen) = select_transition(
                std::slice::from_ref(&delayed.transition),
                &options.guards,
                &core.context,
                &event,
            )
            .cloned() else {
                return;
            };

            let Some(info) = self.info_for(&config, chosen, &event) else {
                return;
            };
            let relay = EventRelay::default();
            match &info.target {
                None => self.execute_actions_only(
                    &mut core,
                    &config,
                    &options,
                    &event,
                    &info.transition,
                    &relay,
                    &mut outbox,
                ),
                Some(_) => self.execute_change(
                    &mut core,
                    &config,
                    &options,
                    &event,
                    &info,
                    &relay,
                    &mut outbox,
                ),
            }
            self.drain_relay(&core, &relay, &mut outbox);
            self.drain_queue(&mut core, &mut outbox);
            self.settle(&mut core, &mut outbox);
        }
        self.finish(outbox);
        self.drain_pending();
    }

    /// Recurring timer callback: run one tick's action list, unless the
    /// owning state was already left.
    pub(crate) fn run_every_tick(self: &Arc<Self>, state: &str, actions: &[ActionRef]) {
        let mut outbox = Outbox::default();
        {
            let mut core = self.core.lock();
            if core.status != MachineStatus::Running || core.context.value() != Some(state) {
                return;
            }
            outbox.begin(core.context.generation());

            let config = self.config.read().clone();
            let options = self.options.read().clone();
            let event = Event::every();
            let relay = EventRelay::default();
            let meta = Meta::new(
                core.context.snapshot(),
                options.guards.clone(),
                relay.clone(),
            );
            run_actions(actions, &options.actions, &mut core.context, &event, &meta);
            self.note_context(&core, &mut outbox, config.sync.context);
            self.drain_relay(&core, &relay, &mut outbox);
            self.drain_queue(&mut core, &mut outbox);
            self.settle(&mut core, &mut outbox);
        }
        self.finish(outbox);
        self.drain_pending();
    }

    fn process(
        self: &Arc<Self>,
        core: &mut Core,
        source: Option<&str>,
        event: Event,
        outbox: &mut Outbox,
    ) -> Option<String> {
        if core.status != MachineStatus::Running {
            tracing::warn!(machine = %self.id, event = %event.ty, "event dropped: machine is not running");
            return None;
        }
        let value = match source {
            Some(v) => v.to_string(),
            None => match core.context.value() {
                Some(v) => v.to_string(),
                None => {
                    tracing::warn!(machine = %self.id, event = %event.ty, "event dropped: no current state");
                    return None;
                }
            },
        };

        let config = self.config.read().clone();
        let options = self.options.read().clone();
        let Some(state_node) = config.states.get(&value) else {
            tracing::warn!(machine = %self.id, state = %value, "event dropped: state not configured");
            return None;
        };

        let info = resolve_info(
            state_node,
            &config.on,
            &config.states,
            &options.guards,
            &core.context,
            &event,
        )?;

        let relay = EventRelay::default();
        match &info.target {
            None => self.execute_actions_only(
                core,
                &config,
                &options,
                &event,
                &info.transition,
                &relay,
                outbox,
            ),
            Some(_) => {
                self.execute_change(core, &config, &options, &event, &info, &relay, outbox)
            }
        }
        self.drain_relay(core, &relay, outbox);
        info.target
    }

    // ------------------------------------------------------------------
    // Effect sequences
    // ------------------------------------------------------------------

    /// Full effect sequence for a move into `info.target`, covering both
    /// real transitions and self-transitions (which re-run exit and entry on
    /// the same value). Also handles the initial transition, where no state
    /// is current and the exit phase is skipped.
    fn execute_change(
        self: &Arc<Self>,
        core: &mut Core,
        config: &MachineConfig,
        options: &MachineOptions,
        event: &Event,
        info: &StateInfo,
        relay: &EventRelay,
        outbox: &mut Outbox,
    ) {
        let target = info.target.clone().expect("execute_change requires a target");
        let next_node = info
            .state_node
            .clone()
            .expect("execute_change requires the target node");
        let prev = core.context.value().map(str::to_string);

        core.context.set_event(event.recorded_name());

        // Exit effects of the current state.
        if let Some(prev) = &prev {
            let prev_node = config.states.get(prev).cloned().unwrap_or_default();
            let meta = Meta::new(
                core.context.snapshot(),
                options.guards.clone(),
                relay.clone(),
            );
            run_actions(
                &prev_node.exit,
                &options.actions,
                &mut core.context,
                event,
                &meta,
            );
            self.note_context(core, outbox, config.sync.context);
            core.timers.cancel_state(prev);
            if let Some(cleanups) = core.cleanups.remove(prev) {
                for cleanup in cleanups {
                    cleanup();
                }
            }
        }

        // Transition actions.
        if !info.transition.actions.is_empty() {
            let meta = Meta::new(
                core.context.snapshot(),
                options.guards.clone(),
                relay.clone(),
            );
            run_actions(
                &info.transition.actions,
                &options.actions,
                &mut core.context,
                event,
                &meta,
            );
            self.note_context(core, outbox, config.sync.context);
        }

        // State assignment: value, previous value, recomputed tags.
        core.context
            .assign_value(target.clone(), next_node.tags.clone());

        // Entry effects of the next state.
        if !next_node.entry.is_empty() {
            let meta = Meta::new(
                core.context.snapshot(),
                options.guards.clone(),
                relay.clone(),
            );
            run_actions(
                &next_node.entry,
                &options.actions,
                &mut core.context,
                event,
                &meta,
            );
            self.note_context(core, outbox, config.sync.context);
        }

        // Arm one-shot timers; delays are re-resolved per activation.
        for (index, delayed) in next_node.after.iter().enumerate() {
            let delay = delayed.delay.resolve(&options.delays, &core.context, event);
            if let Some(task) = timers::arm_after(self, &target, index, delay) {
                core.timers.track(&target, task);
            }
        }

        // Start activities: declared ones plus recurring tickers.
        let meta = Meta::new(
            core.context.snapshot(),
            options.guards.clone(),
            relay.clone(),
        );
        let mut cleanups = start_activities(
            &next_node.activities,
            &options.activities,
            &mut core.context,
            event,
            &meta,
        );
        self.note_context(core, outbox, config.sync.context);
        cleanups.extend(self.arm_every(core, options, &target, &next_node, event));
        if !cleanups.is_empty() {
            core.cleanups.entry(target.clone()).or_default().extend(cleanups);
        }

        if config.sync.state {
            outbox.notes.push(Note::State(core.context.snapshot()));
        } else {
            outbox.state_dirty = true;
        }

        // Entering a final state completes and stops the machine.
        if next_node.is_final {
            core.context.set_done(true);
            outbox.notes.push(Note::Done(core.context.snapshot()));
            self.stop_core(core, outbox);
        }
    }

    /// A transition with no target runs only its inline actions.
    fn execute_actions_only(
        self: &Arc<Self>,
        core: &mut Core,
        config: &MachineConfig,
        options: &MachineOptions,
        event: &Event,
        transition: &Transition,
        relay: &EventRelay,
        outbox: &mut Outbox,
    ) {
        core.context.set_event(event.recorded_name());
        let meta = Meta::new(
            core.context.snapshot(),
            options.guards.clone(),
            relay.clone(),
        );
        run_actions(
            &transition.actions,
            &options.actions,
            &mut core.context,
            event,
            &meta,
        );
        self.note_context(core, outbox, config.sync.context);
        if config.sync.state {
            outbox.notes.push(Note::State(core.context.snapshot()));
        } else {
            outbox.state_dirty = true;
        }
    }

    /// Arm recurring tickers for a state's `every` declaration, returning
    /// one cleanup per armed ticker. Ordered-form entries arm only the first
    /// eligible one; keyed entries arm every eligible one. A missing guard
    /// counts as eligible.
    fn arm_every(
        self: &Arc<Self>,
        core: &Core,
        options: &MachineOptions,
        state: &str,
        node: &StateNode,
        event: &Event,
    ) -> Vec<Cleanup> {
        let selected: Vec<&EveryEntry> = match &node.every {
            EveryDecl::None => Vec::new(),
            EveryDecl::First(entries) => entries
                .iter()
                .find(|entry| match &entry.cond {
                    Some(guard) => guard.resolve(&options.guards, &core.context, event),
                    None => true,
                })
                .into_iter()
                .collect(),
            EveryDecl::Each(entries) => entries
                .iter()
                .filter(|entry| match &entry.cond {
                    Some(guard) => guard.resolve(&options.guards, &core.context, event),
                    None => true,
                })
                .collect(),
        };

        let mut cleanups = Vec::new();
        for entry in selected {
            let interval = entry.interval.resolve(&options.delays, &core.context, event);
            if let Some(task) = timers::arm_every(self, state, interval, entry.actions.clone()) {
                cleanups.push(Box::new(move || task.abort()) as Cleanup);
            }
        }
        cleanups
    }

    // ------------------------------------------------------------------
    // Relay, queue, and delivery
    // ------------------------------------------------------------------

    fn drain_relay(&self, core: &Core, relay: &EventRelay, outbox: &mut Outbox) {
        for out in relay.drain() {
            match out {
                Outbound::ToSelf(event) => self.pending.lock().push_back(event),
                Outbound::ToParent(event) => outbox.notes.push(Note::Parent(event)),
                Outbound::ToChild(selector, event) => {
                    let id = selector.resolve(&core.context);
                    outbox.notes.push(Note::Child(id, event));
                }
            }
        }
    }

    fn drain_queue(self: &Arc<Self>, core: &mut Core, outbox: &mut Outbox) {
        while core.status == MachineStatus::Running {
            let next = self.pending.lock().pop_front();
            let Some(event) = next else {
                break;
            };
            self.process(core, None, event, outbox);
        }
        if core.status != MachineStatus::Running {
            self.pending.lock().clear();
        }
    }

    /// Run extra dispatch cycles for follow-ups that arrived after the
    /// in-flight cycle drained its queue. If another cycle holds the core
    /// lock, that cycle will drain them instead.
    fn drain_pending(self: &Arc<Self>) {
        loop {
            if self.pending.lock().is_empty() {
                return;
            }
            let Some(mut core) = self.core.try_lock() else {
                return;
            };
            let mut outbox = Outbox::default();
            outbox.begin(core.context.generation());
            self.drain_queue(&mut core, &mut outbox);
            self.settle(&mut core, &mut outbox);
            drop(core);
            self.finish(outbox);
        }
    }

    /// Push coalesced notifications for batched policies at the end of a
    /// dispatch cycle.
    fn settle(&self, core: &mut Core, outbox: &mut Outbox) {
        let config = self.config.read().clone();
        if !config.sync.state && outbox.state_dirty && !outbox.stopped {
            outbox.notes.push(Note::State(core.context.snapshot()));
            outbox.state_dirty = false;
        }
        self.note_context(core, outbox, true);
    }

    /// Record a context notification if the fields changed since the last
    /// note. With `deliver` false (batched policy), only the bookkeeping
    /// mark is skipped so `settle` coalesces into one final note.
    fn note_context(&self, core: &Core, outbox: &mut Outbox, deliver: bool) {
        let generation = core.context.generation();
        if !deliver || outbox.last_noted_gen == Some(generation) {
            return;
        }
        outbox.last_noted_gen = Some(generation);
        outbox.notes.push(Note::Context(core.context.fields().clone()));
    }

    /// Deliver everything accumulated under the lock, then complete a stop
    /// if one was triggered: children first, then listener teardown, then
    /// the hook, then detach.
    fn finish(self: &Arc<Self>, outbox: Outbox) {
        let stopped = outbox.stopped;
        if stopped {
            for (_, child) in self.children.drain() {
                child.stop();
            }
        }

        self.flush(outbox);

        if stopped {
            // Final notifications are out; registrations do not survive
            // the stop, so a restart is silent until callers resubscribe.
            self.hub.clear();
            let mut hook_outbox = Outbox::default();
            {
                let mut core = self.core.lock();
                hook_outbox.begin(core.context.generation());
                let config = self.config.read().clone();
                if let Some(hook) = &config.on_stop {
                    let options = self.options.read().clone();
                    let relay = EventRelay::default();
                    let meta = Meta::new(
                        core.context.snapshot(),
                        options.guards.clone(),
                        relay.clone(),
                    );
                    let event = Event::stop_marker();
                    hook(&mut core.context, &event, &meta);
                    self.note_context(&core, &mut hook_outbox, true);
                    self.drain_relay(&core, &relay, &mut hook_outbox);
                    // Self-sends from the hook have nowhere to go.
                    self.pending.lock().clear();
                }
            }
            self.flush(hook_outbox);
            self.hub.detach();
        }
    }

    fn flush(self: &Arc<Self>, outbox: Outbox) {
        for note in outbox.notes {
            match note {
                Note::State(snapshot) => self.hub.notify_state(&snapshot),
                Note::Context(fields) => self.hub.notify_context(&fields),
                Note::Done(snapshot) => self.hub.notify_done(&snapshot),
                Note::Parent(event) => {
                    let parent = self.parent.read().as_ref().and_then(Weak::upgrade);
                    match parent {
                        Some(parent) => parent.dispatch(event),
                        None => {
                            tracing::warn!(machine = %self.id, "send to parent dropped: no parent")
                        }
                    }
                }
                Note::Child(id, event) => match self.children.get(&id) {
                    Some(child) => child.send(event),
                    None => {
                        tracing::warn!(machine = %self.id, child = %id, "send to child dropped: unknown child")
                    }
                },
            }
        }
    }

    // ------------------------------------------------------------------
    // Actor registry operations
    // ------------------------------------------------------------------

    /// Install the parent back-reference. Once set it never changes; a
    /// second spawn of the same instance is reported and refused.
    pub(crate) fn set_parent(&self, parent: &Arc<MachineInner>) -> bool {
        let mut slot = self.parent.write();
        if slot.is_some() {
            tracing::warn!(machine = %self.id, "machine already belongs to a parent");
            return false;
        }
        *slot = Some(Arc::downgrade(parent));
        self.actor.store(true, Ordering::SeqCst);
        true
    }

    pub(crate) fn send_parent(self: &Arc<Self>, event: Event) -> MachineResult<()> {
        let parent = self.parent.read().as_ref().and_then(Weak::upgrade);
        match parent {
            Some(parent) => {
                parent.dispatch(event);
                Ok(())
            }
            None => Err(MachineError::NoParent(self.id.to_string())),
        }
    }

    fn info_for(
        &self,
        config: &MachineConfig,
        transition: Transition,
        event: &Event,
    ) -> Option<StateInfo> {
        let target = transition.target.clone();
        let node = match &target {
            Some(name) => match config.states.get(name) {
                Some(node) => Some(node.clone()),
                None => {
                    tracing::warn!(machine = %self.id, target = %name, event = %event.ty, "transition targets unknown state");
                    return None;
                }
            },
            None => None,
        };
        Some(StateInfo {
            transition,
            target,
            state_node: node,
        })
    }
}
