//! Declarative state graph data model
//!
//! A machine configuration maps state names to [`StateNode`]s. Everything
//! here is description only; the interpreter in `interp` gives it life.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use super::context::Context;
use super::event::Event;
use super::exec::{ActionFn, ActivityFn, Cleanup, Meta};
use super::guard::Guard;
use super::resolve::Delay;

/// An action reference: a registry key or an inline closure.
#[derive(Clone)]
pub enum ActionRef {
    /// A key looked up in the action registry.
    Named(String),
    /// An inline action.
    Run(ActionFn),
}

impl ActionRef {
    /// Reference an action registered under `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Wrap an inline action.
    pub fn run(f: impl Fn(&mut Context, &Event, &Meta) + Send + Sync + 'static) -> Self {
        Self::Run(Arc::new(f))
    }
}

impl From<&str> for ActionRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl fmt::Debug for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "ActionRef::Named({name:?})"),
            Self::Run(_) => write!(f, "ActionRef::Run(..)"),
        }
    }
}

/// An activity reference: a registry key or an inline closure.
#[derive(Clone)]
pub enum ActivityRef {
    /// A key looked up in the activity registry.
    Named(String),
    /// An inline activity.
    Run(ActivityFn),
}

impl ActivityRef {
    /// Reference an activity registered under `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Wrap an inline activity.
    pub fn run(
        f: impl Fn(&mut Context, &Event, &Meta) -> Option<Cleanup> + Send + Sync + 'static,
    ) -> Self {
        Self::Run(Arc::new(f))
    }
}

impl From<&str> for ActivityRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl fmt::Debug for ActivityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "ActivityRef::Named({name:?})"),
            Self::Run(_) => write!(f, "ActivityRef::Run(..)"),
        }
    }
}

/// One candidate transition.
#[derive(Debug, Clone, Default)]
pub struct Transition {
    /// Target state, or `None` for an actions-only transition.
    pub target: Option<String>,
    /// Actions run between the source's exit and the target's entry.
    pub actions: Vec<ActionRef>,
    /// Guard gating eligibility; absent means always eligible.
    pub cond: Option<Guard>,
}

impl Transition {
    /// A transition to the named state.
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::default()
        }
    }

    /// A transition that runs actions without changing state.
    pub fn internal() -> Self {
        Self::default()
    }

    /// Append a transition action.
    pub fn action(mut self, action: impl Into<ActionRef>) -> Self {
        self.actions.push(action.into());
        self
    }

    /// Gate the transition with a guard.
    pub fn guard(mut self, guard: impl Into<Guard>) -> Self {
        self.cond = Some(guard.into());
        self
    }
}

impl From<&str> for Transition {
    fn from(target: &str) -> Self {
        Self::to(target)
    }
}

/// A transition table entry: one candidate or an ordered list evaluated
/// left to right.
#[derive(Debug, Clone)]
pub enum TransitionSpec {
    /// A single candidate.
    One(Transition),
    /// Ordered candidates; the first whose guard passes wins.
    Many(Vec<Transition>),
}

impl TransitionSpec {
    /// View the entry as a candidate slice.
    pub fn candidates(&self) -> &[Transition] {
        match self {
            Self::One(t) => std::slice::from_ref(t),
            Self::Many(list) => list,
        }
    }
}

impl From<Transition> for TransitionSpec {
    fn from(t: Transition) -> Self {
        Self::One(t)
    }
}

impl From<&str> for TransitionSpec {
    fn from(target: &str) -> Self {
        Self::One(Transition::to(target))
    }
}

impl From<Vec<Transition>> for TransitionSpec {
    fn from(list: Vec<Transition>) -> Self {
        Self::Many(list)
    }
}

/// A delayed transition: armed on state entry, cancelled on exit.
#[derive(Debug, Clone)]
pub struct DelayedTransition {
    /// Delay before the transition fires, re-resolved at each arming.
    pub delay: Delay,
    /// The transition to run when the timer fires; its guard is re-resolved
    /// at fire time.
    pub transition: Transition,
}

/// One recurring entry: an interval, the action list run on each tick, and
/// an optional eligibility guard.
#[derive(Debug, Clone)]
pub struct EveryEntry {
    /// Tick interval, re-resolved at each arming.
    pub interval: Delay,
    /// Actions run against each tick's synthetic event.
    pub actions: Vec<ActionRef>,
    /// Eligibility guard; a missing guard counts as a pass.
    pub cond: Option<Guard>,
}

/// Recurring-activity declaration for one state.
#[derive(Debug, Clone, Default)]
pub enum EveryDecl {
    /// No recurring activities.
    #[default]
    None,
    /// Ordered entries; only the first eligible entry is armed.
    First(Vec<EveryEntry>),
    /// Keyed entries; every eligible entry is armed.
    Each(Vec<EveryEntry>),
}

/// Declarative description of one state.
#[derive(Debug, Clone, Default)]
pub struct StateNode {
    /// Actions run on entry, before timers arm and activities start.
    pub entry: Vec<ActionRef>,
    /// Actions run on exit, before timers cancel and activities stop.
    pub exit: Vec<ActionRef>,
    /// Transition tables keyed by event type.
    pub on: HashMap<String, TransitionSpec>,
    /// Delayed transitions owned by this state.
    pub after: Vec<DelayedTransition>,
    /// Recurring activities owned by this state.
    pub every: EveryDecl,
    /// Long-running effects started on entry and stopped on exit.
    pub activities: Vec<ActivityRef>,
    /// Opaque labels exposed for UI-level queries.
    pub tags: BTreeSet<String>,
    /// Entering a final state completes the machine.
    pub is_final: bool,
}

impl StateNode {
    /// An empty state node.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry action.
    pub fn entry(mut self, action: impl Into<ActionRef>) -> Self {
        self.entry.push(action.into());
        self
    }

    /// Append an exit action.
    pub fn exit(mut self, action: impl Into<ActionRef>) -> Self {
        self.exit.push(action.into());
        self
    }

    /// Register a transition table entry for an event type.
    pub fn on(mut self, event: impl Into<String>, spec: impl Into<TransitionSpec>) -> Self {
        self.on.insert(event.into(), spec.into());
        self
    }

    /// Append a delayed transition.
    pub fn after(mut self, delay: impl Into<Delay>, transition: impl Into<Transition>) -> Self {
        self.after.push(DelayedTransition {
            delay: delay.into(),
            transition: transition.into(),
        });
        self
    }

    /// Append a recurring entry to the ordered (first-eligible-wins) form.
    pub fn every(mut self, interval: impl Into<Delay>, actions: Vec<ActionRef>) -> Self {
        let entry = EveryEntry {
            interval: interval.into(),
            actions,
            cond: None,
        };
        self.push_every(entry, false);
        self
    }

    /// Append a guarded recurring entry to the ordered form.
    pub fn every_guarded(
        mut self,
        interval: impl Into<Delay>,
        actions: Vec<ActionRef>,
        guard: impl Into<Guard>,
    ) -> Self {
        let entry = EveryEntry {
            interval: interval.into(),
            actions,
            cond: Some(guard.into()),
        };
        self.push_every(entry, false);
        self
    }

    /// Append a keyed recurring entry; every eligible keyed entry is armed.
    pub fn every_named(mut self, key: impl Into<String>, actions: Vec<ActionRef>) -> Self {
        let entry = EveryEntry {
            interval: Delay::Named(key.into()),
            actions,
            cond: None,
        };
        self.push_every(entry, true);
        self
    }

    /// Append a guarded keyed recurring entry.
    pub fn every_named_guarded(
        mut self,
        key: impl Into<String>,
        actions: Vec<ActionRef>,
        guard: impl Into<Guard>,
    ) -> Self {
        let entry = EveryEntry {
            interval: Delay::Named(key.into()),
            actions,
            cond: Some(guard.into()),
        };
        self.push_every(entry, true);
        self
    }

    /// Append a long-running activity.
    pub fn activity(mut self, activity: impl Into<ActivityRef>) -> Self {
        self.activities.push(activity.into());
        self
    }

    /// Attach an opaque tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Mark the state as final.
    pub fn final_state(mut self) -> Self {
        self.is_final = true;
        self
    }

    fn push_every(&mut self, entry: EveryEntry, keyed: bool) {
        match &mut self.every {
            EveryDecl::None => {
                self.every = if keyed {
                    EveryDecl::Each(vec![entry])
                } else {
                    EveryDecl::First(vec![entry])
                };
            }
            EveryDecl::First(list) | EveryDecl::Each(list) => list.push(entry),
        }
    }
}
