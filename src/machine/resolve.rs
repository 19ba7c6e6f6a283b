//! Delay and transition resolution
//!
//! Pure helpers that turn declarative references into concrete decisions:
//! a delay reference into a duration, and a candidate transition list into
//! the single chosen transition (first matching guard wins).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::context::Context;
use super::event::Event;
use super::guard::GuardFn;
use super::node::{StateNode, Transition, TransitionSpec};

/// A delay computed from the current context and event.
pub type DelayFn = Arc<dyn Fn(&Context, &Event) -> Duration + Send + Sync>;

/// A delay reference: a literal, a registry key, or a computed function.
///
/// Delays are re-resolved on every activation, so computed delays may depend
/// on the context at arming time.
#[derive(Clone)]
pub enum Delay {
    /// A literal duration in milliseconds.
    Millis(u64),
    /// A key looked up in the delay registry.
    Named(String),
    /// A function of the current context and event.
    Of(DelayFn),
}

impl Delay {
    /// Wrap a computed delay.
    pub fn of(f: impl Fn(&Context, &Event) -> Duration + Send + Sync + 'static) -> Self {
        Self::Of(Arc::new(f))
    }

    /// Resolve to a concrete duration. Unknown registry keys are reported
    /// and resolve to zero, the default duration.
    pub fn resolve(
        &self,
        registry: &HashMap<String, Delay>,
        context: &Context,
        event: &Event,
    ) -> Duration {
        match self {
            Self::Millis(ms) => Duration::from_millis(*ms),
            Self::Of(f) => f(context, event),
            Self::Named(name) => match registry.get(name) {
                Some(Delay::Millis(ms)) => Duration::from_millis(*ms),
                Some(Delay::Of(f)) => f(context, event),
                Some(Delay::Named(_)) => {
                    tracing::warn!(delay = %name, "delay registry entries may not alias; using 0ms");
                    Duration::ZERO
                }
                None => {
                    tracing::warn!(delay = %name, "unknown delay reference; using 0ms");
                    Duration::ZERO
                }
            },
        }
    }
}

impl From<u64> for Delay {
    fn from(ms: u64) -> Self {
        Self::Millis(ms)
    }
}

impl From<&str> for Delay {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<Duration> for Delay {
    fn from(d: Duration) -> Self {
        Self::Millis(d.as_millis() as u64)
    }
}

impl fmt::Debug for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Millis(ms) => write!(f, "Delay::Millis({ms})"),
            Self::Named(name) => write!(f, "Delay::Named({name:?})"),
            Self::Of(_) => write!(f, "Delay::Of(..)"),
        }
    }
}

/// Ephemeral resolution result for one event: the chosen transition, the
/// resolved target (if the transition moves anywhere), and the target's node.
#[derive(Debug, Clone)]
pub struct StateInfo {
    /// The transition selected from the candidate list.
    pub transition: Transition,
    /// Resolved target state, `None` for an actions-only transition.
    pub target: Option<String>,
    /// State node of the target, when a target was resolved.
    pub state_node: Option<StateNode>,
}

/// Select the first candidate whose guard resolves truthy. An unconditioned
/// candidate always matches. Returns `None` when no candidate matches, which
/// callers must treat as "ignore the event".
pub fn select_transition<'a>(
    candidates: &'a [Transition],
    guards: &HashMap<String, GuardFn>,
    context: &Context,
    event: &Event,
) -> Option<&'a Transition> {
    candidates.iter().find(|t| match &t.cond {
        Some(guard) => guard.resolve(guards, context, event),
        None => true,
    })
}

/// Resolve an event against a state's transition table, falling back to the
/// machine-level table, and produce the full [`StateInfo`].
///
/// A chosen transition whose target names an unknown state is reported and
/// the event is ignored.
pub fn resolve_info(
    state_node: &StateNode,
    machine_on: &HashMap<String, TransitionSpec>,
    states: &HashMap<String, StateNode>,
    guards: &HashMap<String, GuardFn>,
    context: &Context,
    event: &Event,
) -> Option<StateInfo> {
    let spec = state_node
        .on
        .get(&event.ty)
        .or_else(|| machine_on.get(&event.ty))?;

    let chosen = select_transition(spec.candidates(), guards, context, event)?.clone();

    let target = chosen.target.clone();
    let node = match &target {
        Some(name) => match states.get(name) {
            Some(node) => Some(node.clone()),
            None => {
                tracing::warn!(target = %name, event = %event.ty, "transition targets unknown state");
                return None;
            }
        },
        None => None,
    };

    Some(StateInfo {
        transition: chosen,
        target,
        state_node: node,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::guard::Guard;

    fn guards() -> HashMap<String, GuardFn> {
        let mut map: HashMap<String, GuardFn> = HashMap::new();
        map.insert("pass".into(), Arc::new(|_, _| true));
        map.insert("fail".into(), Arc::new(|_, _| false));
        map
    }

    #[test]
    fn first_matching_guard_wins() {
        let candidates = vec![
            Transition::to("a").guard("fail"),
            Transition::to("b").guard("pass"),
            Transition::to("c"),
        ];
        let chosen = select_transition(&candidates, &guards(), &Context::default(), &"X".into());
        assert_eq!(chosen.unwrap().target.as_deref(), Some("b"));
    }

    #[test]
    fn unconditional_candidate_always_matches() {
        let candidates = vec![Transition::to("a").guard("fail"), Transition::to("b")];
        let chosen = select_transition(&candidates, &guards(), &Context::default(), &"X".into());
        assert_eq!(chosen.unwrap().target.as_deref(), Some("b"));
    }

    #[test]
    fn no_match_yields_none() {
        let candidates = vec![Transition::to("a").guard("fail")];
        let chosen = select_transition(&candidates, &guards(), &Context::default(), &"X".into());
        assert!(chosen.is_none());
    }

    #[test]
    fn named_delay_resolves_from_registry() {
        let mut registry: HashMap<String, Delay> = HashMap::new();
        registry.insert("debounce".into(), Delay::Millis(250));

        let delay = Delay::Named("debounce".into());
        let resolved = delay.resolve(&registry, &Context::default(), &"X".into());
        assert_eq!(resolved, Duration::from_millis(250));
    }

    #[test]
    fn computed_delay_reads_context() {
        let registry = HashMap::new();
        let mut ctx = Context::default();
        ctx.set("wait_ms", serde_json::json!(40));

        let delay = Delay::of(|ctx, _| {
            Duration::from_millis(ctx.get("wait_ms").and_then(|v| v.as_u64()).unwrap_or(0))
        });
        assert_eq!(
            delay.resolve(&registry, &ctx, &"X".into()),
            Duration::from_millis(40)
        );
    }

    #[test]
    fn unknown_delay_defaults_to_zero() {
        let registry = HashMap::new();
        let delay = Delay::Named("absent".into());
        assert_eq!(
            delay.resolve(&registry, &Context::default(), &"X".into()),
            Duration::ZERO
        );
    }

    #[test]
    fn resolve_info_falls_back_to_machine_table() {
        let mut states = HashMap::new();
        states.insert("idle".to_string(), StateNode::new());
        states.insert("other".to_string(), StateNode::new());

        let mut machine_on = HashMap::new();
        machine_on.insert("GLOBAL".to_string(), TransitionSpec::from("other"));

        let info = resolve_info(
            states.get("idle").unwrap(),
            &machine_on,
            &states,
            &guards(),
            &Context::default(),
            &"GLOBAL".into(),
        )
        .unwrap();
        assert_eq!(info.target.as_deref(), Some("other"));
    }

    #[test]
    fn unknown_target_state_is_ignored() {
        let mut states = HashMap::new();
        states.insert(
            "idle".to_string(),
            StateNode::new().on("GO", Transition::to("missing")),
        );

        let info = resolve_info(
            states.get("idle").unwrap(),
            &HashMap::new(),
            &states,
            &guards(),
            &Context::default(),
            &"GO".into(),
        );
        assert!(info.is_none());
    }

    #[test]
    fn guard_combinator_gates_selection() {
        let candidates = vec![
            Transition::to("a").guard(Guard::all(["pass".into(), "fail".into()])),
            Transition::to("b").guard(Guard::any(["fail".into(), "pass".into()])),
        ];
        let chosen = select_transition(&candidates, &guards(), &Context::default(), &"X".into());
        assert_eq!(chosen.unwrap().target.as_deref(), Some("b"));
    }
}
