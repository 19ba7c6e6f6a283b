//! Guard predicates and combinators
//!
//! A guard gates whether a candidate transition or recurring entry is
//! eligible. Guards are either named keys resolved against the options
//! registry, inline predicates, or boolean combinators over both.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::context::Context;
use super::event::Event;

/// A guard predicate over the current context and event.
pub type GuardFn = Arc<dyn Fn(&Context, &Event) -> bool + Send + Sync>;

/// A guard reference: named, inline, or a combinator.
#[derive(Clone)]
pub enum Guard {
    /// A key looked up in the guard registry.
    Named(String),
    /// An inline predicate.
    Of(GuardFn),
    /// Negation.
    Not(Box<Guard>),
    /// True when every inner guard passes.
    All(Vec<Guard>),
    /// True when any inner guard passes.
    Any(Vec<Guard>),
}

impl Guard {
    /// Reference a guard registered under `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Wrap an inline predicate.
    pub fn of(f: impl Fn(&Context, &Event) -> bool + Send + Sync + 'static) -> Self {
        Self::Of(Arc::new(f))
    }

    /// Negate a guard.
    pub fn not(guard: impl Into<Guard>) -> Self {
        Self::Not(Box::new(guard.into()))
    }

    /// Combine guards conjunctively.
    pub fn all(guards: impl IntoIterator<Item = Guard>) -> Self {
        Self::All(guards.into_iter().collect())
    }

    /// Combine guards disjunctively.
    pub fn any(guards: impl IntoIterator<Item = Guard>) -> Self {
        Self::Any(guards.into_iter().collect())
    }

    /// Evaluate the guard. A named guard missing from the registry is
    /// reported and resolves to `false`.
    pub fn resolve(
        &self,
        registry: &HashMap<String, GuardFn>,
        context: &Context,
        event: &Event,
    ) -> bool {
        match self {
            Self::Named(name) => match registry.get(name) {
                Some(f) => f(context, event),
                None => {
                    tracing::warn!(guard = %name, "unknown guard reference");
                    false
                }
            },
            Self::Of(f) => f(context, event),
            Self::Not(inner) => !inner.resolve(registry, context, event),
            Self::All(inner) => inner.iter().all(|g| g.resolve(registry, context, event)),
            Self::Any(inner) => inner.iter().any(|g| g.resolve(registry, context, event)),
        }
    }
}

impl From<&str> for Guard {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "Guard::Named({name:?})"),
            Self::Of(_) => write!(f, "Guard::Of(..)"),
            Self::Not(inner) => f.debug_tuple("Guard::Not").field(inner).finish(),
            Self::All(inner) => f.debug_tuple("Guard::All").field(inner).finish(),
            Self::Any(inner) => f.debug_tuple("Guard::Any").field(inner).finish(),
        }
    }
}
