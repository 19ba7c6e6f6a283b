//! Child actor bookkeeping
//!
//! A machine may spawn child machines ("actors"). The parent exclusively
//! owns its children, keyed by id; each child keeps a non-owning weak link
//! back to its parent. Children deregister themselves automatically when
//! they reach a final state.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::context::Context;
use super::Machine;

/// How a child machine is materialized at spawn time.
pub enum SpawnSource {
    /// An already-built machine instance.
    Instance(Machine),
    /// A factory invoked to build the machine.
    Factory(Box<dyn FnOnce() -> Machine + Send>),
}

impl SpawnSource {
    /// Wrap a factory function.
    pub fn factory(f: impl FnOnce() -> Machine + Send + 'static) -> Self {
        Self::Factory(Box::new(f))
    }

    pub(crate) fn build(self) -> Machine {
        match self {
            Self::Instance(machine) => machine,
            Self::Factory(f) => f(),
        }
    }
}

impl From<Machine> for SpawnSource {
    fn from(machine: Machine) -> Self {
        Self::Instance(machine)
    }
}

/// Identifies the recipient of a directed child send: a literal id or a
/// selector computed from the current context.
#[derive(Clone)]
pub enum ChildSelector {
    /// A literal child id.
    Id(String),
    /// A function of the current context returning a child id.
    Select(Arc<dyn Fn(&Context) -> String + Send + Sync>),
}

impl ChildSelector {
    /// Select a child by computing its id from the context.
    pub fn select(f: impl Fn(&Context) -> String + Send + Sync + 'static) -> Self {
        Self::Select(Arc::new(f))
    }

    pub(crate) fn resolve(&self, context: &Context) -> String {
        match self {
            Self::Id(id) => id.clone(),
            Self::Select(f) => f(context),
        }
    }
}

impl From<&str> for ChildSelector {
    fn from(id: &str) -> Self {
        Self::Id(id.to_string())
    }
}

impl From<String> for ChildSelector {
    fn from(id: String) -> Self {
        Self::Id(id)
    }
}

impl fmt::Debug for ChildSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "ChildSelector::Id({id:?})"),
            Self::Select(_) => write!(f, "ChildSelector::Select(..)"),
        }
    }
}

/// Owned registry of child machines, keyed by id.
#[derive(Default)]
pub(crate) struct ChildRegistry {
    children: Mutex<HashMap<String, Machine>>,
}

impl ChildRegistry {
    pub(crate) fn insert(&self, id: String, child: Machine) {
        self.children.lock().insert(id, child);
    }

    pub(crate) fn get(&self, id: &str) -> Option<Machine> {
        self.children.lock().get(id).cloned()
    }

    pub(crate) fn remove(&self, id: &str) -> Option<Machine> {
        self.children.lock().remove(id)
    }

    pub(crate) fn drain(&self) -> Vec<(String, Machine)> {
        self.children.lock().drain().collect()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.children.lock().contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.children.lock().len()
    }
}
