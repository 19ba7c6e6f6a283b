//! Observable context store
//!
//! The context holds the user-defined fields of a running machine alongside
//! the interpreter-owned fields: current state value, previous value, active
//! tags, last event name, and the completion flag. Mutations go through
//! explicit methods that bump a generation counter, which the orchestrator
//! uses to decide when context listeners must be notified.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

/// User-defined context fields, an arbitrary JSON record.
pub type ContextFields = serde_json::Map<String, Value>;

/// Mutable context record owned by one machine instance.
#[derive(Debug, Clone, Default)]
pub struct Context {
    fields: ContextFields,
    value: Option<String>,
    previous_value: Option<String>,
    tags: BTreeSet<String>,
    event: Option<String>,
    done: bool,
    generation: u64,
}

impl Context {
    /// Create a context seeded with the given user fields.
    pub fn new(fields: ContextFields) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    /// Read a user field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Write a user field.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if self.fields.get(&key) != Some(&value) {
            self.fields.insert(key, value);
            self.generation += 1;
        }
    }

    /// Remove a user field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.fields.remove(key);
        if removed.is_some() {
            self.generation += 1;
        }
        removed
    }

    /// Apply a partial record, overwriting existing keys.
    pub fn merge(&mut self, partial: ContextFields) {
        for (key, value) in partial {
            self.set(key, value);
        }
    }

    /// All user fields.
    pub fn fields(&self) -> &ContextFields {
        &self.fields
    }

    /// Current state value, `None` while stopped.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// State value before the most recent transition.
    pub fn previous_value(&self) -> Option<&str> {
        self.previous_value.as_deref()
    }

    /// Tags declared by the current state node.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Whether the current state carries the given tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Name of the last dispatched event.
    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    /// Whether a final state has been entered.
    pub fn done(&self) -> bool {
        self.done
    }

    /// An ephemeral view of the interpreter-owned fields.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            value: self.value.clone(),
            previous_value: self.previous_value.clone(),
            tags: self.tags.clone(),
            event: self.event.clone(),
            done: self.done,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_event(&mut self, name: String) {
        self.event = Some(name);
    }

    pub(crate) fn set_done(&mut self, done: bool) {
        self.done = done;
    }

    /// Move to a new state value, recomputing tags from the target node.
    pub(crate) fn assign_value(&mut self, value: String, tags: BTreeSet<String>) {
        self.previous_value = self.value.take();
        self.value = Some(value);
        self.tags = tags;
    }

    /// Clear the state value; tags are cleared alongside it.
    pub(crate) fn clear_value(&mut self) {
        self.previous_value = self.value.take();
        self.tags.clear();
    }

    /// Replace all user fields with the configured initial record.
    pub(crate) fn reset_fields(&mut self, fields: ContextFields) {
        if self.fields != fields {
            self.fields = fields;
            self.generation += 1;
        }
    }
}

/// Snapshot of the interpreter-owned context fields, delivered to state and
/// done listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    /// Current state value, `None` while stopped.
    pub value: Option<String>,

    /// State value before the most recent transition.
    pub previous_value: Option<String>,

    /// Tags declared by the current state node.
    pub tags: BTreeSet<String>,

    /// Name of the last dispatched event.
    pub event: Option<String>,

    /// Whether a final state has been entered.
    pub done: bool,
}

impl StateSnapshot {
    /// Whether the snapshot's value matches the given state name.
    pub fn matches(&self, value: &str) -> bool {
        self.value.as_deref() == Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_bumps_generation_only_on_change() {
        let mut ctx = Context::default();
        let start = ctx.generation();

        ctx.set("count", json!(1));
        assert_eq!(ctx.generation(), start + 1);

        // Writing the same value again is not a mutation.
        ctx.set("count", json!(1));
        assert_eq!(ctx.generation(), start + 1);

        ctx.set("count", json!(2));
        assert_eq!(ctx.generation(), start + 2);
    }

    #[test]
    fn assign_value_tracks_previous_and_tags() {
        let mut ctx = Context::default();
        let tags: BTreeSet<String> = ["open".to_string()].into();

        ctx.assign_value("idle".into(), BTreeSet::new());
        ctx.assign_value("active".into(), tags.clone());

        assert_eq!(ctx.value(), Some("active"));
        assert_eq!(ctx.previous_value(), Some("idle"));
        assert!(ctx.has_tag("open"));

        ctx.clear_value();
        assert_eq!(ctx.value(), None);
        assert!(ctx.tags().is_empty());
    }

    #[test]
    fn merge_overwrites_existing_keys() {
        let mut ctx = Context::default();
        ctx.set("a", json!(1));
        ctx.set("b", json!(2));

        let mut partial = ContextFields::new();
        partial.insert("b".into(), json!(3));
        ctx.merge(partial);

        assert_eq!(ctx.get("a"), Some(&json!(1)));
        assert_eq!(ctx.get("b"), Some(&json!(3)));
    }
}
