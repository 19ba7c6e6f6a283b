//! Property tests for resolution and context semantics

use cadence::machine::{
    Context, ContextFields, Event, Guard, Machine, MachineConfig, MachineOptions, StateNode,
    Transition,
};
use proptest::prelude::*;
use std::collections::HashMap;

proptest! {
    /// The chosen candidate is always the first whose guard passes.
    #[test]
    fn first_passing_candidate_wins(outcomes in prop::collection::vec(any::<bool>(), 1..8)) {
        let candidates: Vec<Transition> = outcomes
            .iter()
            .enumerate()
            .map(|(i, pass)| {
                let pass = *pass;
                Transition::to(format!("s{i}")).guard(Guard::of(move |_, _| pass))
            })
            .collect();

        let chosen = cadence::machine::resolve::select_transition(
            &candidates,
            &HashMap::new(),
            &Context::default(),
            &Event::new("X"),
        );

        let expected = outcomes.iter().position(|pass| *pass);
        prop_assert_eq!(
            chosen.and_then(|t| t.target.clone()),
            expected.map(|i| format!("s{i}"))
        );
    }

    /// Merging a partial record overwrites shared keys and preserves the rest.
    #[test]
    fn merge_overwrites_and_preserves(
        base in prop::collection::hash_map("[a-d]", any::<i64>(), 0..6),
        partial in prop::collection::hash_map("[a-f]", any::<i64>(), 0..6),
    ) {
        let mut fields = ContextFields::new();
        for (k, v) in &base {
            fields.insert(k.clone(), serde_json::json!(v));
        }
        let mut ctx = Context::new(fields);

        let mut update = ContextFields::new();
        for (k, v) in &partial {
            update.insert(k.clone(), serde_json::json!(v));
        }
        ctx.merge(update);

        for (k, v) in &partial {
            prop_assert_eq!(ctx.get(k), Some(&serde_json::json!(v)));
        }
        for (k, v) in &base {
            if !partial.contains_key(k) {
                prop_assert_eq!(ctx.get(k), Some(&serde_json::json!(v)));
            }
        }
    }

    /// Guard combinators agree with plain boolean logic.
    #[test]
    fn combinators_match_boolean_logic(bits in prop::collection::vec(any::<bool>(), 1..6)) {
        let guards: Vec<Guard> = bits
            .iter()
            .map(|b| {
                let b = *b;
                Guard::of(move |_, _| b)
            })
            .collect();

        let registry = HashMap::new();
        let ctx = Context::default();
        let event = Event::new("X");

        prop_assert_eq!(
            Guard::all(guards.clone()).resolve(&registry, &ctx, &event),
            bits.iter().all(|b| *b)
        );
        prop_assert_eq!(
            Guard::any(guards.clone()).resolve(&registry, &ctx, &event),
            bits.iter().any(|b| *b)
        );
        prop_assert_eq!(
            Guard::not(Guard::all(guards)).resolve(&registry, &ctx, &event),
            !bits.iter().all(|b| *b)
        );
    }

    /// A two-state toggle lands where the parity of sends says it must.
    #[test]
    fn toggle_parity(sends in 0usize..20) {
        let config = MachineConfig::new("idle")
            .state("idle", StateNode::new().on("TOGGLE", "active"))
            .state("active", StateNode::new().on("TOGGLE", "idle"));
        let machine = Machine::new(config, MachineOptions::new());

        machine.start();
        for _ in 0..sends {
            machine.send("TOGGLE");
        }

        let expected = if sends % 2 == 0 { "idle" } else { "active" };
        let state = machine.state();
        prop_assert_eq!(state.value.as_deref(), Some(expected));
    }
}
