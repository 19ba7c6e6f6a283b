//! Integration tests for the machine lifecycle
//!
//! Tests start, stop, restart, and final-state completion end to end.

use cadence::machine::{
    ContextFields, InitOverride, Machine, MachineConfig, MachineOptions, MachineStatus, StateNode,
};
use serde_json::json;

fn toggle_machine() -> Machine {
    let config = MachineConfig::new("idle")
        .id("toggle")
        .state("idle", StateNode::new().on("TOGGLE", "active"))
        .state("active", StateNode::new().on("TOGGLE", "idle"));
    Machine::new(config, MachineOptions::new())
}

#[test]
fn start_enters_the_initial_state() {
    let machine = toggle_machine();
    assert_eq!(machine.status(), MachineStatus::NotStarted);
    assert_eq!(machine.state().value, None);

    machine.start();

    assert_eq!(machine.status(), MachineStatus::Running);
    assert_eq!(machine.state().value.as_deref(), Some("idle"));
    assert_eq!(machine.state().event.as_deref(), Some("machine.init"));
}

#[test]
fn start_is_idempotent_while_running() {
    let machine = toggle_machine();
    machine.start();
    machine.send("TOGGLE");
    assert_eq!(machine.state().value.as_deref(), Some("active"));

    // A second start must not re-run the initial transition.
    machine.start();
    assert_eq!(machine.state().value.as_deref(), Some("active"));
}

#[test]
fn stop_clears_the_state_value() {
    let machine = toggle_machine();
    machine.start().stop();

    assert_eq!(machine.status(), MachineStatus::Stopped);
    let state = machine.state();
    assert_eq!(state.value, None);
    assert_eq!(state.previous_value.as_deref(), Some("idle"));
    assert_eq!(state.event.as_deref(), Some("machine.stop"));
}

#[test]
fn stop_is_idempotent() {
    let machine = toggle_machine();
    machine.start().stop().stop();
    assert_eq!(machine.status(), MachineStatus::Stopped);
}

#[test]
fn events_are_dropped_while_stopped() {
    let machine = toggle_machine();
    machine.start().stop();
    machine.send("TOGGLE");
    assert_eq!(machine.state().value, None);
}

#[test]
fn restart_runs_the_initial_transition_again() {
    let machine = toggle_machine();
    machine.start();
    machine.send("TOGGLE");
    machine.stop();

    machine.start();
    assert_eq!(machine.status(), MachineStatus::Running);
    assert_eq!(machine.state().value.as_deref(), Some("idle"));
}

#[test]
fn stop_restores_the_configured_context() {
    let config = MachineConfig::new("idle")
        .state(
            "idle",
            StateNode::new().entry(cadence::machine::ActionRef::run(|ctx, _, _| {
                ctx.set("count", json!(10))
            })),
        )
        .context_field("count", json!(0));
    let machine = Machine::new(config, MachineOptions::new());

    machine.start();
    assert_eq!(machine.context().get("count"), Some(&json!(10)));

    machine.stop();
    assert_eq!(machine.context().get("count"), Some(&json!(0)));
}

#[test]
fn start_with_overrides_initial_state_and_context() {
    let machine = toggle_machine();
    let mut fields = ContextFields::new();
    fields.insert("seed".into(), json!(7));

    machine.start_with(InitOverride::value("active").with_context(fields));

    assert_eq!(machine.state().value.as_deref(), Some("active"));
    assert_eq!(machine.context().get("seed"), Some(&json!(7)));
}

#[test]
fn start_with_bare_state_name() {
    let machine = toggle_machine();
    machine.start_with("active");
    assert_eq!(machine.state().value.as_deref(), Some("active"));
}

#[test]
fn entering_a_final_state_completes_and_stops() {
    let config = MachineConfig::new("working")
        .state("working", StateNode::new().on("FINISH", "done"))
        .state("done", StateNode::new().final_state());
    let machine = Machine::new(config, MachineOptions::new());

    machine.start();
    machine.send("FINISH");

    assert_eq!(machine.status(), MachineStatus::Stopped);
    assert_eq!(machine.state().value, None);
    // FINISH after completion is dropped, not an error.
    machine.send("FINISH");
}

#[test]
fn starting_in_a_final_state_completes_immediately() {
    let config = MachineConfig::new("done").state("done", StateNode::new().final_state());
    let machine = Machine::new(config, MachineOptions::new());

    machine.start();
    assert_eq!(machine.status(), MachineStatus::Stopped);
}

#[test]
fn lifecycle_hooks_fire_in_order() {
    use parking_lot::Mutex;
    use std::sync::Arc;

    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let started = log.clone();
    let stopped = log.clone();

    let config = MachineConfig::new("idle")
        .state("idle", StateNode::new())
        .on_start(move |_, _, _| started.lock().push("start"))
        .on_stop(move |_, _, _| stopped.lock().push("stop"));
    let machine = Machine::new(config, MachineOptions::new());

    machine.start().stop();
    assert_eq!(*log.lock(), vec!["start", "stop"]);
}

#[test]
fn activities_start_on_entry_and_clean_up_on_exit() {
    use cadence::machine::{ActivityRef, Cleanup};
    use parking_lot::Mutex;
    use std::sync::Arc;

    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let on_start = log.clone();
    let on_stop = log.clone();

    let config = MachineConfig::new("streaming")
        .state(
            "streaming",
            StateNode::new()
                .activity(ActivityRef::run(move |_, _, _| {
                    on_start.lock().push("started");
                    let on_stop = on_stop.clone();
                    Some(Box::new(move || on_stop.lock().push("cleaned")) as Cleanup)
                }))
                .on("PAUSE", "paused"),
        )
        .state("paused", StateNode::new().on("RESUME", "streaming"));
    let machine = Machine::new(config, MachineOptions::new());

    machine.start();
    assert_eq!(*log.lock(), vec!["started"]);

    machine.send("PAUSE");
    assert_eq!(*log.lock(), vec!["started", "cleaned"]);

    machine.send("RESUME");
    assert_eq!(*log.lock(), vec!["started", "cleaned", "started"]);
}

#[test]
fn stop_runs_activity_cleanups() {
    use cadence::machine::Cleanup;
    use parking_lot::Mutex;
    use std::sync::Arc;

    let cleaned = Arc::new(Mutex::new(false));
    let flag = cleaned.clone();

    let config = MachineConfig::new("streaming").state(
        "streaming",
        StateNode::new().activity("watch"),
    );
    let options = MachineOptions::new().activity("watch", move |_, _, _| {
        let flag = flag.clone();
        Some(Box::new(move || *flag.lock() = true) as Cleanup)
    });
    let machine = Machine::new(config, options);

    machine.start();
    assert!(!*cleaned.lock());

    machine.stop();
    assert!(*cleaned.lock());
}

#[test]
fn missing_initial_state_leaves_the_machine_not_started() {
    let config = MachineConfig::default().state("idle", StateNode::new());
    let machine = Machine::new(config, MachineOptions::new());

    machine.start();
    assert_eq!(machine.status(), MachineStatus::NotStarted);

    // An override supplies the missing initial state.
    machine.start_with("idle");
    assert_eq!(machine.status(), MachineStatus::Running);
}
