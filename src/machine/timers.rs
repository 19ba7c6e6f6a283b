//! Timer subsystem
//!
//! Converts `after` (one-shot delayed transition) and `every` (recurring
//! activity) declarations into scheduled tasks. Tasks are keyed by the
//! owning state so cancellation is a lookup-and-abort by state name, and
//! they hold only a weak handle to the machine, so a dropped machine never
//! fires stale timers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::interp::MachineInner;
use super::node::ActionRef;

/// Pending one-shot timers, keyed by owning state.
#[derive(Default)]
pub(crate) struct TimerTable {
    tasks: HashMap<String, Vec<JoinHandle<()>>>,
}

impl TimerTable {
    pub(crate) fn track(&mut self, state: &str, task: JoinHandle<()>) {
        self.tasks.entry(state.to_string()).or_default().push(task);
    }

    /// Cancel every pending timer owned by the given state.
    pub(crate) fn cancel_state(&mut self, state: &str) {
        if let Some(tasks) = self.tasks.remove(state) {
            for task in tasks {
                task.abort();
            }
        }
    }

    /// Cancel every pending timer owned by any state.
    pub(crate) fn cancel_all(&mut self) {
        for (_, tasks) in self.tasks.drain() {
            for task in tasks {
                task.abort();
            }
        }
    }
}

/// Arm a one-shot timer for the delayed transition at `index` in the given
/// state's `after` list. Returns `None` (with a warning) when no async
/// runtime is available to host the timer.
pub(crate) fn arm_after(
    machine: &Arc<MachineInner>,
    state: &str,
    index: usize,
    delay: Duration,
) -> Option<JoinHandle<()>> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(state = %state, "no async runtime; delayed transition will not arm");
        return None;
    };

    let weak = Arc::downgrade(machine);
    let state = state.to_string();
    Some(runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(machine) = weak.upgrade() {
            machine.fire_after(&state, index);
        }
    }))
}

/// Arm a recurring ticker that runs `actions` at `interval` while the given
/// state remains current. Returns `None` (with a warning) when no async
/// runtime is available.
pub(crate) fn arm_every(
    machine: &Arc<MachineInner>,
    state: &str,
    interval: Duration,
    actions: Vec<ActionRef>,
) -> Option<JoinHandle<()>> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(state = %state, "no async runtime; recurring activity will not arm");
        return None;
    };

    // A zero interval would spin; clamp to one tick of the timer wheel.
    let interval = interval.max(Duration::from_millis(1));

    let weak = Arc::downgrade(machine);
    let state = state.to_string();
    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick of a tokio interval completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(machine) = weak.upgrade() else {
                return;
            };
            machine.run_every_tick(&state, &actions);
        }
    }))
}
