//! Common utilities for scenario tests.

#![allow(dead_code)] // Not every helper is used by every scenario module

use lockstep_runtime::harness::{Harness, HarnessOptions, RunReport};
use lockstep_runtime::task::{CycleInfo, TaskSet, TaskSpec};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded dispatch: which task ran at which tick.
pub type DispatchLog = Arc<Mutex<Vec<(u64, String)>>>;

/// Build a task set whose bodies append `(tick, id)` to a shared log.
pub fn recording_set(rates: &[(&str, u32)]) -> (TaskSet, DispatchLog) {
    let log: DispatchLog = Arc::new(Mutex::new(Vec::new()));

    let tasks = rates
        .iter()
        .map(|&(id, frequency_hz)| {
            let log = Arc::clone(&log);
            let name = id.to_string();
            TaskSpec::new(id, frequency_hz, move |cycle: CycleInfo| {
                log.lock().unwrap().push((cycle.tick, name.clone()));
                Ok(())
            })
        })
        .collect();

    let set = TaskSet::new(tasks).expect("rates must validate");
    (set, log)
}

/// Run `set` to the given horizon with default options.
pub fn run_to_horizon(set: TaskSet, horizon: Duration) -> RunReport {
    let options = HarnessOptions {
        horizon,
        ..Default::default()
    };
    Harness::new(set, options).run().expect("run must finish")
}

/// Ticks at which `id` was dispatched, in log order.
pub fn ticks_of(log: &DispatchLog, id: &str) -> Vec<u64> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|(_, name)| name == id)
        .map(|&(tick, _)| tick)
        .collect()
}
