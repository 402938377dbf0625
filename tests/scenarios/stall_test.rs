//! Stall-on-overrun tests.
//!
//! When a body exceeds its period the whole stack must wait for it:
//! simulated time stops advancing, no cycle is skipped, and per-task
//! cycle counts come out exactly as if the overrun never happened.
//! Only wall-clock duration is allowed to grow.

use super::common::run_to_horizon;
use lockstep_runtime::task::{CycleInfo, TaskSet, TaskSpec};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_overrun_stalls_but_preserves_counts() {
    // 100Hz task sleeps three of its own periods on its first cycle.
    let slow = TaskSpec::new("slow", 100, |cycle: CycleInfo| {
        if cycle.tick == 0 {
            std::thread::sleep(Duration::from_millis(30));
        }
        Ok(())
    });
    let fast = TaskSpec::new("fast", 200, |_: CycleInfo| Ok(()));
    let set = TaskSet::new(vec![slow, fast]).unwrap();

    let report = run_to_horizon(set, Duration::from_millis(200));

    // 200ms at a 200Hz base rate is 40 ticks. The overrun must not
    // cost a single cycle, only wall-clock time: the run takes longer
    // than the horizon by roughly the stalled stretch.
    assert_eq!(report.final_tick, 40);
    assert_eq!(report.tasks[0].dispatches, 20);
    assert_eq!(report.tasks[1].dispatches, 40);
    assert!(report.elapsed >= Duration::from_millis(205));
    assert!(report.metrics.stall_count >= 1);
}

#[test]
fn test_stall_caps_tick_at_next_due_boundary() {
    // The fast task records the greatest tick it has seen. While the
    // slow task sleeps through its tick-4 cycle, the fast task may
    // still run ticks 5..8, but tick 8 dispatches the slow task again
    // and must wait for the unfinished cycle first.
    let max_tick_seen = Arc::new(AtomicU64::new(0));

    let tick_probe = Arc::clone(&max_tick_seen);
    let slow = TaskSpec::new("slow", 100, move |cycle: CycleInfo| {
        if cycle.tick == 4 {
            std::thread::sleep(Duration::from_millis(25));
            let seen = tick_probe.load(Ordering::SeqCst);
            assert!(seen < 8, "fast task crossed a due boundary during stall");
        }
        Ok(())
    });

    let tick_recorder = Arc::clone(&max_tick_seen);
    let fast = TaskSpec::new("fast", 400, move |cycle: CycleInfo| {
        tick_recorder.fetch_max(cycle.tick, Ordering::SeqCst);
        Ok(())
    });

    let set = TaskSet::new(vec![slow, fast]).unwrap();
    let report = run_to_horizon(set, Duration::from_millis(100));

    assert_eq!(report.final_tick, 40);
    assert_eq!(report.tasks[0].dispatches, 10);
    assert_eq!(report.tasks[1].dispatches, 40);
}
