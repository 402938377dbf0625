//! Master dispatch loop.
//!
//! The scheduler runs on the controlling thread and paces simulated
//! time at the fastest task's rate. Each poll it checks, in order:
//! fault, horizon, wall-clock period, rate-master completion, and the
//! eligibility of every due task. Dispatch happens only when every due
//! task has finished its previous cycle; otherwise the whole stack
//! stalls. A stall is a liveness cost, never a correctness one: no
//! task's cycle is ever skipped, and simulated time never overtakes an
//! unfinished computation.
//!
//! The scheduler never advances the tick itself. Only the rate-master
//! worker does, after completing a cycle, which is what makes "tick N
//! exists" equivalent to "every task due at tick N was dispatched and
//! the fastest finished it".

use crate::flag::SharedFlag;
use crate::task::TaskSet;
use lockstep_common::config::IdleStrategy;
use lockstep_common::metrics::PeriodMetrics;
use lockstep_common::tick::{sim_time, TickCounter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Per-task dispatch bookkeeping owned by the scheduler.
#[derive(Debug)]
pub struct TaskSlot {
    /// Task identifier, for logs.
    pub id: String,
    /// The task's dispatch flag (scheduler raises, worker clears).
    pub flag: Arc<SharedFlag>,
    /// Base ticks per one of this task's periods.
    pub ratio: u64,
    /// Cycle countdown: the task is due when `counter == ratio`.
    counter: u64,
}

impl TaskSlot {
    /// Create a slot that is due on the very first tick.
    #[must_use]
    pub fn new(id: impl Into<String>, flag: Arc<SharedFlag>, ratio: u64) -> Self {
        Self {
            id: id.into(),
            flag,
            ratio,
            // Start at the ratio so every task fires at tick zero.
            counter: ratio,
        }
    }

    fn is_due(&self) -> bool {
        self.counter >= self.ratio
    }
}

/// Outcome of one scheduler poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Horizon reached; the stop flag has been raised.
    Finished,
    /// The fault flag was observed; the stop flag has been raised.
    Faulted,
    /// The base period has not elapsed, or the rate master is still
    /// mid-cycle. Poll again.
    WaitingPeriod,
    /// A due task has not finished its previous cycle: nothing was
    /// dispatched. Poll again (the global stall policy).
    Stalled {
        /// Index of the unfinished due task.
        task: usize,
    },
    /// Flags were raised for the listed task indices.
    Dispatched {
        /// Tasks dispatched this tick, rate master last.
        due: Vec<usize>,
    },
}

/// Everything the scheduler shares with the rest of the run.
pub struct SchedulerHandles {
    /// Global tick counter (read-only here).
    pub tick: Arc<TickCounter>,
    /// Global stop flag; raised by the scheduler at the horizon.
    pub stop: Arc<SharedFlag>,
    /// Global fault flag; raised by workers, read here.
    pub fault: Arc<SharedFlag>,
}

/// Wall-clock-paced lockstep scheduler.
pub struct Scheduler {
    slots: Vec<TaskSlot>,
    rate_master: usize,
    base_period: Duration,
    horizon: Duration,
    handles: SchedulerHandles,
    idle: IdleStrategy,
    last_dispatch: Option<Instant>,
    metrics: PeriodMetrics,
    /// Squelches repeated stall warnings within one episode.
    stall_logged: bool,
}

impl Scheduler {
    /// Number of dispatch periods retained for percentile queries.
    const METRICS_CAPACITY: usize = 8192;

    /// Create a scheduler over pre-built task slots.
    ///
    /// `rate_master` indexes the fastest task's slot; its ratio must
    /// be 1 (guaranteed by [`TaskSet`] validation upstream).
    #[must_use]
    pub fn new(
        slots: Vec<TaskSlot>,
        rate_master: usize,
        base_period: Duration,
        horizon: Duration,
        handles: SchedulerHandles,
        idle: IdleStrategy,
    ) -> Self {
        debug_assert_eq!(slots[rate_master].ratio, 1);
        Self {
            slots,
            rate_master,
            base_period,
            horizon,
            handles,
            idle,
            last_dispatch: None,
            metrics: PeriodMetrics::new(Self::METRICS_CAPACITY, base_period),
            stall_logged: false,
        }
    }

    /// Build slots straight from a validated task set.
    #[must_use]
    pub fn slots_for(set: &TaskSet, flags: &[Arc<SharedFlag>]) -> Vec<TaskSlot> {
        (0..set.len())
            .map(|i| TaskSlot::new(set.id(i), Arc::clone(&flags[i]), set.ratio(i)))
            .collect()
    }

    /// Dispatch-period metrics collected so far.
    #[must_use]
    pub fn metrics(&self) -> &PeriodMetrics {
        &self.metrics
    }

    /// One poll of the dispatch state machine.
    ///
    /// Pure with respect to wall time: the caller supplies `now`,
    /// which keeps the whole protocol unit-testable without threads.
    pub fn try_dispatch(&mut self, now: Instant) -> DispatchOutcome {
        if self.handles.fault.is_raised() {
            self.handles.stop.raise();
            return DispatchOutcome::Faulted;
        }

        // Horizon check runs on simulated time, so a stalled run still
        // performs every cycle it owes before finishing.
        let tick = self.handles.tick.now();
        if sim_time(tick, self.base_period) >= self.horizon || self.handles.stop.is_raised() {
            self.handles.stop.raise();
            return DispatchOutcome::Finished;
        }

        // Idle gate: a new base period must have elapsed and the rate
        // master must have finished the previous cycle.
        let period_elapsed = self
            .last_dispatch
            .map_or(true, |t| now.duration_since(t) >= self.base_period);
        if !period_elapsed || self.slots[self.rate_master].flag.is_raised() {
            return DispatchOutcome::WaitingPeriod;
        }

        // Eligibility: every due task must have cleared its flag.
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.is_due() && slot.flag.is_raised() {
                if !self.stall_logged {
                    warn!(
                        task = %slot.id,
                        tick,
                        "due task still mid-cycle, stalling dispatch"
                    );
                    self.stall_logged = true;
                }
                return DispatchOutcome::Stalled { task: i };
            }
        }
        self.stall_logged = false;

        if let Some(prev) = self.last_dispatch {
            self.metrics.record(now.duration_since(prev));
        }
        self.last_dispatch = Some(now);

        // Arm the slower due tasks first and the rate master last, so
        // every task owed this tick is armed before the tick can
        // advance.
        let mut due = Vec::with_capacity(self.slots.len());
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if i != self.rate_master && slot.is_due() {
                slot.flag.raise();
                slot.counter = 0;
                due.push(i);
            }
        }
        let master = &mut self.slots[self.rate_master];
        master.flag.raise();
        master.counter = 0;
        due.push(self.rate_master);

        for slot in &mut self.slots {
            slot.counter += 1;
        }

        trace!(tick, due = due.len(), "dispatched");
        DispatchOutcome::Dispatched { due }
    }

    /// Drive the dispatch loop until the horizon or a fault.
    ///
    /// Returns `true` for a normal (horizon) finish, `false` for a
    /// faulted one. The stop flag is raised in both cases.
    pub fn run(&mut self) -> bool {
        info!(
            tasks = self.slots.len(),
            base_period_us = self.base_period.as_micros(),
            horizon_ms = self.horizon.as_millis(),
            "scheduler entering dispatch loop"
        );

        let finished = loop {
            match self.try_dispatch(Instant::now()) {
                DispatchOutcome::Finished => break true,
                DispatchOutcome::Faulted => break false,
                DispatchOutcome::Dispatched { .. } => {}
                DispatchOutcome::WaitingPeriod | DispatchOutcome::Stalled { .. } => {
                    self.idle_wait();
                }
            }
        };

        debug!(
            final_tick = self.handles.tick.now(),
            stalls = self.metrics.stall_count(),
            finished,
            "scheduler loop exited"
        );
        finished
    }

    fn idle_wait(&self) {
        std::hint::spin_loop();
        if self.idle == IdleStrategy::Yield {
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        scheduler: Scheduler,
        flags: Vec<Arc<SharedFlag>>,
        tick: Arc<TickCounter>,
        stop: Arc<SharedFlag>,
        fault: Arc<SharedFlag>,
    }

    /// Build a scheduler over bare flags so tests can play the worker
    /// side by hand.
    fn fixture(ratios: &[u64], rate_master: usize, horizon: Duration) -> Fixture {
        let flags: Vec<Arc<SharedFlag>> =
            ratios.iter().map(|_| Arc::new(SharedFlag::new())).collect();
        let slots = ratios
            .iter()
            .enumerate()
            .map(|(i, &r)| TaskSlot::new(format!("task{i}"), Arc::clone(&flags[i]), r))
            .collect();
        let tick = Arc::new(TickCounter::new());
        let stop = Arc::new(SharedFlag::new());
        let fault = Arc::new(SharedFlag::new());
        let handles = SchedulerHandles {
            tick: Arc::clone(&tick),
            stop: Arc::clone(&stop),
            fault: Arc::clone(&fault),
        };
        let scheduler = Scheduler::new(
            slots,
            rate_master,
            Duration::from_millis(10),
            horizon,
            handles,
            IdleStrategy::Yield,
        );
        Fixture {
            scheduler,
            flags,
            tick,
            stop,
            fault,
        }
    }

    /// Act as the workers: complete every raised flag and advance the
    /// tick for the rate master.
    fn complete_all(fx: &Fixture, rate_master: usize) {
        for (i, flag) in fx.flags.iter().enumerate() {
            if flag.is_raised() {
                if i == rate_master {
                    fx.tick.advance();
                }
                flag.clear();
            }
        }
    }

    #[test]
    fn test_first_dispatch_arms_every_task() {
        let mut fx = fixture(&[4, 2, 1], 2, Duration::from_secs(1));

        let outcome = fx.scheduler.try_dispatch(Instant::now());
        // Slower tasks first, rate master last.
        assert_eq!(outcome, DispatchOutcome::Dispatched { due: vec![0, 1, 2] });
        assert!(fx.flags.iter().all(|f| f.is_raised()));
    }

    #[test]
    fn test_cadence_follows_ratios() {
        let mut fx = fixture(&[4, 2, 1], 2, Duration::from_secs(1));
        let mut dispatches = vec![0u64; 3];

        let mut now = Instant::now();
        for _ in 0..8 {
            match fx.scheduler.try_dispatch(now) {
                DispatchOutcome::Dispatched { due } => {
                    for i in due {
                        dispatches[i] += 1;
                    }
                }
                other => panic!("expected dispatch, got {other:?}"),
            }
            complete_all(&fx, 2);
            now += Duration::from_millis(10);
        }

        assert_eq!(dispatches, vec![2, 4, 8]);
    }

    #[test]
    fn test_waits_for_period() {
        let mut fx = fixture(&[1], 0, Duration::from_secs(1));

        let now = Instant::now();
        assert!(matches!(
            fx.scheduler.try_dispatch(now),
            DispatchOutcome::Dispatched { .. }
        ));
        complete_all(&fx, 0);

        // Half a period later: nothing to do yet.
        assert_eq!(
            fx.scheduler.try_dispatch(now + Duration::from_millis(5)),
            DispatchOutcome::WaitingPeriod
        );
        assert!(matches!(
            fx.scheduler.try_dispatch(now + Duration::from_millis(10)),
            DispatchOutcome::Dispatched { .. }
        ));
    }

    #[test]
    fn test_waits_for_rate_master_completion() {
        let mut fx = fixture(&[1], 0, Duration::from_secs(1));

        let now = Instant::now();
        fx.scheduler.try_dispatch(now);
        // Worker never cleared: even after the period the scheduler
        // must hold off.
        assert_eq!(
            fx.scheduler.try_dispatch(now + Duration::from_millis(20)),
            DispatchOutcome::WaitingPeriod
        );
    }

    #[test]
    fn test_stalls_on_unfinished_due_task() {
        let mut fx = fixture(&[2, 1], 1, Duration::from_secs(1));

        let now = Instant::now();
        fx.scheduler.try_dispatch(now); // tick 0: both due
        // Only the rate master completes; task 0 is still mid-cycle.
        fx.tick.advance();
        fx.flags[1].clear();

        // Tick 1: task 0 not due, dispatch proceeds for the master.
        let outcome = fx.scheduler.try_dispatch(now + Duration::from_millis(10));
        assert_eq!(outcome, DispatchOutcome::Dispatched { due: vec![1] });
        fx.tick.advance();
        fx.flags[1].clear();

        // Tick 2: task 0 is due again but still mid-cycle -> stall,
        // and nothing is dispatched, including the master.
        let outcome = fx.scheduler.try_dispatch(now + Duration::from_millis(20));
        assert_eq!(outcome, DispatchOutcome::Stalled { task: 0 });
        assert!(fx.flags[1].is_clear());

        // The late task finally finishes; the same tick dispatches.
        fx.flags[0].clear();
        let outcome = fx.scheduler.try_dispatch(now + Duration::from_millis(30));
        assert_eq!(outcome, DispatchOutcome::Dispatched { due: vec![0, 1] });
    }

    #[test]
    fn test_finishes_at_horizon_and_raises_stop() {
        // Horizon of 3 base periods.
        let mut fx = fixture(&[1], 0, Duration::from_millis(30));

        let mut now = Instant::now();
        let mut dispatched = 0;
        loop {
            match fx.scheduler.try_dispatch(now) {
                DispatchOutcome::Dispatched { .. } => {
                    dispatched += 1;
                    complete_all(&fx, 0);
                }
                DispatchOutcome::Finished => break,
                DispatchOutcome::WaitingPeriod => {}
                other => panic!("unexpected {other:?}"),
            }
            now += Duration::from_millis(10);
        }

        assert_eq!(dispatched, 3);
        assert_eq!(fx.tick.now(), 3);
        assert!(fx.stop.is_raised());
    }

    #[test]
    fn test_fault_flag_ends_run() {
        let mut fx = fixture(&[1], 0, Duration::from_secs(1));
        fx.fault.raise();

        assert_eq!(
            fx.scheduler.try_dispatch(Instant::now()),
            DispatchOutcome::Faulted
        );
        assert!(fx.stop.is_raised());
    }

    #[test]
    fn test_external_stop_finishes_early() {
        let mut fx = fixture(&[1], 0, Duration::from_secs(3600));
        fx.stop.raise();

        assert_eq!(
            fx.scheduler.try_dispatch(Instant::now()),
            DispatchOutcome::Finished
        );
    }
}
