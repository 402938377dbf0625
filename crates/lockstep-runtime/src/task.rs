//! Periodic execution units.
//!
//! A task is a user-supplied body behind the [`TaskBody`] seam plus a
//! declared frequency. The runtime turns each task into one worker
//! thread that busy-waits on its dispatch flag, runs the body once per
//! dispatch, and clears the flag to signal completion. The fastest
//! task of a set is the rate master: it alone advances the global
//! tick, once per completed cycle.

use crate::flag::SharedFlag;
use lockstep_common::config::{IdleStrategy, RateSet, SimConfig};
use lockstep_common::error::{LockstepError, LockstepResult};
use lockstep_common::tick::{sim_time, TickCounter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error};

/// Per-cycle context handed to a task body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleInfo {
    /// Global tick at dispatch time.
    pub tick: u64,
    /// Simulated time at dispatch time (`tick * base period`).
    pub sim_time: Duration,
    /// This task's own period.
    pub period: Duration,
}

/// A periodic unit of work.
///
/// The body must return within its nominal period; exceeding it does
/// not fault the run, it stalls the whole stack until the body
/// finishes (the scheduler will not advance simulated time past an
/// unfinished cycle). Bodies must not block on anything external.
pub trait TaskBody: Send {
    /// One-time setup, called on the worker thread before any cycle.
    fn init(&mut self) -> LockstepResult<()> {
        Ok(())
    }

    /// Execute one cycle. An `Err` faults the whole run.
    fn step(&mut self, cycle: CycleInfo) -> LockstepResult<()>;
}

impl<F> TaskBody for F
where
    F: FnMut(CycleInfo) -> LockstepResult<()> + Send,
{
    fn step(&mut self, cycle: CycleInfo) -> LockstepResult<()> {
        self(cycle)
    }
}

/// One task registration: identifier, rate, and body.
pub struct TaskSpec {
    /// Task identifier, unique within the set.
    pub id: String,
    /// Execution frequency in Hertz.
    pub frequency_hz: u32,
    /// The work to run each cycle.
    pub body: Box<dyn TaskBody + 'static>,
}

impl TaskSpec {
    /// Create a task registration.
    pub fn new(
        id: impl Into<String>,
        frequency_hz: u32,
        body: impl TaskBody + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            frequency_hz,
            body: Box::new(body),
        }
    }
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("frequency_hz", &self.frequency_hz)
            .finish_non_exhaustive()
    }
}

/// A validated set of tasks with derived harmonic facts.
///
/// Construction is the configuration gate: a non-harmonic rate set or
/// a tied fastest rate is rejected here, before any thread exists.
pub struct TaskSet {
    tasks: Vec<TaskSpec>,
    rates: RateSet,
    ratios: Vec<u64>,
}

impl TaskSet {
    /// Validate `tasks` and derive per-task dispatch ratios.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for empty sets, duplicate ids,
    /// zero or non-harmonic frequencies, or a non-unique fastest rate.
    pub fn new(tasks: Vec<TaskSpec>) -> LockstepResult<Self> {
        for (i, task) in tasks.iter().enumerate() {
            if tasks[..i].iter().any(|t| t.id == task.id) {
                return Err(LockstepError::Config(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }
        }

        let freqs: Vec<u32> = tasks.iter().map(|t| t.frequency_hz).collect();
        let rates = RateSet::derive(&freqs)?;
        let ratios = freqs.iter().map(|&f| rates.ratio_of(f)).collect();

        Ok(Self {
            tasks,
            rates,
            ratios,
        })
    }

    /// Pair a configuration's rate list with bodies, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the body count does not match the
    /// configured task count, or if validation fails.
    pub fn from_config(
        config: &SimConfig,
        bodies: Vec<Box<dyn TaskBody + 'static>>,
    ) -> LockstepResult<Self> {
        if bodies.len() != config.tasks.len() {
            return Err(LockstepError::Config(format!(
                "{} task bodies supplied for {} configured tasks",
                bodies.len(),
                config.tasks.len()
            )));
        }
        let tasks = config
            .tasks
            .iter()
            .zip(bodies)
            .map(|(rate, body)| TaskSpec {
                id: rate.id.clone(),
                frequency_hz: rate.frequency_hz,
                body,
            })
            .collect();
        Self::new(tasks)
    }

    /// Number of tasks in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True for an impossible empty set (construction rejects it).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Derived rate facts (fastest frequency, base period).
    #[must_use]
    pub fn rates(&self) -> RateSet {
        self.rates
    }

    /// Dispatch ratio of task `index`: base ticks per one of its
    /// periods.
    #[must_use]
    pub fn ratio(&self, index: usize) -> u64 {
        self.ratios[index]
    }

    /// Index of the rate master (the unique fastest task).
    #[must_use]
    pub fn rate_master(&self) -> usize {
        self.rates.rate_master
    }

    /// Task identifier at `index`.
    #[must_use]
    pub fn id(&self, index: usize) -> &str {
        &self.tasks[index].id
    }

    /// Declared frequency at `index`.
    #[must_use]
    pub fn frequency_hz(&self, index: usize) -> u32 {
        self.tasks[index].frequency_hz
    }

    /// Consume the set, yielding the specs in declared order.
    #[must_use]
    pub(crate) fn into_tasks(self) -> Vec<TaskSpec> {
        self.tasks
    }
}

impl std::fmt::Debug for TaskSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSet")
            .field("tasks", &self.tasks)
            .field("rates", &self.rates)
            .field("ratios", &self.ratios)
            .finish()
    }
}

/// Shared handles handed to one worker thread.
pub(crate) struct WorkerShared {
    /// Task identifier, for logs and fault reports.
    pub id: String,
    /// This worker's dispatch flag (scheduler raises, worker clears).
    pub flag: Arc<SharedFlag>,
    /// Global stop flag.
    pub stop: Arc<SharedFlag>,
    /// Global fault flag, raised by any worker whose body fails.
    pub fault: Arc<SharedFlag>,
    /// First fault, for the harness error report.
    pub fault_slot: Arc<Mutex<Option<LockstepError>>>,
    /// Global tick counter.
    pub tick: Arc<TickCounter>,
    /// Completed-cycle counter, read by the harness for the report.
    pub dispatches: Arc<AtomicU64>,
    /// One tick's worth of simulated time.
    pub base_period: Duration,
    /// This task's own period.
    pub period: Duration,
    /// Whether this worker advances the tick.
    pub is_rate_master: bool,
    /// Idle-wait strategy while polling.
    pub idle: IdleStrategy,
}

impl WorkerShared {
    fn idle_wait(&self) {
        std::hint::spin_loop();
        if self.idle == IdleStrategy::Yield {
            std::thread::yield_now();
        }
    }

    fn record_fault(&self, err: LockstepError) {
        error!(task = %self.id, error = %err, "task body faulted");
        if let Ok(mut slot) = self.fault_slot.lock() {
            slot.get_or_insert(err);
        }
        self.fault.raise();
    }
}

/// Worker thread main loop.
///
/// A pending dispatch is always drained before the stop flag is
/// honored, so a dispatched cycle completes even if the run ends in
/// the same instant.
pub(crate) fn run_worker(mut body: Box<dyn TaskBody>, shared: WorkerShared) {
    debug!(task = %shared.id, period_us = shared.period.as_micros(), "worker started");

    if let Err(e) = body.init() {
        shared.record_fault(LockstepError::TaskFault {
            id: shared.id.clone(),
            reason: format!("init failed: {e}"),
        });
        return;
    }

    loop {
        if shared.flag.is_raised() {
            let tick = shared.tick.now();
            let cycle = CycleInfo {
                tick,
                sim_time: sim_time(tick, shared.base_period),
                period: shared.period,
            };

            if let Err(e) = body.step(cycle) {
                shared.record_fault(LockstepError::TaskFault {
                    id: shared.id.clone(),
                    reason: e.to_string(),
                });
                shared.flag.clear();
                break;
            }

            shared.dispatches.fetch_add(1, Ordering::Relaxed);
            if shared.is_rate_master {
                // The sole tick writer: simulated time moves only when
                // the rate master finishes a cycle.
                shared.tick.advance();
            }
            shared.flag.clear();
            continue;
        }

        if shared.stop.is_raised() {
            break;
        }
        shared.idle_wait();
    }

    debug!(
        task = %shared.id,
        cycles = shared.dispatches.load(Ordering::Relaxed),
        "worker stopped"
    );
}
