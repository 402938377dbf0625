//! Startup and shutdown orchestration.
//!
//! The harness owns the whole lifecycle of one run: it builds the
//! shared arena (tick counter, stop and fault flags, one dispatch flag
//! and cycle counter per task), spawns one named worker thread per
//! task, runs the scheduler on the calling thread, raises the stop
//! flag, joins every worker, and reports what happened. All shared
//! state is explicitly constructed here and handed out as `Arc`
//! handles; nothing is ambient.

use crate::flag::SharedFlag;
use crate::scheduler::{Scheduler, SchedulerHandles, TaskSlot};
use crate::task::{run_worker, TaskSet, WorkerShared};
use lockstep_common::config::{IdleStrategy, SimConfig};
use lockstep_common::error::{LockstepError, LockstepResult};
use lockstep_common::metrics::MetricsSnapshot;
use lockstep_common::state::{RunState, StateMachine};
use lockstep_common::tick::TickCounter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Options controlling one run.
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Simulation horizon: the run ends once `tick * base period`
    /// reaches it.
    pub horizon: Duration,
    /// Idle-wait strategy for the scheduler and workers.
    pub idle: IdleStrategy,
    /// Externally owned stop flag, e.g. wired to a signal handler.
    /// One is created internally when absent.
    pub stop: Option<Arc<SharedFlag>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            horizon: Duration::from_secs(1),
            idle: IdleStrategy::default(),
            stop: None,
        }
    }
}

impl HarnessOptions {
    /// Derive options from a run configuration.
    #[must_use]
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            horizon: config.horizon,
            idle: config.pacing.idle,
            stop: None,
        }
    }
}

/// Per-task dispatch totals in the final report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    /// Task identifier.
    pub id: String,
    /// Declared frequency in Hertz.
    pub frequency_hz: u32,
    /// Completed cycles over the whole run.
    pub dispatches: u64,
}

/// What a finished run looked like.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Wall-clock duration of the dispatch phase.
    pub elapsed: Duration,
    /// Final tick value.
    pub final_tick: u64,
    /// Final simulated time (`final_tick * base period`).
    pub sim_time: Duration,
    /// Per-task completed-cycle counts, in declared order.
    pub tasks: Vec<TaskReport>,
    /// Dispatch-period metrics snapshot.
    pub metrics: MetricsSnapshot,
    /// Terminal lifecycle state.
    pub state: RunState,
}

/// One-run orchestrator.
pub struct Harness {
    set: TaskSet,
    options: HarnessOptions,
    state: StateMachine,
}

impl Harness {
    /// Create a harness over a validated task set.
    #[must_use]
    pub fn new(set: TaskSet, options: HarnessOptions) -> Self {
        Self {
            set,
            options,
            state: StateMachine::new(),
        }
    }

    /// Execute the run to completion.
    ///
    /// Blocks the calling thread for the duration of the run (the
    /// scheduler runs here). Returns the report on a normal finish.
    ///
    /// # Errors
    ///
    /// Returns the first task fault if any body failed, or a worker
    /// error if a thread could not be spawned or joined. Workers are
    /// joined before either error is returned.
    pub fn run(mut self) -> LockstepResult<RunReport> {
        self.state.transition(RunState::Init)?;

        let rates = self.set.rates();
        let rate_master = self.set.rate_master();
        let n = self.set.len();

        // The shared arena: every cross-thread cell of the run is
        // created here, once, and handed out explicitly.
        let tick = Arc::new(TickCounter::new());
        let stop = self
            .options
            .stop
            .take()
            .unwrap_or_else(|| Arc::new(SharedFlag::new()));
        let fault = Arc::new(SharedFlag::new());
        let fault_slot: Arc<Mutex<Option<LockstepError>>> = Arc::new(Mutex::new(None));
        let flags: Vec<Arc<SharedFlag>> = (0..n).map(|_| Arc::new(SharedFlag::new())).collect();
        let counters: Vec<Arc<AtomicU64>> = (0..n).map(|_| Arc::new(AtomicU64::new(0))).collect();

        let slots: Vec<TaskSlot> = Scheduler::slots_for(&self.set, &flags);
        let mut scheduler = Scheduler::new(
            slots,
            rate_master,
            rates.base_period,
            self.options.horizon,
            SchedulerHandles {
                tick: Arc::clone(&tick),
                stop: Arc::clone(&stop),
                fault: Arc::clone(&fault),
            },
            self.options.idle,
        );

        info!(
            tasks = n,
            fastest_hz = rates.fastest_hz,
            horizon_ms = self.options.horizon.as_millis(),
            "starting run"
        );

        let task_meta: Vec<(String, u32)> = (0..n)
            .map(|i| (self.set.id(i).to_string(), self.set.frequency_hz(i)))
            .collect();

        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(n);
        let mut spawn_error: Option<LockstepError> = None;
        for (i, spec) in self.set.into_tasks().into_iter().enumerate() {
            let shared = WorkerShared {
                id: spec.id.clone(),
                flag: Arc::clone(&flags[i]),
                stop: Arc::clone(&stop),
                fault: Arc::clone(&fault),
                fault_slot: Arc::clone(&fault_slot),
                tick: Arc::clone(&tick),
                dispatches: Arc::clone(&counters[i]),
                base_period: rates.base_period,
                period: Duration::from_secs_f64(1.0 / f64::from(spec.frequency_hz)),
                is_rate_master: i == rate_master,
                idle: self.options.idle,
            };
            let body = spec.body;
            match thread::Builder::new()
                .name(format!("lockstep-{}", spec.id))
                .spawn(move || run_worker(body, shared))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Already-spawned workers observe stop and are
                    // joined below with everyone else.
                    stop.raise();
                    spawn_error = Some(LockstepError::Worker(format!(
                        "failed to spawn worker '{}': {e}",
                        spec.id
                    )));
                    break;
                }
            }
        }

        let start = Instant::now();
        if spawn_error.is_none() {
            self.state.transition(RunState::Run)?;
            scheduler.run();
            stop.raise();
        }

        for handle in workers {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                warn!(worker = %name, "worker thread panicked");
                fault.raise();
                if let Ok(mut slot) = fault_slot.lock() {
                    slot.get_or_insert(LockstepError::Worker(format!(
                        "worker thread '{name}' panicked"
                    )));
                }
            }
        }
        let elapsed = start.elapsed();

        if let Some(err) = spawn_error {
            self.state.enter_fault();
            let _ = self.state.transition(RunState::Stopped);
            return Err(err);
        }

        if fault.is_raised() {
            self.state.enter_fault();
            let _ = self.state.transition(RunState::Stopped);
            let err = fault_slot
                .lock()
                .ok()
                .and_then(|mut slot| slot.take())
                .unwrap_or_else(|| LockstepError::Worker("unrecorded fault".into()));
            return Err(err);
        }

        self.state.transition(RunState::Stopped)?;

        let final_tick = tick.now();
        let report = RunReport {
            elapsed,
            final_tick,
            sim_time: tick.sim_time(rates.base_period),
            tasks: task_meta
                .into_iter()
                .zip(&counters)
                .map(|((id, frequency_hz), counter)| TaskReport {
                    id,
                    frequency_hz,
                    dispatches: counter.load(Ordering::Relaxed),
                })
                .collect(),
            metrics: scheduler.metrics().snapshot(),
            state: self.state.state(),
        };

        info!(
            elapsed_ms = report.elapsed.as_millis(),
            final_tick = report.final_tick,
            sim_time_ms = report.sim_time.as_millis(),
            stalls = report.metrics.stall_count,
            "run complete"
        );

        Ok(report)
    }
}
