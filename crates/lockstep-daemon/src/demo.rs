//! Demonstration task stack: a three-rate closed control loop.
//!
//! Planner (slowest) publishes a setpoint, the controller computes a
//! proportional command against the plant measurement, and the
//! dynamics task (fastest, the rate master) integrates a first-order
//! plant. Each producer stamps its output with a delay of one of its
//! own periods, so a value computed during cycle N is only acted on
//! after cycle N completes.

use lockstep_common::config::{RateSet, SimConfig};
use lockstep_common::error::{LockstepError, LockstepResult};
use lockstep_runtime::channel::{ChannelReader, CrossRateChannel, HistoryChannel};
use lockstep_runtime::task::{CycleInfo, TaskBody, TaskSet};
use std::sync::Arc;
use tracing::debug;

/// Measurement history depth, in producer periods.
const MEASUREMENT_HISTORY: usize = 10;

/// Plant time constant.
const PLANT_TAU_SECS: f32 = 0.05;

/// Proportional gain of the controller.
const CONTROLLER_GAIN: f32 = 0.8;

/// Planner cycles between setpoint flips.
const SETPOINT_FLIP_PERIOD: u64 = 25;

struct PlannerBody {
    setpoint_tx: Arc<CrossRateChannel<f32>>,
    command_rx: ChannelReader<f32>,
    delay_ticks: u64,
    cycles: u64,
    setpoint: f32,
}

impl TaskBody for PlannerBody {
    fn step(&mut self, cycle: CycleInfo) -> LockstepResult<()> {
        if self.cycles % SETPOINT_FLIP_PERIOD == 0 {
            self.setpoint = if self.setpoint > 0.5 { 0.0 } else { 1.0 };
        }
        self.cycles += 1;

        self.setpoint_tx
            .publish(self.setpoint, cycle.tick, self.delay_ticks);

        let command = self.command_rx.sample(cycle.tick, 0.0);
        debug!(
            tick = cycle.tick,
            setpoint = self.setpoint,
            observed_command = command,
            "planner cycle"
        );
        Ok(())
    }
}

struct ControllerBody {
    setpoint_rx: ChannelReader<f32>,
    measurement_rx: Arc<HistoryChannel<f32, MEASUREMENT_HISTORY>>,
    command_tx: Arc<CrossRateChannel<f32>>,
    delay_ticks: u64,
}

impl TaskBody for ControllerBody {
    fn step(&mut self, cycle: CycleInfo) -> LockstepResult<()> {
        let setpoint = self.setpoint_rx.sample(cycle.tick, 0.0);
        // Measurement as of this decision point, not the newest sample.
        let measured = self.measurement_rx.read_or(cycle.tick, 0.0);

        let command = CONTROLLER_GAIN * (setpoint - measured);
        self.command_tx
            .publish(command, cycle.tick, self.delay_ticks);
        Ok(())
    }
}

struct DynamicsBody {
    command_rx: ChannelReader<f32>,
    measurement_tx: Arc<HistoryChannel<f32, MEASUREMENT_HISTORY>>,
    delay_ticks: u64,
    state: f32,
}

impl TaskBody for DynamicsBody {
    fn step(&mut self, cycle: CycleInfo) -> LockstepResult<()> {
        let command = self.command_rx.sample(cycle.tick, 0.0);

        let dt = cycle.period.as_secs_f32();
        self.state += (command - self.state) * (dt / PLANT_TAU_SECS);

        self.measurement_tx
            .publish(self.state, cycle.tick, self.delay_ticks);
        Ok(())
    }
}

/// Wire the demo stack onto a three-task configuration.
///
/// The configuration must declare exactly three tasks, slowest first:
/// planner, controller, dynamics. The fastest entry becomes the rate
/// master and must be the dynamics task.
///
/// # Errors
///
/// Returns a configuration error if the task count or ordering does
/// not match, or if the rates fail harmonic validation.
pub fn build(config: &SimConfig) -> LockstepResult<TaskSet> {
    if config.tasks.len() != 3 {
        return Err(LockstepError::Config(format!(
            "demo stack needs exactly 3 tasks, config declares {}",
            config.tasks.len()
        )));
    }

    let freqs: Vec<u32> = config.tasks.iter().map(|t| t.frequency_hz).collect();
    let rates = RateSet::derive(&freqs)?;
    if rates.rate_master != 2 {
        return Err(LockstepError::Config(
            "demo stack expects tasks ordered slowest first (dynamics last)".into(),
        ));
    }

    let setpoint: Arc<CrossRateChannel<f32>> = Arc::new(CrossRateChannel::new());
    let command: Arc<CrossRateChannel<f32>> = Arc::new(CrossRateChannel::new());
    let measurement: Arc<HistoryChannel<f32, MEASUREMENT_HISTORY>> =
        Arc::new(HistoryChannel::new());

    let planner = PlannerBody {
        setpoint_tx: Arc::clone(&setpoint),
        command_rx: ChannelReader::new(Arc::clone(&command)),
        delay_ticks: rates.ratio_of(freqs[0]),
        cycles: 0,
        setpoint: 0.0,
    };
    let controller = ControllerBody {
        setpoint_rx: ChannelReader::new(setpoint),
        measurement_rx: Arc::clone(&measurement),
        command_tx: Arc::clone(&command),
        delay_ticks: rates.ratio_of(freqs[1]),
    };
    let dynamics = DynamicsBody {
        command_rx: ChannelReader::new(command),
        measurement_tx: measurement,
        delay_ticks: rates.ratio_of(freqs[2]),
        state: 0.0,
    };

    TaskSet::from_config(
        config,
        vec![Box::new(planner), Box::new(controller), Box::new(dynamics)],
    )
}
