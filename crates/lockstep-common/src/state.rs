//! Run lifecycle state machine.
//!
//! BOOT → INIT → RUN → STOPPED, with fault transitions allowed from
//! every pre-terminal state so a faulting run can still be torn down
//! in order.

use crate::error::{LockstepError, LockstepResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Initial state; nothing constructed yet.
    #[default]
    Boot,
    /// Configuration validated, shared arena under construction.
    Init,
    /// Workers spawned, scheduler dispatching.
    Run,
    /// A task body or worker failed; teardown in progress.
    Fault,
    /// Workers joined, run complete.
    Stopped,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boot => write!(f, "BOOT"),
            Self::Init => write!(f, "INIT"),
            Self::Run => write!(f, "RUN"),
            Self::Fault => write!(f, "FAULT"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl RunState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: RunState) -> bool {
        use RunState::{Boot, Fault, Init, Run, Stopped};

        matches!(
            (self, target),
            // Normal forward progression
            (Boot, Init)
                | (Init, Run)
                | (Run, Stopped)
                // Fault transitions
                | (Boot, Fault)
                | (Init, Fault)
                | (Run, Fault)
                // A faulted run is still joined and stopped
                | (Fault, Stopped)
        )
    }

    /// Returns true if the run is finished, normally or otherwise.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: RunState,
    previous: Option<RunState>,
    transition_count: u64,
}

impl StateMachine {
    /// Create a new state machine starting in BOOT.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<RunState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    pub fn transition(&mut self, target: RunState) -> LockstepResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(LockstepError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Force a transition to FAULT (a no-op from terminal states).
    pub fn enter_fault(&mut self) {
        if self.current.can_transition_to(RunState::Fault) {
            self.previous = Some(self.current);
            self.current = RunState::Fault;
            self.transition_count += 1;
        }
    }
}
