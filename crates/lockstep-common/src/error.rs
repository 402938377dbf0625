use thiserror::Error;

/// Lockstep error types covering configuration rejection, lifecycle
/// misuse, and task faults.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockstepError {
    /// Configuration or startup error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A declared rate does not evenly divide the fastest rate.
    #[error("rate {frequency_hz}Hz does not evenly divide the fastest rate {fastest_hz}Hz")]
    NonHarmonicRate {
        /// The offending frequency.
        frequency_hz: u32,
        /// The fastest declared frequency.
        fastest_hz: u32,
    },

    /// The fastest rate is not strictly the maximum of the set.
    ///
    /// Two tasks declaring the same maximum frequency are rejected:
    /// the rate master must be unique.
    #[error("fastest rate must be strictly the maximum: {frequency_hz}Hz ties the fastest rate {fastest_hz}Hz")]
    RateNotFastest {
        /// The frequency tying the maximum.
        frequency_hz: u32,
        /// The fastest declared frequency.
        fastest_hz: u32,
    },

    /// Invalid lifecycle transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// A task body returned an error during a cycle.
    #[error("task '{id}' faulted: {reason}")]
    TaskFault {
        /// Task identifier.
        id: String,
        /// Failure description from the body.
        reason: String,
    },

    /// A worker thread could not be spawned or joined.
    #[error("worker error: {0}")]
    Worker(String),
}

/// Convenience type alias for lockstep operations.
pub type LockstepResult<T> = Result<T, LockstepError>;
