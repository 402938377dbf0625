#![doc = "Multi-rate lockstep execution core."]

pub mod channel;
pub mod flag;
pub mod harness;
pub mod scheduler;
pub mod task;

pub use channel::*;
pub use flag::*;
pub use harness::*;
pub use scheduler::*;
pub use task::*;
