#![doc = "Common types shared across the lockstep workspace."]

pub mod config;
pub mod error;
pub mod metrics;
pub mod state;
pub mod tick;

pub use config::*;
pub use error::*;
pub use metrics::*;
pub use state::*;
pub use tick::*;
