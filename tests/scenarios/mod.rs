//! Integration tests for complete lockstep runs.
//!
//! These tests verify end-to-end behavior of complete runs:
//! - Exact dispatch cadence across harmonic rates
//! - Causal ordering of cross-rate data
//! - Stall-on-overrun preserving cycle counts
//! - Configuration loading and validation

mod cadence_test;
mod common;
mod config_test;
mod stall_test;
