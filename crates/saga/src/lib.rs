//! Compensating-transaction (saga) orchestration.
//!
//! A [`saga::SagaEngine`] runs a named [`saga::StateDefinition`] against a set of
//! run parameters. Forward actions execute in order; the first failure stops
//! forward progress and every previously succeeded step is compensated in
//! reverse. Each run is recorded as one [`saga::MachineInstance`] plus one
//! [`saga::StateInstance`] per executed forward or compensating step, which is
//! what [`validation`] inspects.

pub mod actions;
pub mod config;
pub mod durations;
pub mod saga;
pub mod stateful;
pub mod telemetry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transaction;
pub mod validation;

pub use durations::{serde_dur, serde_dur_option};
