//! Saga orchestration: definitions, action registry, engine and state log.
//!
//! A run executes the steps of a [`StateDefinition`] in order. When a forward
//! step fails, every earlier step that succeeded is compensated in reverse
//! order, each compensation receiving the same business key and parameters as
//! its forward call. The run is recorded as a [`MachineInstance`] with one
//! [`StateInstance`] per executed step.

mod definition;
mod error;
mod executor;
#[cfg(test)]
mod integration_tests;
mod params;
mod recorder;
mod registry;
mod types;

pub use definition::{DefinitionRepository, StateDefinition, StepDefinition};
pub use error::{ActionError, BindingError, SagaError};
pub use executor::{EngineOptions, SagaEngine, StartOptions};
pub use params::{BUSINESS_KEY_PARAM, BoundParams, ParamKind, ParamSpec, RunParams};
pub use recorder::{RunRecord, StateLogRecorder};
pub use registry::{ActionRegistry, SagaAction};
pub use types::{ExecutionStatus, MachineInstance, StateInstance, StateType, StepStatus};
