use std::time::Duration;

use thiserror::Error;

use crate::stateful::StoreError;
use crate::transaction::TransactionError;

/// Errors surfaced to the caller of [`SagaEngine::start`](super::SagaEngine::start).
///
/// Business and action failures never appear here: they are folded into the
/// run's terminal status. Only configuration and storage problems escape.
#[derive(Debug, Error)]
pub enum SagaError {
	#[error("state definition '{0}' not found")]
	DefinitionNotFound(String),

	#[error("invalid state definition: {0}")]
	InvalidDefinition(String),

	#[error("failed to load state definition from {path}: {message}")]
	DefinitionLoad { path: String, message: String },

	#[error("action '{0}' is not registered")]
	ActionNotFound(String),

	#[error(transparent)]
	ParameterBinding(#[from] BindingError),

	#[error("storage failure: {0}")]
	Storage(#[from] StoreError),

	#[error("global transaction failure: {0}")]
	Transaction(#[from] TransactionError),
}

/// A run parameter required by a step was missing or had the wrong type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot bind parameter '{param}' of step '{step}': {reason}")]
pub struct BindingError {
	pub step: String,
	pub param: String,
	pub reason: String,
}

impl BindingError {
	pub fn new(step: impl Into<String>, param: impl Into<String>, reason: impl Into<String>) -> Self {
		Self {
			step: step.into(),
			param: param.into(),
			reason: reason.into(),
		}
	}
}

/// Failure reported by a forward or compensating action.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
	/// Expected business outcome such as insufficient stock. This is the
	/// normal trigger for compensation.
	#[error("{code}: {message}")]
	Business { code: String, message: String },

	#[error("invalid parameters: {0}")]
	InvalidParams(String),

	#[error("action timed out after {0:?}")]
	Timeout(Duration),

	#[error("action cancelled")]
	Cancelled,

	#[error("resource ledger error: {0}")]
	Ledger(String),

	#[error("{0}")]
	Other(String),
}

impl ActionError {
	pub fn business(code: impl Into<String>, message: impl Into<String>) -> Self {
		Self::Business {
			code: code.into(),
			message: message.into(),
		}
	}

	pub fn is_business(&self) -> bool {
		matches!(self, ActionError::Business { .. })
	}
}
