//! Scripted actions for exercising the engine in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::saga::{ActionError, BoundParams, SagaAction};

/// What a scripted invocation does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	Succeed,
	/// `Ok(false)`, a failure without exception
	Fail,
	Error(String),
	Business { code: String, message: String },
	/// Never completes
	Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
	Forward,
	Compensate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
	pub action: String,
	pub kind: CallKind,
	pub business_key: String,
}

/// Ordered record of invocations, shared across actions.
#[derive(Debug, Default)]
pub struct CallLog {
	calls: Mutex<Vec<Call>>,
}

impl CallLog {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn calls(&self) -> Vec<Call> {
		self.calls.lock().clone()
	}

	/// `(action, kind)` pairs, in invocation order.
	pub fn sequence(&self) -> Vec<(String, CallKind)> {
		self
			.calls
			.lock()
			.iter()
			.map(|c| (c.action.clone(), c.kind))
			.collect()
	}

	pub fn count(&self, action: &str, kind: CallKind) -> usize {
		self
			.calls
			.lock()
			.iter()
			.filter(|c| c.action == action && c.kind == kind)
			.count()
	}

	fn record(&self, action: &str, kind: CallKind, business_key: &str) {
		self.calls.lock().push(Call {
			action: action.to_string(),
			kind,
			business_key: business_key.to_string(),
		});
	}
}

pub struct ScriptedAction {
	name: String,
	forward: Outcome,
	compensate: Outcome,
	delay: Option<Duration>,
	log: Arc<CallLog>,
}

impl ScriptedAction {
	/// An action whose forward and compensation both succeed.
	pub fn new(name: impl Into<String>, log: Arc<CallLog>) -> Self {
		Self {
			name: name.into(),
			forward: Outcome::Succeed,
			compensate: Outcome::Succeed,
			delay: None,
			log,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn forward(mut self, outcome: Outcome) -> Self {
		self.forward = outcome;
		self
	}

	pub fn compensate(mut self, outcome: Outcome) -> Self {
		self.compensate = outcome;
		self
	}

	/// Sleep before answering, in both directions.
	pub fn delay(mut self, delay: Duration) -> Self {
		self.delay = Some(delay);
		self
	}

	async fn play(
		&self,
		kind: CallKind,
		business_key: &str,
		outcome: &Outcome,
	) -> Result<bool, ActionError> {
		self.log.record(&self.name, kind, business_key);
		if let Some(delay) = self.delay {
			tokio::time::sleep(delay).await;
		}
		match outcome {
			Outcome::Succeed => Ok(true),
			Outcome::Fail => Ok(false),
			Outcome::Error(msg) => Err(ActionError::Other(msg.clone())),
			Outcome::Business { code, message } => Err(ActionError::business(code, message)),
			Outcome::Hang => std::future::pending().await,
		}
	}
}

#[async_trait]
impl SagaAction for ScriptedAction {
	async fn forward(&self, business_key: &str, _params: &BoundParams) -> Result<bool, ActionError> {
		self.play(CallKind::Forward, business_key, &self.forward).await
	}

	async fn compensate(&self, business_key: &str, _params: &BoundParams) -> Result<bool, ActionError> {
		self.play(CallKind::Compensate, business_key, &self.compensate).await
	}
}
