//! Saga orchestration engine.
//!
//! Runs the steps of a state definition in order, compensates succeeded steps
//! in reverse after the first forward failure, and records every executed step
//! through the [`StateLogRecorder`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::definition::{DefinitionRepository, StateDefinition, StepDefinition};
use super::error::{ActionError, SagaError};
use super::params::{BoundParams, RunParams};
use super::recorder::StateLogRecorder;
use super::registry::{ActionRegistry, SagaAction};
use super::types::{
	ExecutionStatus, MachineInstance, StateInstance, StateType, StepStatus, stamp_after,
};
use crate::transaction::{
	self, GlobalTransaction, LocalTransactionManager, TransactionManager, TransactionOutcome,
};

const DEFAULT_COMPENSATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Engine-wide execution settings.
#[derive(Debug, Clone)]
pub struct EngineOptions {
	/// Run deadline used when neither the caller nor the definition sets one
	pub default_timeout: Option<Duration>,
	/// Upper bound for each compensating invocation
	pub compensation_timeout: Duration,
}

impl Default for EngineOptions {
	fn default() -> Self {
		Self {
			default_timeout: None,
			compensation_timeout: DEFAULT_COMPENSATION_TIMEOUT,
		}
	}
}

/// Per-run overrides.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
	pub timeout: Option<Duration>,
	pub cancel: Option<CancellationToken>,
}

impl StartOptions {
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.cancel = Some(token);
		self
	}
}

#[derive(Debug, Clone, Copy)]
enum Direction {
	Forward,
	Compensate,
}

/// A forward step that succeeded and may need undoing.
struct Completed<'a> {
	step: &'a StepDefinition,
	action: Arc<dyn SagaAction>,
	params: BoundParams,
}

/// Why forward execution stopped early.
struct Failure {
	step: String,
	exception: Option<String>,
}

/// Executes state definitions against run parameters.
///
/// The registry and definitions are read-only once the engine is built, so a
/// single engine can serve any number of concurrent runs.
pub struct SagaEngine {
	registry: Arc<ActionRegistry>,
	definitions: Arc<DefinitionRepository>,
	recorder: Arc<StateLogRecorder>,
	transactions: Arc<dyn TransactionManager>,
	options: EngineOptions,
}

impl SagaEngine {
	pub fn new(
		registry: Arc<ActionRegistry>,
		definitions: Arc<DefinitionRepository>,
		recorder: Arc<StateLogRecorder>,
	) -> Self {
		Self {
			registry,
			definitions,
			recorder,
			transactions: Arc::new(LocalTransactionManager::new()),
			options: EngineOptions::default(),
		}
	}

	pub fn with_transaction_manager(mut self, transactions: Arc<dyn TransactionManager>) -> Self {
		self.transactions = transactions;
		self
	}

	pub fn with_options(mut self, options: EngineOptions) -> Self {
		self.options = options;
		self
	}

	pub fn recorder(&self) -> &Arc<StateLogRecorder> {
		&self.recorder
	}

	pub fn registry(&self) -> &Arc<ActionRegistry> {
		&self.registry
	}

	/// Run the named definition to completion.
	///
	/// Returns the finalized machine instance. Business failures produce a
	/// `Fail` instance rather than an error; `Err` is reserved for unknown
	/// definitions, transaction manager and storage failures.
	pub async fn start(
		&self,
		definition_name: &str,
		params: RunParams,
	) -> Result<MachineInstance, SagaError> {
		self
			.start_with(definition_name, params, StartOptions::default())
			.await
	}

	pub async fn start_with(
		&self,
		definition_name: &str,
		params: RunParams,
		options: StartOptions,
	) -> Result<MachineInstance, SagaError> {
		let definition = self.definitions.get(definition_name)?;
		let timeout = options
			.timeout
			.or(definition.timeout)
			.or(self.options.default_timeout);

		let tx = self.transactions.begin(&definition.name, timeout).await?;
		let business_key = params
			.business_key()
			.unwrap_or_else(|| tx.xid().to_string());

		let span = info_span!("saga", xid = %tx.xid(), machine = %definition.name, business_key = %business_key);
		let result = transaction::scope(
			tx.xid().to_string(),
			self
				.run(&tx, &definition, business_key, params, timeout, options.cancel)
				.instrument(span),
		)
		.await;

		let outcome = match &result {
			Ok(instance) if instance.status == ExecutionStatus::Success => TransactionOutcome::Commit,
			_ => TransactionOutcome::Rollback,
		};
		if let Err(e) = self.transactions.end(&tx, outcome).await {
			warn!(xid = %tx.xid(), error = %e, "failed to end global transaction");
		}
		result
	}

	async fn run(
		&self,
		tx: &GlobalTransaction,
		definition: &StateDefinition,
		business_key: String,
		params: RunParams,
		timeout: Option<Duration>,
		cancel: Option<CancellationToken>,
	) -> Result<MachineInstance, SagaError> {
		let mut instance = MachineInstance::start(
			tx.xid(),
			&definition.name,
			&business_key,
			params.to_value(),
		);
		self.recorder.create_machine_instance(&instance).await?;
		info!(steps = definition.steps.len(), "saga started");

		// Bind every step up front so a bad parameter fails the run before any
		// side effect happens. Unregistered actions are left for their step.
		let mut bound = Vec::with_capacity(definition.steps.len());
		for step in &definition.steps {
			let entry = match self.registry.resolve(&step.action) {
				Ok(action) => {
					match BoundParams::bind(&step.name, action.params(), &step.input, &params) {
						Ok(p) => Some((action, p)),
						Err(e) => {
							error!(step = %step.name, error = %e, "parameter binding failed");
							instance.finish(ExecutionStatus::Fail, None, Some(SagaError::from(e).to_string()));
							self.recorder.update_machine_instance(&instance).await?;
							return Ok(instance);
						},
					}
				},
				Err(_) => None,
			};
			bound.push(entry);
		}

		let deadline = timeout.map(|t| Instant::now() + t);
		let mut seq = 0u32;
		let mut completed: Vec<Completed<'_>> = Vec::new();
		let mut failure: Option<Failure> = None;

		for (step, entry) in definition.steps.iter().zip(bound) {
			if let Some(reason) = interrupted(deadline, cancel.as_ref()) {
				warn!(step = %step.name, reason, "saga interrupted before step");
				failure = Some(Failure {
					step: step.name.clone(),
					exception: Some(reason.to_string()),
				});
				break;
			}

			let started = stamp_after(instance.gmt_updated);
			seq += 1;
			let (outcome, action, step_params) = match entry {
				Some((action, step_params)) => {
					let limit = step_limit(step.timeout, deadline);
					debug!(step = %step.name, action = %step.action, "executing forward step");
					let outcome = invoke(
						action.as_ref(),
						Direction::Forward,
						&business_key,
						&step_params,
						limit,
						cancel.as_ref(),
					)
					.await;
					(outcome, Some(action), step_params)
				},
				None => (
					Err(ActionError::Other(
						SagaError::ActionNotFound(step.action.clone()).to_string(),
					)),
					None,
					BoundParams::default(),
				),
			};

			let (status, exception) = split_outcome(&outcome);
			let row = StateInstance {
				id: format!("{}#{seq}", instance.id),
				machine_instance_id: instance.id.clone(),
				seq,
				name: step.name.clone(),
				state_type: StateType::Forward,
				service_name: step.action.clone(),
				status,
				compensated_for: None,
				business_key: business_key.clone(),
				input_params: step_params.to_value(),
				exception: exception.clone(),
				gmt_started: started,
				gmt_end: stamp_after(started),
			};
			self.recorder.append_state_instance(&row).await?;
			instance.gmt_updated = row.gmt_end;
			self.recorder.update_machine_instance(&instance).await?;

			match (status, action) {
				(StepStatus::Success, Some(action)) => {
					info!(step = %step.name, "forward step succeeded");
					completed.push(Completed {
						step,
						action,
						params: step_params,
					});
				},
				_ => {
					warn!(step = %step.name, exception = ?exception, "forward step failed");
					failure = Some(Failure {
						step: step.name.clone(),
						exception,
					});
					break;
				},
			}
		}

		let Some(failure) = failure else {
			instance.finish(ExecutionStatus::Success, None, None);
			self.recorder.update_machine_instance(&instance).await?;
			info!("saga succeeded");
			return Ok(instance);
		};

		let compensation_status = self
			.compensate(&mut instance, &business_key, &completed, &mut seq)
			.await?;

		instance.finish(ExecutionStatus::Fail, compensation_status, failure.exception);
		self.recorder.update_machine_instance(&instance).await?;
		info!(
			failed_step = %failure.step,
			compensation_status = ?compensation_status,
			"saga failed"
		);
		Ok(instance)
	}

	/// Compensate succeeded steps in reverse order, best effort.
	///
	/// Returns `None` when nothing needed compensating, otherwise `Success`
	/// only if every compensation succeeded. Row timestamps continue from
	/// `instance.gmt_updated`.
	async fn compensate(
		&self,
		instance: &mut MachineInstance,
		business_key: &str,
		completed: &[Completed<'_>],
		seq: &mut u32,
	) -> Result<Option<StepStatus>, SagaError> {
		let mut overall: Option<StepStatus> = None;
		for done in completed.iter().rev() {
			if !done.step.compensation {
				debug!(step = %done.step.name, "step does not participate in compensation");
				continue;
			}

			let started = stamp_after(instance.gmt_updated);
			*seq += 1;
			let outcome = invoke(
				done.action.as_ref(),
				Direction::Compensate,
				business_key,
				&done.params,
				Some(self.options.compensation_timeout),
				None,
			)
			.await;
			let (status, exception) = split_outcome(&outcome);
			match status {
				StepStatus::Success => info!(step = %done.step.name, "compensation succeeded"),
				StepStatus::Fail => error!(
					step = %done.step.name,
					exception = ?exception,
					"compensation failed (continuing with remaining compensations)"
				),
			}

			let row = StateInstance {
				id: format!("{}#{seq}", instance.id),
				machine_instance_id: instance.id.clone(),
				seq: *seq,
				name: done.step.compensation_state_name(),
				state_type: StateType::Compensate,
				service_name: done.step.action.clone(),
				status,
				compensated_for: Some(done.step.name.clone()),
				business_key: business_key.to_string(),
				input_params: done.params.to_value(),
				exception,
				gmt_started: started,
				gmt_end: stamp_after(started),
			};
			self.recorder.append_state_instance(&row).await?;
			instance.gmt_updated = row.gmt_end;

			overall = match (overall, status) {
				(Some(StepStatus::Fail), _) | (_, StepStatus::Fail) => Some(StepStatus::Fail),
				_ => Some(StepStatus::Success),
			};
		}
		Ok(overall)
	}
}

fn interrupted(deadline: Option<Instant>, cancel: Option<&CancellationToken>) -> Option<&'static str> {
	if cancel.is_some_and(CancellationToken::is_cancelled) {
		return Some("saga cancelled");
	}
	if deadline.is_some_and(|d| Instant::now() >= d) {
		return Some("saga deadline exceeded");
	}
	None
}

/// The tighter of the step timeout and the time left until the run deadline.
fn step_limit(step_timeout: Option<Duration>, deadline: Option<Instant>) -> Option<Duration> {
	let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
	match (step_timeout, remaining) {
		(Some(a), Some(b)) => Some(a.min(b)),
		(a, b) => a.or(b),
	}
}

fn split_outcome(outcome: &Result<bool, ActionError>) -> (StepStatus, Option<String>) {
	match outcome {
		Ok(ok) => (StepStatus::from_ok(*ok), None),
		Err(e) => (StepStatus::Fail, Some(e.to_string())),
	}
}

/// Invoke one direction of an action, bounded by `limit` and `cancel`.
async fn invoke(
	action: &dyn SagaAction,
	direction: Direction,
	business_key: &str,
	params: &BoundParams,
	limit: Option<Duration>,
	cancel: Option<&CancellationToken>,
) -> Result<bool, ActionError> {
	let call = async {
		match direction {
			Direction::Forward => action.forward(business_key, params).await,
			Direction::Compensate => action.compensate(business_key, params).await,
		}
	};
	let bounded = async {
		match limit {
			Some(limit) => tokio::time::timeout(limit, call)
				.await
				.unwrap_or(Err(ActionError::Timeout(limit))),
			None => call.await,
		}
	};
	match cancel {
		Some(token) => {
			tokio::select! {
				biased;
				_ = token.cancelled() => Err(ActionError::Cancelled),
				result = bounded => result,
			}
		},
		None => bounded.await,
	}
}
