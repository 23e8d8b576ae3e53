//! Action registry: logical action names to forward/compensate pairs.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::{ActionError, SagaError};
use super::params::{BoundParams, ParamSpec};

/// A saga action: a forward operation paired with its compensation.
///
/// Both directions receive the step's business key and the parameters bound
/// for the step. `Ok(true)` is success, `Ok(false)` a failure without an
/// error payload, `Err` a failure carrying one.
#[async_trait]
pub trait SagaAction: Send + Sync {
	/// Parameters this action accepts.
	fn params(&self) -> &[ParamSpec] {
		&[]
	}

	async fn forward(&self, business_key: &str, params: &BoundParams) -> Result<bool, ActionError>;

	async fn compensate(&self, business_key: &str, params: &BoundParams)
	-> Result<bool, ActionError>;
}

/// Registry of named actions.
///
/// Built once at startup and shared read-only with the engine. Registering a
/// name twice replaces the earlier action; callers are expected not to.
#[derive(Default, Clone)]
pub struct ActionRegistry {
	actions: HashMap<String, Arc<dyn SagaAction>>,
}

impl fmt::Debug for ActionRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut names: Vec<_> = self.actions.keys().collect();
		names.sort();
		f.debug_struct("ActionRegistry").field("actions", &names).finish()
	}
}

impl ActionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, name: impl Into<String>, action: impl SagaAction + 'static) {
		self.register_arc(name, Arc::new(action));
	}

	pub fn register_arc(&mut self, name: impl Into<String>, action: Arc<dyn SagaAction>) {
		let name = name.into();
		if self.actions.insert(name.clone(), action).is_some() {
			warn!(action = %name, "action registered twice, keeping the latest");
		} else {
			debug!(action = %name, "registered action");
		}
	}

	/// Register an action from a pair of async functions.
	pub fn register_fn<F, FFut, C, CFut>(
		&mut self,
		name: impl Into<String>,
		params: Vec<ParamSpec>,
		forward: F,
		compensate: C,
	) where
		F: Fn(String, BoundParams) -> FFut + Send + Sync + 'static,
		FFut: Future<Output = Result<bool, ActionError>> + Send + 'static,
		C: Fn(String, BoundParams) -> CFut + Send + Sync + 'static,
		CFut: Future<Output = Result<bool, ActionError>> + Send + 'static,
	{
		self.register(
			name,
			FnAction {
				params,
				forward,
				compensate,
			},
		);
	}

	pub fn resolve(&self, name: &str) -> Result<Arc<dyn SagaAction>, SagaError> {
		self
			.actions
			.get(name)
			.cloned()
			.ok_or_else(|| SagaError::ActionNotFound(name.to_string()))
	}

	pub fn contains(&self, name: &str) -> bool {
		self.actions.contains_key(name)
	}

	pub fn len(&self) -> usize {
		self.actions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.actions.is_empty()
	}
}

struct FnAction<F, C> {
	params: Vec<ParamSpec>,
	forward: F,
	compensate: C,
}

#[async_trait]
impl<F, FFut, C, CFut> SagaAction for FnAction<F, C>
where
	F: Fn(String, BoundParams) -> FFut + Send + Sync + 'static,
	FFut: Future<Output = Result<bool, ActionError>> + Send + 'static,
	C: Fn(String, BoundParams) -> CFut + Send + Sync + 'static,
	CFut: Future<Output = Result<bool, ActionError>> + Send + 'static,
{
	fn params(&self) -> &[ParamSpec] {
		&self.params
	}

	async fn forward(&self, business_key: &str, params: &BoundParams) -> Result<bool, ActionError> {
		(self.forward)(business_key.to_string(), params.clone()).await
	}

	async fn compensate(
		&self,
		business_key: &str,
		params: &BoundParams,
	) -> Result<bool, ActionError> {
		(self.compensate)(business_key.to_string(), params.clone()).await
	}
}
