//! Declarative state definitions.
//!
//! A definition is an ordered list of steps, each naming the registered action
//! it invokes and how the action's parameters are read from the run
//! parameters. Definitions are loaded from JSON or YAML documents:
//!
//! ```json
//! {
//!   "name": "ReduceInventoryAndBalance",
//!   "timeout": "30s",
//!   "steps": [
//!     {
//!       "name": "ReduceInventory",
//!       "action": "inventoryAction",
//!       "input": { "productId": "productId", "count": "count" }
//!     },
//!     {
//!       "name": "ReduceBalance",
//!       "action": "balanceAction",
//!       "input": { "userId": "userId", "amount": "amount" }
//!     }
//!   ]
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::SagaError;
use crate::serde_dur_option;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StateDefinition {
	pub name: String,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub comment: Option<String>,

	/// Deadline for the whole run; the engine default applies when unset
	#[serde(
		default,
		skip_serializing_if = "Option::is_none",
		with = "serde_dur_option"
	)]
	pub timeout: Option<Duration>,

	pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StepDefinition {
	/// State name recorded for the forward step, unique within the definition
	pub name: String,

	/// Registry name of the action to invoke
	pub action: String,

	/// Action parameter name to run parameter name
	#[serde(default, skip_serializing_if = "IndexMap::is_empty")]
	pub input: IndexMap<String, String>,

	/// Whether this step is compensated when a later step fails
	#[serde(default = "default_compensation")]
	pub compensation: bool,

	/// State name recorded for the compensation, `Compensate<name>` by default
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub compensation_name: Option<String>,

	#[serde(
		default,
		skip_serializing_if = "Option::is_none",
		with = "serde_dur_option"
	)]
	pub timeout: Option<Duration>,
}

fn default_compensation() -> bool {
	true
}

impl StepDefinition {
	pub fn new(name: impl Into<String>, action: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			action: action.into(),
			input: IndexMap::new(),
			compensation: true,
			compensation_name: None,
			timeout: None,
		}
	}

	pub fn with_input(mut self, param: impl Into<String>, field: impl Into<String>) -> Self {
		self.input.insert(param.into(), field.into());
		self
	}

	pub fn without_compensation(mut self) -> Self {
		self.compensation = false;
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	pub fn compensation_state_name(&self) -> String {
		self
			.compensation_name
			.clone()
			.unwrap_or_else(|| format!("Compensate{}", self.name))
	}
}

impl StateDefinition {
	pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
		Self {
			name: name.into(),
			comment: None,
			timeout: None,
			steps,
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	pub fn from_json_str(s: &str) -> Result<Self, SagaError> {
		let def: Self =
			serde_json::from_str(s).map_err(|e| SagaError::InvalidDefinition(e.to_string()))?;
		def.validate()?;
		Ok(def)
	}

	pub fn from_yaml_str(s: &str) -> Result<Self, SagaError> {
		let def: Self =
			serde_yaml::from_str(s).map_err(|e| SagaError::InvalidDefinition(e.to_string()))?;
		def.validate()?;
		Ok(def)
	}

	/// Load a definition, picking the format from the file extension.
	pub fn from_file(path: &Path) -> Result<Self, SagaError> {
		let load_err = |message: String| SagaError::DefinitionLoad {
			path: path.display().to_string(),
			message,
		};
		let contents = fs_err::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
		let parsed = match extension(path) {
			Some("json") => Self::from_json_str(&contents),
			Some("yaml" | "yml") => Self::from_yaml_str(&contents),
			other => return Err(load_err(format!("unsupported extension {other:?}"))),
		};
		parsed.map_err(|e| load_err(e.to_string()))
	}

	pub fn validate(&self) -> Result<(), SagaError> {
		if self.name.trim().is_empty() {
			return Err(SagaError::InvalidDefinition("definition has no name".into()));
		}
		if self.steps.is_empty() {
			return Err(SagaError::InvalidDefinition(format!(
				"definition '{}' has no steps",
				self.name
			)));
		}
		let mut names = HashSet::new();
		for step in &self.steps {
			if step.name.trim().is_empty() || step.action.trim().is_empty() {
				return Err(SagaError::InvalidDefinition(format!(
					"definition '{}' has a step without name or action",
					self.name
				)));
			}
			if !names.insert(step.name.as_str()) {
				return Err(SagaError::InvalidDefinition(format!(
					"definition '{}' has duplicate step '{}'",
					self.name, step.name
				)));
			}
		}
		Ok(())
	}

	pub fn step(&self, name: &str) -> Option<&StepDefinition> {
		self.steps.iter().find(|s| s.name == name)
	}
}

fn extension(path: &Path) -> Option<&str> {
	path.extension().and_then(|e| e.to_str())
}

/// Definitions known to an engine, by name.
#[derive(Debug, Default, Clone)]
pub struct DefinitionRepository {
	definitions: HashMap<String, Arc<StateDefinition>>,
}

impl DefinitionRepository {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, definition: StateDefinition) -> Result<(), SagaError> {
		definition.validate()?;
		debug!(definition = %definition.name, steps = definition.steps.len(), "registered state definition");
		self
			.definitions
			.insert(definition.name.clone(), Arc::new(definition));
		Ok(())
	}

	pub fn get(&self, name: &str) -> Result<Arc<StateDefinition>, SagaError> {
		self
			.definitions
			.get(name)
			.cloned()
			.ok_or_else(|| SagaError::DefinitionNotFound(name.to_string()))
	}

	/// Load a definition file, or every definition file in a directory.
	///
	/// Returns the number of definitions loaded.
	pub fn load_path(&mut self, path: &Path) -> Result<usize, SagaError> {
		if !path.is_dir() {
			self.register(StateDefinition::from_file(path)?)?;
			info!(path = %path.display(), "loaded state definition");
			return Ok(1);
		}

		let entries = fs_err::read_dir(path).map_err(|e| SagaError::DefinitionLoad {
			path: path.display().to_string(),
			message: e.to_string(),
		})?;
		let mut files: Vec<_> = entries
			.filter_map(Result::ok)
			.map(|entry| entry.path())
			.filter(|p| matches!(extension(p), Some("json" | "yaml" | "yml")))
			.collect();
		files.sort();

		for file in &files {
			self.register(StateDefinition::from_file(file)?)?;
		}
		info!(path = %path.display(), count = files.len(), "loaded state definitions");
		Ok(files.len())
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.definitions.keys().map(String::as_str)
	}

	pub fn len(&self) -> usize {
		self.definitions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.definitions.is_empty()
	}
}
