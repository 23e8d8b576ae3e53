//! Typed run and action parameters.
//!
//! Run parameters are a flat map of scalar values supplied by the caller.
//! Every action publishes a schema of the parameters it accepts; binding a
//! step selects and type-checks those fields before the run executes anything.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{ActionError, BindingError};

/// Run parameter carrying the caller's business key.
pub const BUSINESS_KEY_PARAM: &str = "businessKey";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
	String,
	Integer,
	Number,
	Bool,
}

impl ParamKind {
	fn accepts(&self, value: &Value) -> bool {
		match self {
			ParamKind::String => value.is_string(),
			ParamKind::Integer => value.is_i64() || value.is_u64(),
			ParamKind::Number => value.is_number(),
			ParamKind::Bool => value.is_boolean(),
		}
	}
}

/// Declares one parameter an action accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
	pub name: &'static str,
	pub kind: ParamKind,
	pub required: bool,
}

impl ParamSpec {
	pub const fn required(name: &'static str, kind: ParamKind) -> Self {
		Self {
			name,
			kind,
			required: true,
		}
	}

	pub const fn optional(name: &'static str, kind: ParamKind) -> Self {
		Self {
			name,
			kind,
			required: false,
		}
	}
}

/// Parameters supplied to a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunParams(IndexMap<String, Value>);

impl RunParams {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.0.insert(name.into(), value.into());
		self
	}

	pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
		self.0.insert(name.into(), value.into());
	}

	pub fn get(&self, name: &str) -> Option<&Value> {
		self.0.get(name)
	}

	/// The business key as text. Numbers and booleans are stringified; null
	/// and structured values yield `None`.
	pub fn business_key(&self) -> Option<String> {
		match self.get(BUSINESS_KEY_PARAM)? {
			Value::String(s) => Some(s.clone()),
			v @ (Value::Number(_) | Value::Bool(_)) => Some(v.to_string()),
			_ => None,
		}
	}

	pub fn to_value(&self) -> Value {
		Value::Object(self.0.clone().into_iter().collect())
	}
}

impl TryFrom<Value> for RunParams {
	type Error = String;

	fn try_from(value: Value) -> Result<Self, Self::Error> {
		match value {
			Value::Object(map) => Ok(RunParams(map.into_iter().collect())),
			other => Err(format!("run parameters must be an object, got {other}")),
		}
	}
}

/// Parameters selected for one step, validated against the action's schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundParams(IndexMap<String, Value>);

impl BoundParams {
	/// Select the fields `specs` asks for out of `run`.
	///
	/// `bindings` maps an action parameter to the run parameter it is read
	/// from; parameters without an explicit binding are read from the run
	/// parameter of the same name.
	pub fn bind(
		step: &str,
		specs: &[ParamSpec],
		bindings: &IndexMap<String, String>,
		run: &RunParams,
	) -> Result<Self, BindingError> {
		if let Some(unknown) = bindings
			.keys()
			.find(|name| !specs.iter().any(|s| s.name == name.as_str()))
		{
			return Err(BindingError::new(step, unknown, "not accepted by the action"));
		}

		let mut bound = IndexMap::with_capacity(specs.len());
		for spec in specs {
			let field = bindings
				.get(spec.name)
				.map(String::as_str)
				.unwrap_or(spec.name);
			match run.get(field) {
				None | Some(Value::Null) if spec.required => {
					return Err(BindingError::new(
						step,
						spec.name,
						format!("run parameter '{field}' is missing"),
					));
				},
				None | Some(Value::Null) => {},
				Some(value) if !spec.kind.accepts(value) => {
					return Err(BindingError::new(
						step,
						spec.name,
						format!("run parameter '{field}' is not a {:?}", spec.kind),
					));
				},
				Some(value) => {
					bound.insert(spec.name.to_string(), value.clone());
				},
			}
		}
		Ok(BoundParams(bound))
	}

	pub fn get(&self, name: &str) -> Option<&Value> {
		self.0.get(name)
	}

	pub fn str(&self, name: &str) -> Result<&str, ActionError> {
		self
			.get(name)
			.and_then(Value::as_str)
			.ok_or_else(|| ActionError::InvalidParams(format!("'{name}' is not a string")))
	}

	pub fn i64(&self, name: &str) -> Result<i64, ActionError> {
		self
			.get(name)
			.and_then(Value::as_i64)
			.ok_or_else(|| ActionError::InvalidParams(format!("'{name}' is not an integer")))
	}

	pub fn to_value(&self) -> Value {
		Value::Object(self.0.clone().into_iter().collect())
	}
}

impl FromIterator<(String, Value)> for BoundParams {
	fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
		BoundParams(iter.into_iter().collect())
	}
}
