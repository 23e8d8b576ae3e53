//! Persisted records of a saga run.
//!
//! Status codes serialize to the short forms used by the state tables
//! (`RU`, `SU`, `FA`) so records stay readable by external checkers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current time, never earlier than `floor`.
///
/// Persisted timestamps of one run must not go backwards even when the wall
/// clock is stepped back mid-run.
pub fn stamp_after(floor: DateTime<Utc>) -> DateTime<Utc> {
	Utc::now().max(floor)
}

/// Overall status of a machine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
	#[serde(rename = "RU")]
	Running,
	#[serde(rename = "SU")]
	Success,
	#[serde(rename = "FA")]
	Fail,
}

impl ExecutionStatus {
	pub fn code(&self) -> &'static str {
		match self {
			ExecutionStatus::Running => "RU",
			ExecutionStatus::Success => "SU",
			ExecutionStatus::Fail => "FA",
		}
	}

	pub fn is_terminal(&self) -> bool {
		!matches!(self, ExecutionStatus::Running)
	}
}

impl std::fmt::Display for ExecutionStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.code())
	}
}

/// Outcome of a single step or of a whole compensation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
	#[serde(rename = "SU")]
	Success,
	#[serde(rename = "FA")]
	Fail,
}

impl StepStatus {
	pub fn code(&self) -> &'static str {
		match self {
			StepStatus::Success => "SU",
			StepStatus::Fail => "FA",
		}
	}

	pub fn from_ok(ok: bool) -> Self {
		if ok { StepStatus::Success } else { StepStatus::Fail }
	}
}

impl std::fmt::Display for StepStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.code())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateType {
	Forward,
	Compensate,
}

/// One row per saga run.
///
/// `is_running == false`, `gmt_end.is_some()` and a terminal `status` always
/// change together, in [`MachineInstance::finish`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineInstance {
	/// Run identifier, the xid of the global transaction begun for the run
	pub id: String,
	/// Name of the state definition that was executed
	pub machine_name: String,
	pub business_key: String,
	pub status: ExecutionStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub compensation_status: Option<StepStatus>,
	pub is_running: bool,
	pub gmt_start: DateTime<Utc>,
	pub gmt_updated: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub gmt_end: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub exception: Option<String>,
	#[serde(default)]
	pub start_params: Value,
}

impl MachineInstance {
	pub fn start(
		id: impl Into<String>,
		machine_name: impl Into<String>,
		business_key: impl Into<String>,
		start_params: Value,
	) -> Self {
		let now = Utc::now();
		Self {
			id: id.into(),
			machine_name: machine_name.into(),
			business_key: business_key.into(),
			status: ExecutionStatus::Running,
			compensation_status: None,
			is_running: true,
			gmt_start: now,
			gmt_updated: now,
			gmt_end: None,
			exception: None,
			start_params,
		}
	}

	/// Move the instance to its terminal state.
	pub fn finish(
		&mut self,
		status: ExecutionStatus,
		compensation_status: Option<StepStatus>,
		exception: Option<String>,
	) {
		debug_assert!(status.is_terminal());
		let now = stamp_after(self.gmt_updated);
		self.status = status;
		self.compensation_status = compensation_status;
		self.exception = exception;
		self.is_running = false;
		self.gmt_updated = now;
		self.gmt_end = Some(now);
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn status(&self) -> ExecutionStatus {
		self.status
	}

	pub fn compensation_status(&self) -> Option<StepStatus> {
		self.compensation_status
	}
}

/// One row per executed forward or compensating step. Never mutated once
/// written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateInstance {
	/// `<machine id>#<seq>`
	pub id: String,
	pub machine_instance_id: String,
	/// Execution order within the run, starting at 1
	pub seq: u32,
	pub name: String,
	#[serde(rename = "type")]
	pub state_type: StateType,
	/// Registry name of the action that was invoked
	pub service_name: String,
	pub status: StepStatus,
	/// Name of the forward state this row compensates
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub compensated_for: Option<String>,
	pub business_key: String,
	#[serde(default)]
	pub input_params: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub exception: Option<String>,
	pub gmt_started: DateTime<Utc>,
	pub gmt_end: DateTime<Utc>,
}

impl StateInstance {
	pub fn is_compensation(&self) -> bool {
		self.state_type == StateType::Compensate
	}
}
