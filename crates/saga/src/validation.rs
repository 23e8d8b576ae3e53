//! Checks over persisted run records.
//!
//! [`check_invariants`] holds for every finished run regardless of outcome.
//! [`validate`] additionally asserts the expected shape of one of the three
//! inventory/balance scenarios driven by the e2e harness.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::saga::{ExecutionStatus, MachineInstance, StateInstance, StateType, StepStatus};

pub const REDUCE_INVENTORY: &str = "ReduceInventory";
pub const REDUCE_BALANCE: &str = "ReduceBalance";
pub const COMPENSATE_REDUCE_INVENTORY: &str = "CompensateReduceInventory";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
	#[error("unknown scenario: {0}")]
	UnknownScenario(String),

	#[error("run {0} not found")]
	RunNotFound(String),

	#[error("validation failed (machine): {}", .0.join("; "))]
	Machine(Vec<String>),

	#[error("validation failed (states): {}", .0.join("; "))]
	States(Vec<String>),

	#[error("invariant violated: {}", .0.join("; "))]
	Invariants(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
	/// Both reductions succeed
	Success,
	/// Balance is short, the inventory reduction gets compensated
	CompensateBalance,
	/// Inventory is short on the first step, nothing to compensate
	CompensateInventory,
}

impl Scenario {
	pub const ALL: [Scenario; 3] = [
		Scenario::Success,
		Scenario::CompensateBalance,
		Scenario::CompensateInventory,
	];

	pub fn name(&self) -> &'static str {
		match self {
			Scenario::Success => "success",
			Scenario::CompensateBalance => "compensate-balance",
			Scenario::CompensateInventory => "compensate-inventory",
		}
	}
}

impl fmt::Display for Scenario {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl FromStr for Scenario {
	type Err = ValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Scenario::ALL
			.into_iter()
			.find(|sc| sc.name() == s)
			.ok_or_else(|| ValidationError::UnknownScenario(s.to_string()))
	}
}

/// Validate a run against the expectations of `scenario` and the general
/// invariants.
pub fn validate(
	scenario: Scenario,
	machine: &MachineInstance,
	states: &[StateInstance],
) -> Result<(), ValidationError> {
	let machine_errors = match scenario {
		Scenario::Success => expect_machine(machine, ExecutionStatus::Success, None, true),
		Scenario::CompensateBalance => expect_machine(
			machine,
			ExecutionStatus::Fail,
			Some(StepStatus::Success),
			false,
		),
		Scenario::CompensateInventory => expect_machine(machine, ExecutionStatus::Fail, None, false),
	};
	if !machine_errors.is_empty() {
		return Err(ValidationError::Machine(machine_errors));
	}

	let mut state_errors = Vec::new();
	match scenario {
		Scenario::Success => {
			require_forward(states, REDUCE_INVENTORY, StepStatus::Success, &mut state_errors);
			require_forward(states, REDUCE_BALANCE, StepStatus::Success, &mut state_errors);
			forbid_compensations(states, &mut state_errors);
		},
		Scenario::CompensateBalance => {
			require_forward(states, REDUCE_INVENTORY, StepStatus::Success, &mut state_errors);
			require_forward(states, REDUCE_BALANCE, StepStatus::Fail, &mut state_errors);
			let compensated = states.iter().any(|s| {
				s.is_compensation()
					&& s.status == StepStatus::Success
					&& s.compensated_for.as_deref() == Some(REDUCE_INVENTORY)
					&& (s.name == COMPENSATE_REDUCE_INVENTORY || s.name.starts_with("Compensate"))
			});
			if !compensated {
				state_errors.push(format!("missing SU compensation state for {REDUCE_INVENTORY}"));
			}
		},
		Scenario::CompensateInventory => {
			require_forward(states, REDUCE_INVENTORY, StepStatus::Fail, &mut state_errors);
			if states
				.iter()
				.any(|s| s.state_type == StateType::Forward && s.name == REDUCE_BALANCE)
			{
				state_errors.push(format!("unexpected {REDUCE_BALANCE} forward state"));
			}
			forbid_compensations(states, &mut state_errors);
		},
	}
	if !state_errors.is_empty() {
		return Err(ValidationError::States(state_errors));
	}

	check_invariants(machine, states)
}

fn expect_machine(
	machine: &MachineInstance,
	status: ExecutionStatus,
	compensation_status: Option<StepStatus>,
	require_no_exception: bool,
) -> Vec<String> {
	let mut errors = Vec::new();
	if machine.status != status {
		errors.push(format!("status={} want={status}", machine.status));
	}
	if machine.compensation_status != compensation_status {
		errors.push(format!(
			"compensation_status={} want={}",
			display_opt(machine.compensation_status),
			display_opt(compensation_status)
		));
	}
	if machine.is_running {
		errors.push("is_running=1 want=0".to_string());
	}
	if machine.gmt_end.is_none() {
		errors.push("gmt_end is NULL".to_string());
	}
	// A failed run may or may not carry an exception.
	if require_no_exception && machine.exception.as_deref().is_some_and(|e| !e.is_empty()) {
		errors.push("excep not empty".to_string());
	}
	errors
}

fn display_opt(status: Option<StepStatus>) -> String {
	status.map(|s| s.to_string()).unwrap_or_else(|| "''".to_string())
}

fn require_forward(
	states: &[StateInstance],
	name: &str,
	status: StepStatus,
	errors: &mut Vec<String>,
) {
	let found = states.iter().any(|s| {
		s.state_type == StateType::Forward
			&& s.name == name
			&& s.status == status
			&& s.compensated_for.is_none()
	});
	if !found {
		errors.push(format!("missing {status} {name} forward state"));
	}
}

fn forbid_compensations(states: &[StateInstance], errors: &mut Vec<String>) {
	let mut names: Vec<&str> = states
		.iter()
		.filter(|s| s.is_compensation() || s.compensated_for.is_some())
		.map(|s| s.name.as_str())
		.collect();
	if !names.is_empty() {
		names.sort_unstable();
		errors.push(format!(
			"unexpected compensation states present: {}",
			names.join(",")
		));
	}
}

/// Check the invariants every finished run must satisfy.
///
/// `states` must be in the order returned by the recorder.
pub fn check_invariants(
	machine: &MachineInstance,
	states: &[StateInstance],
) -> Result<(), ValidationError> {
	let mut errors = Vec::new();

	let terminal = machine.status.is_terminal();
	if terminal == machine.is_running || terminal != machine.gmt_end.is_some() {
		errors.push(format!(
			"inconsistent terminal fields: status={} is_running={} gmt_end={}",
			machine.status,
			machine.is_running,
			machine.gmt_end.is_some()
		));
	}

	// Forward rows: position and status, by name.
	let mut forward: HashMap<&str, (usize, StepStatus)> = HashMap::new();
	let mut forward_order: Vec<&str> = Vec::new();
	let mut compensated_order: Vec<&str> = Vec::new();
	let mut seen_compensation = false;
	let mut seen_forward_failure = false;
	let mut last_seq = 0;

	for (idx, state) in states.iter().enumerate() {
		if state.machine_instance_id != machine.id {
			errors.push(format!("state {} belongs to another run", state.id));
		}
		if state.seq <= last_seq {
			errors.push(format!("state {} is out of order", state.id));
		}
		last_seq = state.seq;
		if let Some(end) = machine.gmt_end
			&& state.gmt_started > end
		{
			errors.push(format!("state {} started after the run ended", state.id));
		}

		match state.state_type {
			StateType::Forward => {
				if state.compensated_for.is_some() {
					errors.push(format!("forward state {} has compensated_for set", state.name));
				}
				if seen_compensation {
					errors.push(format!("forward state {} follows a compensation", state.name));
				}
				if seen_forward_failure {
					errors.push(format!("forward state {} follows a failed step", state.name));
				}
				if state.status == StepStatus::Fail {
					seen_forward_failure = true;
				}
				forward.insert(state.name.as_str(), (idx, state.status));
				forward_order.push(state.name.as_str());
			},
			StateType::Compensate => {
				seen_compensation = true;
				match state.compensated_for.as_deref() {
					None => errors.push(format!("compensation {} has no compensated_for", state.name)),
					Some(target) => match forward.get(target) {
						Some((pos, StepStatus::Success)) if *pos < idx => compensated_order.push(target),
						Some(_) => errors.push(format!(
							"compensation {} targets {target} which did not succeed earlier",
							state.name
						)),
						None => errors.push(format!(
							"compensation {} targets unknown forward state {target}",
							state.name
						)),
					},
				}
			},
		}
	}

	if machine.status == ExecutionStatus::Success && seen_forward_failure {
		errors.push("successful run has a failed forward state".to_string());
	}

	// Compensations must run in strict reverse of forward completion.
	let expected_reverse: Vec<&str> = forward_order
		.iter()
		.rev()
		.filter(|name| compensated_order.contains(name))
		.copied()
		.collect();
	if compensated_order != expected_reverse {
		errors.push(format!(
			"compensations ran in order {compensated_order:?}, want {expected_reverse:?}"
		));
	}

	let compensations: Vec<&StateInstance> = states.iter().filter(|s| s.is_compensation()).collect();
	match (machine.compensation_status, compensations.is_empty()) {
		(None, false) => errors.push("compensation rows present but compensation_status unset".into()),
		(Some(_), true) => errors.push("compensation_status set but no compensation rows".into()),
		(Some(status), false) => {
			let all_ok = compensations.iter().all(|s| s.status == StepStatus::Success);
			if (status == StepStatus::Success) != all_ok {
				errors.push(format!(
					"compensation_status={status} disagrees with compensation rows"
				));
			}
		},
		(None, true) => {},
	}

	if errors.is_empty() {
		Ok(())
	} else {
		Err(ValidationError::Invariants(errors))
	}
}
