//! Persistence recorder for machine and state instances.
//!
//! Each run is stored as two documents: `machine/<xid>` holding the
//! [`MachineInstance`] and `states/<xid>` holding its [`StateInstance`] rows
//! in execution order.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::trace;

use super::types::{MachineInstance, StateInstance};
use crate::stateful::{StateStore, StateStoreExt, StoreError};

const MACHINE_PREFIX: &str = "machine/";
const STATES_PREFIX: &str = "states/";

fn machine_key(id: &str) -> String {
	format!("{MACHINE_PREFIX}{id}")
}

fn states_key(id: &str) -> String {
	format!("{STATES_PREFIX}{id}")
}

/// Everything persisted for one run, as read back by validators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
	pub machine: MachineInstance,
	pub states: Vec<StateInstance>,
}

pub struct StateLogRecorder {
	store: Arc<dyn StateStore>,
	// Serializes read-modify-write cycles on the documents.
	write_lock: Mutex<()>,
}

impl std::fmt::Debug for StateLogRecorder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StateLogRecorder").finish_non_exhaustive()
	}
}

impl StateLogRecorder {
	pub fn new(store: Arc<dyn StateStore>) -> Self {
		Self {
			store,
			write_lock: Mutex::new(()),
		}
	}

	pub async fn create_machine_instance(&self, instance: &MachineInstance) -> Result<(), StoreError> {
		let _guard = self.write_lock.lock().await;
		let key = machine_key(&instance.id);
		if self.store.exists(&key).await? {
			return Err(StoreError::Storage(format!(
				"machine instance {} already exists",
				instance.id
			)));
		}
		self.store.set_json(&key, instance).await?;
		self
			.store
			.set_json(&states_key(&instance.id), &Vec::<StateInstance>::new())
			.await?;
		trace!(xid = %instance.id, "created machine instance");
		Ok(())
	}

	/// Replace the stored machine instance. A finished instance is immutable.
	pub async fn update_machine_instance(&self, instance: &MachineInstance) -> Result<(), StoreError> {
		let _guard = self.write_lock.lock().await;
		let key = machine_key(&instance.id);
		let current: MachineInstance = self
			.store
			.get_json(&key)
			.await?
			.ok_or_else(|| StoreError::NotFound(key.clone()))?;
		if !current.is_running {
			return Err(StoreError::RunFinished(instance.id.clone()));
		}
		self.store.set_json(&key, instance).await?;
		trace!(xid = %instance.id, status = %instance.status, "updated machine instance");
		Ok(())
	}

	/// Append a state row to a running machine instance.
	pub async fn append_state_instance(&self, state: &StateInstance) -> Result<(), StoreError> {
		let _guard = self.write_lock.lock().await;
		let id = &state.machine_instance_id;
		let machine: MachineInstance = self
			.store
			.get_json(&machine_key(id))
			.await?
			.ok_or_else(|| StoreError::NotFound(machine_key(id)))?;
		if !machine.is_running {
			return Err(StoreError::RunFinished(id.clone()));
		}
		let key = states_key(id);
		let mut states: Vec<StateInstance> = self.store.get_json(&key).await?.unwrap_or_default();
		states.push(state.clone());
		self.store.set_json(&key, &states).await?;
		trace!(xid = %id, state = %state.name, status = %state.status, "appended state instance");
		Ok(())
	}

	pub async fn get_machine_instance(&self, id: &str) -> Result<Option<MachineInstance>, StoreError> {
		self.store.get_json(&machine_key(id)).await
	}

	/// State rows of a run in execution order.
	///
	/// `seq` is authoritative; start times are informational.
	pub async fn list_state_instances(&self, id: &str) -> Result<Vec<StateInstance>, StoreError> {
		let mut states: Vec<StateInstance> = self
			.store
			.get_json(&states_key(id))
			.await?
			.unwrap_or_default();
		states.sort_by_key(|s| s.seq);
		Ok(states)
	}

	/// Machine row plus ordered state rows, `None` for an unknown run.
	pub async fn query_run(&self, id: &str) -> Result<Option<RunRecord>, StoreError> {
		let Some(machine) = self.get_machine_instance(id).await? else {
			return Ok(None);
		};
		let states = self.list_state_instances(id).await?;
		Ok(Some(RunRecord { machine, states }))
	}

	pub async fn list_machine_ids(&self) -> Result<Vec<String>, StoreError> {
		Ok(
			self
				.store
				.keys(MACHINE_PREFIX)
				.await?
				.into_iter()
				.filter_map(|k| k.strip_prefix(MACHINE_PREFIX).map(str::to_string))
				.collect(),
		)
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use chrono::Utc;
	use serde_json::Value;

	use super::*;
	use crate::saga::types::{ExecutionStatus, StateType, StepStatus};
	use crate::stateful::MemoryStore;

	fn state(machine: &str, seq: u32, name: &str) -> StateInstance {
		let now = Utc::now();
		StateInstance {
			id: format!("{machine}#{seq}"),
			machine_instance_id: machine.to_string(),
			seq,
			name: name.to_string(),
			state_type: StateType::Forward,
			service_name: "svc".to_string(),
			status: StepStatus::Success,
			compensated_for: None,
			business_key: "bk".to_string(),
			input_params: Value::Null,
			exception: None,
			gmt_started: now,
			gmt_end: now,
		}
	}

	#[tokio::test]
	async fn test_recorder_lifecycle() {
		let recorder = StateLogRecorder::new(Arc::new(MemoryStore::new()));
		let mut inst = MachineInstance::start("xid-1", "m", "bk", Value::Null);
		recorder.create_machine_instance(&inst).await.unwrap();

		recorder.append_state_instance(&state("xid-1", 1, "A")).await.unwrap();
		recorder.append_state_instance(&state("xid-1", 2, "B")).await.unwrap();

		inst.finish(ExecutionStatus::Success, None, None);
		recorder.update_machine_instance(&inst).await.unwrap();

		let record = recorder.query_run("xid-1").await.unwrap().unwrap();
		assert_eq!(record.machine.status, ExecutionStatus::Success);
		let names: Vec<_> = record.states.iter().map(|s| s.name.as_str()).collect();
		assert_eq!(names, vec!["A", "B"]);
		assert_eq!(recorder.list_machine_ids().await.unwrap(), vec!["xid-1".to_string()]);
	}

	#[tokio::test]
	async fn test_rows_listed_by_seq_when_clock_steps_back() {
		let recorder = StateLogRecorder::new(Arc::new(MemoryStore::new()));
		let inst = MachineInstance::start("xid-3", "m", "bk", Value::Null);
		recorder.create_machine_instance(&inst).await.unwrap();

		let first = state("xid-3", 1, "A");
		let mut second = state("xid-3", 2, "B");
		second.gmt_started = first.gmt_started - chrono::Duration::milliseconds(5);
		second.gmt_end = second.gmt_started;
		recorder.append_state_instance(&first).await.unwrap();
		recorder.append_state_instance(&second).await.unwrap();

		let order: Vec<_> = recorder
			.list_state_instances("xid-3")
			.await
			.unwrap()
			.into_iter()
			.map(|s| (s.seq, s.name))
			.collect();
		assert_eq!(order, vec![(1, "A".to_string()), (2, "B".to_string())]);
	}

	#[tokio::test]
	async fn test_recorder_rejects_writes_after_finish() {
		let recorder = StateLogRecorder::new(Arc::new(MemoryStore::new()));
		let mut inst = MachineInstance::start("xid-2", "m", "bk", Value::Null);
		recorder.create_machine_instance(&inst).await.unwrap();
		inst.finish(ExecutionStatus::Fail, None, None);
		recorder.update_machine_instance(&inst).await.unwrap();

		assert_matches!(
			recorder.append_state_instance(&state("xid-2", 1, "A")).await,
			Err(StoreError::RunFinished(id)) if id == "xid-2"
		);
		assert_matches!(
			recorder.update_machine_instance(&inst).await,
			Err(StoreError::RunFinished(_))
		);
		assert!(recorder.list_state_instances("xid-2").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_recorder_unknown_run() {
		let recorder = StateLogRecorder::new(Arc::new(MemoryStore::new()));
		assert!(recorder.query_run("missing").await.unwrap().is_none());
		assert_matches!(
			recorder.append_state_instance(&state("missing", 1, "A")).await,
			Err(StoreError::NotFound(_))
		);
		let inst = MachineInstance::start("dup", "m", "bk", Value::Null);
		recorder.create_machine_instance(&inst).await.unwrap();
		assert!(recorder.create_machine_instance(&inst).await.is_err());
	}
}
