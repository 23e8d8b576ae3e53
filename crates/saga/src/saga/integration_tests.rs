//! End-to-end engine runs over the reference actions and scripted ones.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::actions::{
	BALANCE_NOT_ENOUGH, BALANCE_TABLE, BalanceAction, INVENTORY_TABLE, InventoryAction, MemoryLedger,
	ResourceLedger,
};
use crate::saga::{
	ActionError, ActionRegistry, DefinitionRepository, ExecutionStatus, MachineInstance, RunParams,
	SagaEngine, StartOptions, StateDefinition, StateInstance, StateLogRecorder, StateType,
	StepDefinition, StepStatus,
};
use crate::stateful::{MemoryStore, StoreError};
use crate::testing::{CallKind, CallLog, Outcome, ScriptedAction};
use crate::transaction::{self, LocalTransactionManager};
use crate::validation::{self, Scenario};

const MACHINE: &str = "ReduceInventoryAndBalance";

fn reduce_definition() -> StateDefinition {
	StateDefinition::new(
		MACHINE,
		vec![
			StepDefinition::new("ReduceInventory", "inventoryAction"),
			StepDefinition::new("ReduceBalance", "balanceAction"),
		],
	)
}

struct Harness {
	engine: SagaEngine,
	ledger: Arc<MemoryLedger>,
	transactions: Arc<LocalTransactionManager>,
}

impl Harness {
	async fn new() -> Self {
		let ledger = Arc::new(MemoryLedger::new());
		for product in ["p_s", "p_b", "p_i"] {
			ledger.seed(INVENTORY_TABLE, product, 100).await.unwrap();
		}
		ledger.seed(BALANCE_TABLE, "u_s", 1000).await.unwrap();
		ledger.seed(BALANCE_TABLE, "u_b", 50).await.unwrap();
		ledger.seed(BALANCE_TABLE, "u_i", 1000).await.unwrap();

		let mut registry = ActionRegistry::new();
		registry.register("inventoryAction", InventoryAction::new(ledger.clone()));
		registry.register("balanceAction", BalanceAction::new(ledger.clone()));
		let mut definitions = DefinitionRepository::new();
		definitions.register(reduce_definition()).unwrap();

		let transactions = Arc::new(LocalTransactionManager::new());
		let recorder = Arc::new(StateLogRecorder::new(Arc::new(MemoryStore::new())));
		let engine = SagaEngine::new(Arc::new(registry), Arc::new(definitions), recorder)
			.with_transaction_manager(transactions.clone());
		Self {
			engine,
			ledger,
			transactions,
		}
	}

	async fn stock(&self, product: &str) -> i64 {
		self
			.ledger
			.quantity(INVENTORY_TABLE, product)
			.await
			.unwrap()
			.unwrap()
	}

	async fn balance(&self, user: &str) -> i64 {
		self.ledger.quantity(BALANCE_TABLE, user).await.unwrap().unwrap()
	}

	async fn states(&self, inst: &MachineInstance) -> Vec<StateInstance> {
		self
			.engine
			.recorder()
			.list_state_instances(&inst.id)
			.await
			.unwrap()
	}
}

fn order(bk: &str, product: &str, count: i64, user: &str, amount: i64) -> RunParams {
	RunParams::new()
		.with("businessKey", bk)
		.with("productId", product)
		.with("count", count)
		.with("userId", user)
		.with("amount", amount)
}

fn summary(states: &[StateInstance]) -> Vec<(&str, StateType, StepStatus)> {
	states
		.iter()
		.map(|s| (s.name.as_str(), s.state_type, s.status))
		.collect()
}

#[tokio::test]
async fn test_success_scenario() {
	let h = Harness::new().await;
	let inst = h
		.engine
		.start(MACHINE, order("bk_success", "p_s", 1, "u_s", 1))
		.await
		.unwrap();

	assert_eq!(inst.status, ExecutionStatus::Success);
	assert_eq!(inst.compensation_status, None);
	assert_eq!(inst.business_key, "bk_success");
	assert!(!inst.is_running);
	assert!(inst.gmt_end.is_some());

	let states = h.states(&inst).await;
	validation::validate(Scenario::Success, &inst, &states).unwrap();
	assert_eq!(
		summary(&states),
		vec![
			("ReduceInventory", StateType::Forward, StepStatus::Success),
			("ReduceBalance", StateType::Forward, StepStatus::Success),
		]
	);
	assert_eq!(h.stock("p_s").await, 99);
	assert_eq!(h.balance("u_s").await, 999);
	assert!(!h.transactions.is_active(&inst.id));
}

#[tokio::test]
async fn test_compensate_balance_scenario() {
	let h = Harness::new().await;
	let inst = h
		.engine
		.start(MACHINE, order("bk_comp_bal", "p_b", 10, "u_b", 100))
		.await
		.unwrap();

	assert_eq!(inst.status, ExecutionStatus::Fail);
	assert_eq!(inst.compensation_status, Some(StepStatus::Success));
	assert!(inst.exception.as_deref().unwrap().contains(BALANCE_NOT_ENOUGH));

	let states = h.states(&inst).await;
	validation::validate(Scenario::CompensateBalance, &inst, &states).unwrap();
	assert_eq!(
		summary(&states),
		vec![
			("ReduceInventory", StateType::Forward, StepStatus::Success),
			("ReduceBalance", StateType::Forward, StepStatus::Fail),
			("CompensateReduceInventory", StateType::Compensate, StepStatus::Success),
		]
	);
	assert_eq!(states[2].compensated_for.as_deref(), Some("ReduceInventory"));
	assert_eq!(states[2].business_key, "bk_comp_bal");
	assert_eq!(states[2].input_params, states[0].input_params);

	// Net effect is zero.
	assert_eq!(h.stock("p_b").await, 100);
	assert_eq!(h.balance("u_b").await, 50);
}

#[tokio::test]
async fn test_compensate_inventory_scenario() {
	let h = Harness::new().await;
	let inst = h
		.engine
		.start(MACHINE, order("bk_comp_inv", "p_i", 1000, "u_i", 1))
		.await
		.unwrap();

	assert_eq!(inst.status, ExecutionStatus::Fail);
	assert_eq!(inst.compensation_status, None);

	let states = h.states(&inst).await;
	validation::validate(Scenario::CompensateInventory, &inst, &states).unwrap();
	assert_eq!(
		summary(&states),
		vec![("ReduceInventory", StateType::Forward, StepStatus::Fail)]
	);
	assert_eq!(h.stock("p_i").await, 100);
	assert_eq!(h.balance("u_i").await, 1000);
}

#[tokio::test]
async fn test_non_positive_quantity_counts_as_one() {
	let h = Harness::new().await;
	let inst = h
		.engine
		.start(MACHINE, order("bk_zero", "p_s", 0, "u_s", -5))
		.await
		.unwrap();
	assert_eq!(inst.status, ExecutionStatus::Success);
	assert_eq!(h.stock("p_s").await, 99);
	assert_eq!(h.balance("u_s").await, 999);
}

#[tokio::test]
async fn test_concurrent_runs_are_isolated() {
	let h = Harness::new().await;
	// Each successful order takes 1 stock and 10 balance from u_b (50); five
	// of them succeed, the rest are compensated.
	let runs = (0..8).map(|i| {
		h.engine
			.start(MACHINE, order(&format!("bk_{i}"), "p_b", 1, "u_b", 10))
	});
	let results = join_all(runs).await;

	let mut succeeded = 0;
	for inst in results.into_iter().map(Result::unwrap) {
		let states = h.states(&inst).await;
		assert!(states.iter().all(|s| s.machine_instance_id == inst.id));
		validation::check_invariants(&inst, &states).unwrap();
		match inst.status {
			ExecutionStatus::Success => {
				succeeded += 1;
				validation::validate(Scenario::Success, &inst, &states).unwrap();
			},
			ExecutionStatus::Fail => {
				validation::validate(Scenario::CompensateBalance, &inst, &states).unwrap();
			},
			ExecutionStatus::Running => panic!("run {} left running", inst.id),
		}
	}
	assert_eq!(succeeded, 5);
	assert_eq!(h.balance("u_b").await, 0);
	assert_eq!(h.stock("p_b").await, 95);
	assert_eq!(h.transactions.active_count(), 0);
	assert_eq!(h.engine.recorder().list_machine_ids().await.unwrap().len(), 8);
}

#[tokio::test]
async fn test_finished_run_rejects_further_writes() {
	let h = Harness::new().await;
	let inst = h
		.engine
		.start(MACHINE, order("bk_done", "p_s", 1, "u_s", 1))
		.await
		.unwrap();
	let states = h.states(&inst).await;

	let recorder = h.engine.recorder();
	assert_matches!(
		recorder.append_state_instance(&states[0]).await,
		Err(StoreError::RunFinished(id)) if id == inst.id
	);
	let mut reopened = inst.clone();
	reopened.status = ExecutionStatus::Running;
	reopened.is_running = true;
	assert_matches!(
		recorder.update_machine_instance(&reopened).await,
		Err(StoreError::RunFinished(_))
	);
	let record = recorder.query_run(&inst.id).await.unwrap().unwrap();
	assert_eq!(record.machine, inst);
	assert_eq!(record.states.len(), 2);
}

/// Engine over scripted actions registered under their own names.
fn scripted_engine(definition: StateDefinition, actions: Vec<ScriptedAction>) -> SagaEngine {
	let mut registry = ActionRegistry::new();
	for action in actions {
		registry.register(action.name().to_string(), action);
	}
	let mut definitions = DefinitionRepository::new();
	definitions.register(definition).unwrap();
	let recorder = Arc::new(StateLogRecorder::new(Arc::new(MemoryStore::new())));
	SagaEngine::new(Arc::new(registry), Arc::new(definitions), recorder)
}

fn chain(name: &str, steps: &[&str]) -> StateDefinition {
	StateDefinition::new(
		name,
		steps
			.iter()
			.map(|s| StepDefinition::new(*s, s.to_lowercase()))
			.collect(),
	)
}

#[tokio::test]
async fn test_mid_sequence_failure_compensates_in_reverse() {
	let log = CallLog::new();
	let engine = scripted_engine(
		chain("abcd", &["A", "B", "C", "D"]),
		vec![
			ScriptedAction::new("a", log.clone()),
			ScriptedAction::new("b", log.clone()),
			ScriptedAction::new("c", log.clone()).forward(Outcome::Error("boom".into())),
			ScriptedAction::new("d", log.clone()),
		],
	);
	let inst = engine.start("abcd", RunParams::new()).await.unwrap();
	assert_eq!(inst.status, ExecutionStatus::Fail);
	assert_eq!(inst.compensation_status, Some(StepStatus::Success));
	assert_eq!(inst.exception.as_deref(), Some("boom"));

	assert_eq!(
		log.sequence(),
		vec![
			("a".to_string(), CallKind::Forward),
			("b".to_string(), CallKind::Forward),
			("c".to_string(), CallKind::Forward),
			("b".to_string(), CallKind::Compensate),
			("a".to_string(), CallKind::Compensate),
		]
	);
	assert!(log.calls().iter().all(|c| c.business_key == inst.id));

	let states = engine.recorder().list_state_instances(&inst.id).await.unwrap();
	validation::check_invariants(&inst, &states).unwrap();
	let seqs: Vec<u32> = states.iter().map(|s| s.seq).collect();
	assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_compensation_failure_is_best_effort() {
	let log = CallLog::new();
	let engine = scripted_engine(
		chain("abc", &["A", "B", "C"]),
		vec![
			ScriptedAction::new("a", log.clone()),
			ScriptedAction::new("b", log.clone()).compensate(Outcome::Error("undo failed".into())),
			ScriptedAction::new("c", log.clone()).forward(Outcome::Fail),
		],
	);
	let inst = engine.start("abc", RunParams::new()).await.unwrap();
	assert_eq!(inst.status, ExecutionStatus::Fail);
	assert_eq!(inst.compensation_status, Some(StepStatus::Fail));
	assert_eq!(inst.exception, None);
	// A is still compensated after B's compensation failed.
	assert_eq!(log.count("a", CallKind::Compensate), 1);
	assert_eq!(log.count("b", CallKind::Compensate), 1);

	let states = engine.recorder().list_state_instances(&inst.id).await.unwrap();
	validation::check_invariants(&inst, &states).unwrap();
	let comp: Vec<_> = states.iter().filter(|s| s.is_compensation()).collect();
	assert_eq!(comp[0].name, "CompensateB");
	assert_eq!(comp[0].status, StepStatus::Fail);
	assert_eq!(comp[0].exception.as_deref(), Some("undo failed"));
	assert_eq!(comp[1].name, "CompensateA");
	assert_eq!(comp[1].status, StepStatus::Success);
}

#[tokio::test]
async fn test_step_without_compensation_is_skipped() {
	let log = CallLog::new();
	let definition = StateDefinition::new(
		"skip",
		vec![
			StepDefinition::new("A", "a"),
			StepDefinition::new("B", "b").without_compensation(),
			StepDefinition::new("C", "c"),
		],
	);
	let engine = scripted_engine(
		definition,
		vec![
			ScriptedAction::new("a", log.clone()),
			ScriptedAction::new("b", log.clone()),
			ScriptedAction::new("c", log.clone()).forward(Outcome::Fail),
		],
	);
	let inst = engine.start("skip", RunParams::new()).await.unwrap();
	assert_eq!(inst.compensation_status, Some(StepStatus::Success));
	assert_eq!(log.count("b", CallKind::Compensate), 0);
	assert_eq!(log.count("a", CallKind::Compensate), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline_fails_hanging_step() {
	let log = CallLog::new();
	let engine = scripted_engine(
		chain("slow", &["A", "B"]),
		vec![
			ScriptedAction::new("a", log.clone()),
			ScriptedAction::new("b", log.clone()).forward(Outcome::Hang),
		],
	);
	let inst = engine
		.start_with(
			"slow",
			RunParams::new(),
			StartOptions::default().with_timeout(Duration::from_millis(200)),
		)
		.await
		.unwrap();

	assert_eq!(inst.status, ExecutionStatus::Fail);
	assert!(!inst.is_running);
	assert_eq!(inst.compensation_status, Some(StepStatus::Success));
	assert!(inst.exception.as_deref().unwrap().contains("timed out"));

	let states = engine.recorder().list_state_instances(&inst.id).await.unwrap();
	validation::check_invariants(&inst, &states).unwrap();
	assert_eq!(states[1].name, "B");
	assert_eq!(states[1].status, StepStatus::Fail);
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout_is_tighter_than_run_deadline() {
	let log = CallLog::new();
	let definition = StateDefinition::new(
		"step-timeout",
		vec![StepDefinition::new("A", "a").with_timeout(Duration::from_millis(50))],
	);
	let engine = scripted_engine(
		definition,
		vec![ScriptedAction::new("a", log.clone()).delay(Duration::from_secs(5))],
	);
	let inst = engine
		.start_with(
			"step-timeout",
			RunParams::new(),
			StartOptions::default().with_timeout(Duration::from_secs(60)),
		)
		.await
		.unwrap();
	assert_eq!(inst.status, ExecutionStatus::Fail);
	assert_eq!(inst.compensation_status, None);
	assert!(inst.exception.as_deref().unwrap().contains("50ms"));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_reaches_terminal_state() {
	let log = CallLog::new();
	let engine = scripted_engine(
		chain("cancel", &["A", "B", "C"]),
		vec![
			ScriptedAction::new("a", log.clone()),
			ScriptedAction::new("b", log.clone()).forward(Outcome::Hang),
			ScriptedAction::new("c", log.clone()),
		],
	);
	let token = CancellationToken::new();
	let canceller = token.clone();
	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(10)).await;
		canceller.cancel();
	});

	let inst = engine
		.start_with(
			"cancel",
			RunParams::new(),
			StartOptions::default().with_cancellation(token),
		)
		.await
		.unwrap();
	assert_eq!(inst.status, ExecutionStatus::Fail);
	assert_eq!(inst.exception.as_deref(), Some("action cancelled"));
	assert_eq!(inst.compensation_status, Some(StepStatus::Success));
	assert_eq!(log.count("c", CallKind::Forward), 0);
	assert_eq!(log.count("a", CallKind::Compensate), 1);
}

#[tokio::test]
async fn test_cancelled_before_start_runs_nothing() {
	let log = CallLog::new();
	let engine = scripted_engine(
		chain("never", &["A"]),
		vec![ScriptedAction::new("a", log.clone())],
	);
	let token = CancellationToken::new();
	token.cancel();
	let inst = engine
		.start_with(
			"never",
			RunParams::new(),
			StartOptions::default().with_cancellation(token),
		)
		.await
		.unwrap();
	assert_eq!(inst.status, ExecutionStatus::Fail);
	assert_eq!(inst.compensation_status, None);
	assert!(log.calls().is_empty());
	let states = engine.recorder().list_state_instances(&inst.id).await.unwrap();
	assert!(states.is_empty());
}

#[tokio::test]
async fn test_actions_observe_current_xid() {
	let seen = Arc::new(Mutex::new(Vec::new()));
	let mut registry = ActionRegistry::new();
	let forward_seen = seen.clone();
	registry.register_fn(
		"observe",
		Vec::new(),
		move |_bk, _params| {
			let seen = forward_seen.clone();
			async move {
				seen.lock().push(transaction::current_xid());
				Ok::<_, ActionError>(true)
			}
		},
		|_bk, _params| async { Ok::<_, ActionError>(true) },
	);
	let mut definitions = DefinitionRepository::new();
	definitions
		.register(chain("observe", &["Observe"]))
		.unwrap();
	let recorder = Arc::new(StateLogRecorder::new(Arc::new(MemoryStore::new())));
	let engine = SagaEngine::new(Arc::new(registry), Arc::new(definitions), recorder);

	let inst = engine.start("observe", RunParams::new()).await.unwrap();
	assert_eq!(inst.status, ExecutionStatus::Success);
	assert_eq!(*seen.lock(), vec![Some(inst.id.clone())]);
	assert_eq!(transaction::current_xid(), None);
}
