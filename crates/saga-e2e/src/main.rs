mod scenarios;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use saga_engine::actions::MemoryLedger;
use saga_engine::config::EngineConfig;
use saga_engine::saga::{
	ActionRegistry, DefinitionRepository, SagaEngine, StateInstance, StateLogRecorder,
};
use saga_engine::validation::{self, Scenario, ValidationError};
use saga_engine::{telemetry, transaction};
use tracing::{error, info};

/// End-to-end harness for the inventory/balance saga.
#[derive(Parser)]
#[command(name = "saga-e2e", version)]
struct Cli {
	/// Engine configuration file
	#[arg(long, short, global = true, default_value = "config.yaml")]
	config: PathBuf,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Seed resources and run the scenarios concurrently
	Run {
		/// Scenarios to run, all when omitted
		#[arg(long, value_delimiter = ',')]
		scenario: Vec<Scenario>,
		/// Validate each persisted run afterwards
		#[arg(long)]
		validate: bool,
	},
	/// Validate one persisted run against a scenario
	Check {
		#[arg(long)]
		xid: String,
		#[arg(long)]
		scenario: Scenario,
	},
}

/// Validation failed.
const EXIT_INVALID: u8 = 1;
/// Usage, configuration or storage problem.
const EXIT_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	match cli.command {
		Command::Run { scenario, validate } => match run(&cli.config, scenario, validate).await {
			Ok(true) => ExitCode::SUCCESS,
			Ok(false) => ExitCode::from(EXIT_INVALID),
			Err(e) => {
				eprintln!("run failed: {e:#}");
				ExitCode::from(EXIT_INVALID)
			},
		},
		Command::Check { xid, scenario } => match check(&cli.config, &xid, scenario).await {
			Ok(Ok(())) => {
				println!("OK: {scenario} XID={xid}");
				ExitCode::SUCCESS
			},
			Ok(Err(e)) => {
				eprintln!("{e}");
				ExitCode::from(exit_code(&e))
			},
			Err(e) => {
				eprintln!("check failed: {e:#}");
				ExitCode::from(EXIT_ERROR)
			},
		},
	}
}

/// A run that was never persisted is a lookup failure, not a failed expectation.
fn exit_code(err: &ValidationError) -> u8 {
	match err {
		ValidationError::RunNotFound(_) => EXIT_ERROR,
		_ => EXIT_INVALID,
	}
}

fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
	let config = EngineConfig::from_file(path)
		.with_context(|| format!("loading config {}", path.display()))?;
	telemetry::init(&config.log);
	Ok(config)
}

/// Returns `false` when validation was requested and at least one run failed it.
async fn run(config_path: &Path, selected: Vec<Scenario>, validate: bool) -> anyhow::Result<bool> {
	let config = load_config(config_path)?;

	if let Some(coordinator) = &config.coordinator {
		transaction::check_connectivity(&coordinator.grouplist, coordinator.connect_timeout)
			.await
			.context("transaction coordinator unreachable")?;
	}

	let ledger = Arc::new(MemoryLedger::new());
	scenarios::seed(ledger.as_ref()).await.context("seeding resources")?;

	let mut registry = ActionRegistry::new();
	scenarios::register_actions(&mut registry, ledger);
	let mut definitions = DefinitionRepository::new();
	let loaded = config.load_definitions(&mut definitions)?;
	if loaded == 0 {
		bail!("no state definitions configured");
	}
	info!(definitions = loaded, "loaded state definitions");

	let recorder = Arc::new(StateLogRecorder::new(config.build_store()?));
	let engine = SagaEngine::new(Arc::new(registry), Arc::new(definitions), recorder.clone())
		.with_options(config.engine_options());

	let selected = if selected.is_empty() {
		Scenario::ALL.to_vec()
	} else {
		selected
	};
	let runs = selected.iter().map(|&scenario| {
		let engine = &engine;
		async move {
			let result = engine
				.start(scenarios::DEFINITION_NAME, scenarios::params(scenario))
				.await;
			(scenario, result)
		}
	});

	let mut finished = Vec::with_capacity(selected.len());
	for (scenario, result) in futures::future::join_all(runs).await {
		let inst = result.with_context(|| format!("scenario {scenario}"))?;
		let comp_status = inst
			.compensation_status
			.map(|s| s.code())
			.unwrap_or_default();
		println!(
			"SCENARIO {scenario} XID={} status={} compStatus={comp_status}",
			inst.id, inst.status
		);
		finished.push((scenario, inst.id));
	}

	if !validate {
		return Ok(true);
	}
	let mut all_ok = true;
	for (scenario, xid) in finished {
		match validate_run(&recorder, &xid, scenario).await? {
			Ok(()) => println!("OK: {scenario} XID={xid}"),
			Err(e) => {
				error!(%scenario, %xid, error = %e, "validation failed");
				println!("FAIL: {scenario} XID={xid}: {e}");
				all_ok = false;
			},
		}
	}
	Ok(all_ok)
}

/// The outer error is a configuration or storage failure, the inner one a
/// failed expectation.
async fn check(
	config_path: &Path,
	xid: &str,
	scenario: Scenario,
) -> anyhow::Result<Result<(), ValidationError>> {
	let config = load_config(config_path)?;
	let recorder = StateLogRecorder::new(config.build_store()?);
	validate_run(&recorder, xid, scenario).await
}

async fn validate_run(
	recorder: &StateLogRecorder,
	xid: &str,
	scenario: Scenario,
) -> anyhow::Result<Result<(), ValidationError>> {
	let Some(record) = recorder
		.query_run(xid)
		.await
		.with_context(|| format!("querying run {xid}"))?
	else {
		return Ok(Err(ValidationError::RunNotFound(xid.to_string())));
	};
	print!("{}", state_summary(xid, &record.states));
	Ok(validation::validate(scenario, &record.machine, &record.states))
}

fn state_summary(xid: &str, states: &[StateInstance]) -> String {
	let mut out = format!("Found {} state rows for XID={xid}\n", states.len());
	if !states.is_empty() {
		let names: Vec<String> = states
			.iter()
			.map(|s| format!("{}/{}", s.name, s.status))
			.collect();
		out.push_str(&format!("States: {}\n", names.join(", ")));
	}
	out
}
