// Engine configuration loaded from YAML

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::saga::{DefinitionRepository, EngineOptions, SagaError};
use crate::stateful::{FileStore, MemoryStore, StateStore};
use crate::{serde_dur, serde_dur_option};

const DEFAULT_COMPENSATION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("failed to read config file: {0}")]
	Io(#[from] std::io::Error),

	#[error("failed to parse config: {0}")]
	Parse(#[from] serde_yaml::Error),

	#[error("invalid config: {0}")]
	Invalid(String),

	#[error("failed to load definitions: {0}")]
	Definitions(#[from] SagaError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineConfig {
	#[serde(default)]
	pub store: StoreConfig,

	/// Definition files or directories
	#[serde(default)]
	pub definitions: Vec<PathBuf>,

	/// Default run deadline
	#[serde(default, with = "serde_dur_option", skip_serializing_if = "Option::is_none")]
	pub timeout: Option<Duration>,

	#[serde(default, with = "serde_dur_option", skip_serializing_if = "Option::is_none")]
	pub compensation_timeout: Option<Duration>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub coordinator: Option<CoordinatorConfig>,

	#[serde(default)]
	pub log: LogConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StoreConfig {
	#[default]
	Memory,
	File {
		#[serde(default)]
		path: Option<PathBuf>,
	},
}

/// Where the external transaction coordinator listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CoordinatorConfig {
	/// `host:port` addresses, first one is dialed
	pub grouplist: Vec<String>,
	#[serde(default = "default_connect_timeout", with = "serde_dur")]
	pub connect_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
	DEFAULT_CONNECT_TIMEOUT
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogFormat {
	#[default]
	Text,
	Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LogConfig {
	#[serde(default = "default_level")]
	pub level: String,
	#[serde(default)]
	pub format: LogFormat,
}

fn default_level() -> String {
	"info".to_string()
}

impl Default for LogConfig {
	fn default() -> Self {
		Self {
			level: default_level(),
			format: LogFormat::default(),
		}
	}
}

impl EngineConfig {
	/// Load from a YAML file. Relative paths inside the file resolve against
	/// the file's directory.
	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let contents = fs_err::read_to_string(path)?;
		let mut config = Self::from_yaml_str(&contents)?;
		if let Some(base) = path.parent() {
			config.resolve_relative(base);
		}
		Ok(config)
	}

	pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
		let config: Self = serde_yaml::from_str(s)?;
		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if let StoreConfig::File { path: None } = self.store {
			return Err(ConfigError::Invalid(
				"store.path is required when store.type is file".to_string(),
			));
		}
		if let Some(coordinator) = &self.coordinator
			&& coordinator.grouplist.iter().all(|a| a.trim().is_empty())
		{
			return Err(ConfigError::Invalid("coordinator.grouplist is empty".to_string()));
		}
		Ok(())
	}

	fn resolve_relative(&mut self, base: &Path) {
		let join = |p: &mut PathBuf| {
			if p.is_relative() {
				*p = base.join(&*p);
			}
		};
		if let StoreConfig::File { path: Some(p) } = &mut self.store {
			join(p);
		}
		self.definitions.iter_mut().for_each(join);
	}

	pub fn build_store(&self) -> Result<Arc<dyn StateStore>, ConfigError> {
		match &self.store {
			StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
			StoreConfig::File { path: Some(path) } => {
				info!(path = %path.display(), "using file state store");
				Ok(Arc::new(FileStore::new(path.clone())))
			},
			StoreConfig::File { path: None } => Err(ConfigError::Invalid(
				"store.path is required when store.type is file".to_string(),
			)),
		}
	}

	/// Load every configured definition into `repo`, returning how many were added.
	pub fn load_definitions(&self, repo: &mut DefinitionRepository) -> Result<usize, ConfigError> {
		let mut loaded = 0;
		for path in &self.definitions {
			loaded += repo.load_path(path)?;
		}
		Ok(loaded)
	}

	pub fn engine_options(&self) -> EngineOptions {
		EngineOptions {
			default_timeout: self.timeout,
			compensation_timeout: self
				.compensation_timeout
				.unwrap_or(DEFAULT_COMPENSATION_TIMEOUT),
		}
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;

	#[test]
	fn test_defaults() {
		let config = EngineConfig::from_yaml_str("{}").unwrap();
		assert_eq!(config.store, StoreConfig::Memory);
		assert_eq!(config.log, LogConfig::default());
		let options = config.engine_options();
		assert_eq!(options.default_timeout, None);
		assert_eq!(options.compensation_timeout, Duration::from_secs(10));
	}

	#[test]
	fn test_full_config() {
		let yaml = r#"
store:
  type: file
  path: /var/lib/saga
definitions:
  - statelang
timeout: 30s
compensationTimeout: 5s
coordinator:
  grouplist: ["127.0.0.1:8091"]
log:
  level: debug
  format: json
"#;
		let config = EngineConfig::from_yaml_str(yaml).unwrap();
		assert_eq!(
			config.store,
			StoreConfig::File {
				path: Some(PathBuf::from("/var/lib/saga"))
			}
		);
		assert_eq!(config.timeout, Some(Duration::from_secs(30)));
		let coordinator = config.coordinator.as_ref().unwrap();
		assert_eq!(coordinator.connect_timeout, Duration::from_secs(2));
		assert_eq!(config.log.format, LogFormat::Json);
		assert_eq!(config.engine_options().compensation_timeout, Duration::from_secs(5));
	}

	#[test]
	fn test_file_store_requires_path() {
		assert_matches!(
			EngineConfig::from_yaml_str("store:\n  type: file\n"),
			Err(ConfigError::Invalid(_))
		);
	}

	#[test]
	fn test_unknown_field_rejected() {
		assert_matches!(
			EngineConfig::from_yaml_str("stores: {}\n"),
			Err(ConfigError::Parse(_))
		);
	}

	#[test]
	fn test_from_file_resolves_relative_paths() {
		let dir = tempfile::tempdir().unwrap();
		let defs = dir.path().join("defs");
		std::fs::create_dir(&defs).unwrap();
		std::fs::write(
			defs.join("one.yaml"),
			"name: one\nsteps:\n  - name: A\n    action: a\n",
		)
		.unwrap();
		let config_path = dir.path().join("config.yaml");
		std::fs::write(
			&config_path,
			"store:\n  type: file\n  path: data\ndefinitions: [defs]\n",
		)
		.unwrap();

		let config = EngineConfig::from_file(&config_path).unwrap();
		assert_eq!(
			config.store,
			StoreConfig::File {
				path: Some(dir.path().join("data"))
			}
		);

		let mut repo = DefinitionRepository::new();
		assert_eq!(config.load_definitions(&mut repo).unwrap(), 1);
		assert!(repo.get("one").is_ok());
	}

	#[test]
	fn test_missing_file() {
		assert_matches!(
			EngineConfig::from_file(Path::new("/nonexistent/config.yaml")),
			Err(ConfigError::Io(_))
		);
	}
}
