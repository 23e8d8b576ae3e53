//! Process-wide tracing setup.

use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::{LogConfig, LogFormat};

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Only the first call has any effect.
pub fn init(config: &LogConfig) {
	INITIALIZED.get_or_init(|| {
		let filter = env_filter(&config.level);
		let layer = match config.format {
			LogFormat::Text => fmt::layer().with_target(true).boxed(),
			LogFormat::Json => fmt::layer()
				.json()
				.with_current_span(true)
				.with_span_list(false)
				.boxed(),
		};

		if tracing_subscriber::registry()
			.with(layer.with_filter(filter))
			.try_init()
			.is_err()
		{
			tracing::debug!("global tracing subscriber already set");
		}
	});
}

fn env_filter(level: &str) -> EnvFilter {
	EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(level))
		.unwrap_or_else(|_| EnvFilter::new("info"))
}
