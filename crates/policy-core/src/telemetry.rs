use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
	#[default]
	Pretty,
	Json,
}

/// Installs the process-wide `tracing` subscriber: an `EnvFilter` driven by
/// `RUST_LOG` (defaulting to `info`), with the output shape chosen by
/// `format`.
pub fn init(format: LogFormat) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let registry = tracing_subscriber::registry().with(filter);
	match format {
		LogFormat::Pretty => {
			registry.with(tracing_subscriber::fmt::layer()).init();
		},
		LogFormat::Json => {
			registry
				.with(tracing_subscriber::fmt::layer().json().flatten_event(true))
				.init();
		},
	}
}
