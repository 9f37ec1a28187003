//! Startup configuration: CLI flags layered over an optional YAML file,
//! flags taking precedence. Does not reinterpret policy definition
//! manifests — those are compiled into the binary at build time via the
//! registry the embedder wires up, not read from this file.

use std::path::PathBuf;

use policy_core::telemetry::LogFormat;
use serde::Deserialize;

#[derive(clap::Parser, Debug)]
#[command(version, about = "Out-of-process policy engine for an external-processing front proxy")]
pub struct Args {
	/// Path to a YAML config file. CLI flags below override anything it sets.
	#[arg(long, value_name = "file")]
	pub config_file: Option<PathBuf>,

	/// Address the external-processing gRPC server listens on.
	#[arg(long, value_name = "host:port")]
	pub listen_addr: Option<String>,

	/// Local YAML route-chain file to load and watch, mutually exclusive
	/// with `--discovery-addr`.
	#[arg(long, value_name = "file")]
	pub routes_file: Option<PathBuf>,

	/// Address of the config-plane discovery service, mutually exclusive
	/// with `--routes-file`.
	#[arg(long, value_name = "url")]
	pub discovery_addr: Option<String>,

	/// Soft cap on concurrently in-flight exchanges; unset means unbounded.
	#[arg(long, value_name = "n")]
	pub max_in_flight: Option<usize>,

	/// `pretty` or `json`.
	#[arg(long, value_name = "format")]
	pub log_format: Option<String>,
}

/// The merged, validated configuration the binary runs with.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct RawConfig {
	pub listen_addr: Option<String>,
	pub routes_file: Option<PathBuf>,
	pub discovery_addr: Option<String>,
	pub max_in_flight: Option<usize>,
	pub log_format: Option<LogFormat>,
}

pub enum ConfigSource {
	File(PathBuf),
	Discovery(String),
}

pub struct ResolvedConfig {
	pub listen_addr: String,
	pub source: ConfigSource,
	pub max_in_flight: Option<usize>,
	pub log_format: LogFormat,
}

impl RawConfig {
	pub async fn load(path: &std::path::Path) -> anyhow::Result<Self> {
		let bytes = fs_err::tokio::read(path).await?;
		Ok(serde_yaml::from_slice(&bytes)?)
	}
}

/// Merges a file-sourced `RawConfig` (if any) with CLI flags, CLI flags
/// winning on every field, then checks the invariants a raw merge can't
/// express in types alone (exactly one config source, a listen address is
/// present).
pub async fn resolve(args: Args) -> anyhow::Result<ResolvedConfig> {
	let file_cfg = match &args.config_file {
		Some(path) => RawConfig::load(path).await?,
		None => RawConfig::default(),
	};

	let listen_addr = args
		.listen_addr
		.or(file_cfg.listen_addr)
		.unwrap_or_else(|| "0.0.0.0:9000".to_string());
	let routes_file = args.routes_file.or(file_cfg.routes_file);
	let discovery_addr = args.discovery_addr.or(file_cfg.discovery_addr);
	let max_in_flight = args.max_in_flight.or(file_cfg.max_in_flight);
	let log_format = match args.log_format {
		Some(s) => parse_log_format(&s)?,
		None => file_cfg.log_format.unwrap_or_default(),
	};

	let source = match (routes_file, discovery_addr) {
		(Some(file), None) => ConfigSource::File(file),
		(None, Some(addr)) => ConfigSource::Discovery(addr),
		(Some(_), Some(_)) => anyhow::bail!("exactly one of --routes-file or --discovery-addr must be set, not both"),
		(None, None) => anyhow::bail!("one of --routes-file or --discovery-addr must be set"),
	};

	Ok(ResolvedConfig {
		listen_addr,
		source,
		max_in_flight,
		log_format,
	})
}

fn parse_log_format(s: &str) -> anyhow::Result<LogFormat> {
	match s {
		"pretty" => Ok(LogFormat::Pretty),
		"json" => Ok(LogFormat::Json),
		other => anyhow::bail!("unknown log format {other:?}, expected \"pretty\" or \"json\""),
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;

	fn bare_args() -> Args {
		Args {
			config_file: None,
			listen_addr: None,
			routes_file: None,
			discovery_addr: None,
			max_in_flight: None,
			log_format: None,
		}
	}

	#[tokio::test]
	async fn requires_exactly_one_config_source() {
		assert!(resolve(bare_args()).await.is_err());

		let mut both = bare_args();
		both.routes_file = Some("routes.yaml".into());
		both.discovery_addr = Some("http://cp:9001".to_string());
		assert!(resolve(both).await.is_err());
	}

	#[tokio::test]
	async fn routes_file_alone_resolves_to_a_file_source() {
		let mut args = bare_args();
		args.routes_file = Some("routes.yaml".into());
		let resolved = resolve(args).await.unwrap();
		assert_matches!(resolved.source, ConfigSource::File(_));
		assert_eq!(resolved.listen_addr, "0.0.0.0:9000");
	}

	#[tokio::test]
	async fn cli_listen_addr_overrides_default() {
		let mut args = bare_args();
		args.routes_file = Some("routes.yaml".into());
		args.listen_addr = Some("127.0.0.1:1234".to_string());
		let resolved = resolve(args).await.unwrap();
		assert_eq!(resolved.listen_addr, "127.0.0.1:1234");
	}

	#[test]
	fn rejects_unknown_log_format() {
		assert!(parse_log_format("xml").is_err());
		assert_matches!(parse_log_format("json").unwrap(), LogFormat::Json);
	}
}
