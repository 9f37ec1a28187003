//! Config ingestion: turns configuration, whether pushed over the
//! discovery-style bidirectional stream or read from a local YAML file
//! (with file watching for live reload), into a validated [`Snapshot`]
//! installed atomically in the [`SnapshotStore`]. Both modes converge on
//! the same parse, compile, install pipeline and honor the all-or-nothing
//! rule: a single chain failing to build rejects the whole snapshot, never
//! a partial install.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_full::DebounceEventResult;
use policy_core::strng::Strng;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Request;
use tracing::{error, info, warn};

use crate::cel::CelEvaluator;
use crate::chain::{PolicyChain, PolicySpec};
use crate::error::SnapshotRejected;
use crate::registry::PolicyRegistry;
use crate::store::{Snapshot, SnapshotStore};

/// The resource type URL advertised to the config plane, matching the xDS
/// convention of naming resources by their fully-qualified protobuf type.
const ROUTE_CHAIN_TYPE_URL: &str = "type.googleapis.com/policy.discovery.v1.Resource";

/// One route's chain assignment as it arrives from either ingestion mode,
/// prior to compilation.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteDocument {
	pub route_key: String,
	#[serde(default)]
	pub policies: Vec<PolicySpec>,
}

/// Compiles every route document into a chain and either returns the
/// complete snapshot or the aggregate of every chain's build failure.
/// Never returns a partial snapshot: the caller only sees `Ok` once every
/// document in `documents` compiled cleanly.
pub fn compile_snapshot(documents: &[RouteDocument], registry: &PolicyRegistry, cel: &CelEvaluator) -> Result<Snapshot, SnapshotRejected> {
	let mut snapshot = Snapshot::new();
	let mut failures = Vec::new();

	for doc in documents {
		let route_key = Strng::from(doc.route_key.as_str());
		match PolicyChain::compile(route_key.clone(), &doc.policies, registry, cel) {
			Ok(chain) => {
				snapshot.insert(route_key, Arc::new(chain));
			},
			Err(e) => failures.push(e),
		}
	}

	if failures.is_empty() {
		Ok(snapshot)
	} else {
		Err(SnapshotRejected {
			total: documents.len(),
			failures,
		})
	}
}

/// File-based config ingestion. Loads a YAML document once at startup, then
/// watches it for changes and re-runs the pipeline on every debounced
/// filesystem event; a failed reload logs and leaves the previously
/// installed snapshot in place.
pub struct FileConfigSource {
	path: PathBuf,
}

impl FileConfigSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub async fn load_once(&self, registry: &PolicyRegistry, cel: &CelEvaluator, store: &SnapshotStore) -> anyhow::Result<()> {
		let bytes = fs_err::tokio::read(&self.path).await?;
		let documents: Vec<RouteDocument> = serde_yaml::from_slice(&bytes)?;
		install_or_report(&documents, registry, cel, store, &format!("file {}", self.path.display()))
	}

	/// Runs the initial load, then watches until the process exits or the
	/// watch channel closes. Intended to be spawned as its own task.
	pub async fn watch(self: Arc<Self>, registry: Arc<PolicyRegistry>, cel: Arc<CelEvaluator>, store: Arc<SnapshotStore>) -> anyhow::Result<()> {
		if let Err(e) = self.load_once(&registry, &cel, &store).await {
			error!(error = %e, path = %self.path.display(), "initial config load failed");
		}

		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		let mut debouncer = notify_debouncer_full::new_debouncer(Duration::from_millis(200), None, move |result: DebounceEventResult| {
			let _ = tx.send(result);
		})?;
		debouncer.watch(&self.path, notify::RecursiveMode::NonRecursive)?;

		while let Some(result) = rx.recv().await {
			match result {
				Ok(events) if events.is_empty() => continue,
				Ok(_) => {
					if let Err(e) = self.load_once(&registry, &cel, &store).await {
						warn!(error = %e, path = %self.path.display(), "config file reload failed; previous snapshot retained");
					}
				},
				Err(errors) => {
					for e in errors {
						warn!(error = %e, "config file watch error");
					}
				},
			}
		}
		Ok(())
	}
}

fn install_or_report(
	documents: &[RouteDocument],
	registry: &PolicyRegistry,
	cel: &CelEvaluator,
	store: &SnapshotStore,
	source: &str,
) -> anyhow::Result<()> {
	match compile_snapshot(documents, registry, cel) {
		Ok(snapshot) => {
			let routes = snapshot.len();
			store.install(snapshot);
			info!(%source, routes, "installed config snapshot");
			Ok(())
		},
		Err(rejected) => {
			error!(%source, error = %rejected, "snapshot rejected; no chain installed");
			Err(anyhow::anyhow!(rejected))
		},
	}
}

/// Discovery-plane config ingestion: a long-lived client of the
/// `PolicyDiscoveryService` bidirectional stream. ACKs a
/// snapshot by re-requesting its `version_info`; NACKs by re-requesting the
/// last accepted version with `error_detail` populated, so the plane can
/// report why and keep serving the previous version.
pub struct DiscoveryConfigSource {
	endpoint: String,
}

impl DiscoveryConfigSource {
	pub fn new(endpoint: impl Into<String>) -> Self {
		Self { endpoint: endpoint.into() }
	}

	pub async fn run(self, registry: Arc<PolicyRegistry>, cel: Arc<CelEvaluator>, store: Arc<SnapshotStore>) -> anyhow::Result<()> {
		let channel = tonic::transport::Channel::from_shared(self.endpoint.clone())?.connect().await?;
		let mut client = policy_proto::discovery::policy_discovery_service_client::PolicyDiscoveryServiceClient::new(channel);

		let (tx, rx) = tokio::sync::mpsc::channel(4);
		let outbound = ReceiverStream::new(rx);
		let response = client.stream_policies(Request::new(outbound)).await?;
		let mut inbound = response.into_inner();

		tx
			.send(policy_proto::discovery::DiscoveryRequest {
				type_url: ROUTE_CHAIN_TYPE_URL.to_string(),
				version_info: String::new(),
				response_nonce: String::new(),
				error_detail: None,
			})
			.await?;

		let mut accepted_version = String::new();
		while let Some(response) = inbound.message().await? {
			let documents: Vec<RouteDocument> = response.resources.into_iter().map(resource_to_document).collect();
			match compile_snapshot(&documents, &registry, &cel) {
				Ok(snapshot) => {
					let routes = snapshot.len();
					store.install(snapshot);
					accepted_version = response.version_info.clone();
					info!(version = %accepted_version, routes, "installed config snapshot from discovery stream");
					tx
						.send(policy_proto::discovery::DiscoveryRequest {
							type_url: response.type_url,
							version_info: response.version_info,
							response_nonce: response.nonce,
							error_detail: None,
						})
						.await?;
				},
				Err(rejected) => {
					error!(error = %rejected, version = %response.version_info, "rejecting config snapshot; all-or-nothing");
					tx
						.send(policy_proto::discovery::DiscoveryRequest {
							type_url: response.type_url,
							version_info: accepted_version.clone(),
							response_nonce: response.nonce,
							error_detail: Some(policy_proto::discovery::Status {
								code: 3, // INVALID_ARGUMENT
								message: rejected.to_string(),
							}),
						})
						.await?;
				},
			}
		}
		Ok(())
	}
}

fn resource_to_document(resource: policy_proto::discovery::Resource) -> RouteDocument {
	RouteDocument {
		route_key: resource.route_key,
		policies: resource.policies.into_iter().map(proto_spec_to_policy_spec).collect(),
	}
}

fn proto_spec_to_policy_spec(spec: policy_proto::discovery::PolicySpec) -> PolicySpec {
	let raw_parameters = spec
		.parameters
		.and_then(|s| serde_json::to_value(s).ok())
		.and_then(|v| v.as_object().cloned())
		.unwrap_or_default();
	PolicySpec {
		name: spec.name,
		version: spec.version,
		enabled: spec.enabled,
		raw_parameters,
		execution_condition: (!spec.execution_condition.is_empty()).then_some(spec.execution_condition),
	}
}

#[cfg(test)]
#[path = "ingestion_tests.rs"]
mod tests;
