mod config;

use std::sync::Arc;

use clap::Parser;
use policy_engine::ingestion::{DiscoveryConfigSource, FileConfigSource};
use policy_engine::server::ExternalProcessorService;
use policy_engine::store::{ContextStore, SnapshotStore};
use policy_proto::ext_proc::external_processor_server::ExternalProcessorServer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = config::Args::parse();
	let cfg = config::resolve(args).await?;

	policy_core::telemetry::init(cfg.log_format);

	// No concrete policy implementations ship with this binary: the
	// embedder links its own registrations in before calling this `main`
	// equivalent, or swaps this for a binary-specific entry point that
	// builds a populated registry. An empty registry still runs; every
	// chain referencing an unregistered policy simply fails to compile.
	let registry = Arc::new(policy_engine::PolicyRegistry::builder().build());
	let cel = Arc::new(policy_engine::cel::CelEvaluator::new());
	let snapshots = Arc::new(SnapshotStore::new());
	let contexts = Arc::new(ContextStore::new(cfg.max_in_flight));

	match cfg.source {
		config::ConfigSource::File(path) => {
			let source = Arc::new(FileConfigSource::new(path));
			let registry = registry.clone();
			let cel = cel.clone();
			let snapshots = snapshots.clone();
			tokio::spawn(async move {
				if let Err(e) = source.watch(registry, cel, snapshots).await {
					tracing::error!(error = %e, "config file watch task exited");
				}
			});
		},
		config::ConfigSource::Discovery(endpoint) => {
			let source = DiscoveryConfigSource::new(endpoint);
			let registry = registry.clone();
			let cel = cel.clone();
			let snapshots = snapshots.clone();
			tokio::spawn(async move {
				if let Err(e) = source.run(registry, cel, snapshots).await {
					tracing::error!(error = %e, "discovery stream task exited");
				}
			});
		},
	}

	let addr: std::net::SocketAddr = cfg.listen_addr.parse()?;
	let service = ExternalProcessorService::new(snapshots, contexts);
	info!(%addr, "starting external processor server");

	tonic::transport::Server::builder()
		.add_service(ExternalProcessorServer::new(service))
		.serve(addr)
		.await?;

	Ok(())
}
