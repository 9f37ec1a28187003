//! Generated bindings for the two streaming RPCs the engine terminates or
//! drives: the proxy's external-processing protocol and the config plane's
//! discovery stream. Build-time codegen is wired up in `build.rs`:
//! `tonic-prost-build` for the service stubs, `prost-wkt-build` so
//! `google.protobuf.Struct` round-trips through serde for config-file (YAML)
//! ingestion as well as the wire protocol.

#[allow(clippy::all)]
pub mod ext_proc {
	include!(concat!(env!("OUT_DIR"), "/policy.ext_proc.v1.rs"));
	include!(concat!(env!("OUT_DIR"), "/policy.ext_proc.v1.serde.rs"));
}

#[allow(clippy::all)]
pub mod discovery {
	include!(concat!(env!("OUT_DIR"), "/policy.discovery.v1.rs"));
	include!(concat!(env!("OUT_DIR"), "/policy.discovery.v1.serde.rs"));
}
