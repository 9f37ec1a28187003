//! Builds an immutable, runtime-ready `PolicyChain` out of a `routeKey` plus
//! an ordered list of `PolicySpec`s: resolves each spec against the
//! registry, validates its parameters, compiles its execution condition,
//! and derives the chain-wide body-requirement flags. A chain, once built,
//! is never mutated — a config update produces a whole new one.

use std::sync::Arc;

use policy_core::strng::Strng;
use serde_json::Map as JsonMap;

use crate::cel::{CelEvaluator, CelProgram, Environment};
use crate::error::ChainBuildError;
use crate::policy::{PolicyDefinition, PolicyImplementation};
use crate::registry::PolicyRegistry;
use crate::validator::{TypedParams, validate_bag};

/// A single policy assignment as it arrives from configuration, before
/// resolution against the registry. `Deserialize` supports the file-based
/// config ingestion path; the discovery-stream path instead converts from
/// the wire `Resource`/`PolicySpec` protobuf types.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySpec {
	pub name: String,
	pub version: String,
	#[serde(default = "default_enabled")]
	pub enabled: bool,
	#[serde(default, rename = "parameters")]
	pub raw_parameters: JsonMap<String, serde_json::Value>,
	#[serde(default)]
	pub execution_condition: Option<String>,
}

fn default_enabled() -> bool {
	true
}

/// One resolved, validated, compiled entry in a chain. Order matches input
/// order — that order is also iteration order for the request phase, and is
/// reversed for the response phase.
pub struct ChainEntry {
	pub definition: Arc<PolicyDefinition>,
	pub implementation: Arc<dyn PolicyImplementation>,
	pub enabled: bool,
	pub typed_params: TypedParams,
	pub compiled_condition: Option<Arc<CelProgram>>,
}

pub struct PolicyChain {
	pub route_key: Strng,
	pub entries: Vec<ChainEntry>,
	pub requires_request_body: bool,
	pub requires_response_body: bool,
	pub has_execution_conditions: bool,
}

impl PolicyChain {
	pub fn compile(
		route_key: Strng,
		specs: &[PolicySpec],
		registry: &PolicyRegistry,
		cel: &CelEvaluator,
	) -> Result<PolicyChain, ChainBuildError> {
		let mut resolved = Vec::with_capacity(specs.len());
		for spec in specs {
			let (definition, implementation) =
				registry
					.resolve(&spec.name, &spec.version)
					.ok_or_else(|| ChainBuildError::UnknownPolicy {
						route_key: route_key.to_string(),
						name: spec.name.clone(),
						version: spec.version.clone(),
					})?;
			resolved.push((spec, definition, implementation));
		}

		let mut errors = crate::error::ValidationError::default();
		let mut typed_per_entry = Vec::with_capacity(resolved.len());
		for (i, (spec, definition, _)) in resolved.iter().enumerate() {
			let path_prefix = format!("policies[{i}].parameters");
			match validate_bag(&spec.raw_parameters, &definition.parameters, &path_prefix) {
				Ok(typed) => typed_per_entry.push(typed),
				Err(e) => {
					errors.merge(e);
					typed_per_entry.push(TypedParams::new());
				},
			}
		}
		if !errors.is_empty() {
			return Err(ChainBuildError::InvalidParameters {
				route_key: route_key.to_string(),
				errors,
			});
		}

		let mut entries = Vec::with_capacity(resolved.len());
		for ((spec, definition, implementation), typed_params) in resolved.into_iter().zip(typed_per_entry) {
			let compiled_condition = match &spec.execution_condition {
				Some(src) if !src.is_empty() => {
					let compile_against = |env: Environment| {
						cel.compile(src, env).map_err(|e| ChainBuildError::CelCompileError {
							route_key: route_key.to_string(),
							name: spec.name.clone(),
							version: spec.version.clone(),
							reason: e.to_string(),
						})
					};
					// A policy that runs in both phases must have a condition
					// that compiles cleanly against both typed environments —
					// compiling against only one would let a condition that's
					// only valid in, say, the request environment silently
					// pass chain compilation and then fail every time the
					// response phase tries to evaluate it.
					let program = if definition.supports_request_phase {
						compile_against(Environment::Request)?
					} else {
						compile_against(Environment::Response)?
					};
					if definition.supports_request_phase && definition.supports_response_phase {
						compile_against(Environment::Response)?;
					}
					Some(program)
				},
				_ => None,
			};
			entries.push(ChainEntry {
				definition,
				implementation,
				enabled: spec.enabled,
				typed_params,
				compiled_condition,
			});
		}

		let requires_request_body = entries
			.iter()
			.any(|e| e.enabled && e.definition.requires_request_body);
		let requires_response_body = entries
			.iter()
			.any(|e| e.enabled && e.definition.requires_response_body);
		let has_execution_conditions = entries.iter().any(|e| e.compiled_condition.is_some());

		Ok(PolicyChain {
			route_key,
			entries,
			requires_request_body,
			requires_response_body,
			has_execution_conditions,
		})
	}
}

#[cfg(test)]
#[path = "chain_tests.rs"]
mod tests;
