//! Stub policy implementations and small builders shared by the test
//! modules in this crate. Not compiled outside `#[cfg(test)]`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Map as JsonMap, Value as JsonValue, json};

use crate::action::{ImmediateResponse, RequestAction, ResponseAction, UpstreamRequestModifications, UpstreamResponseModifications};
use crate::context::{RequestContext, ResponseContext};
use crate::policy::{PolicyDefinition, PolicyImplementation};
use crate::registry::PolicyRegistry;
use crate::validator::TypedParams;

pub fn definition(name: &str, version: &str) -> PolicyDefinition {
	PolicyDefinition {
		name: name.into(),
		version: version.into(),
		description: String::new(),
		supports_request_phase: true,
		supports_response_phase: true,
		requires_request_body: false,
		requires_response_body: false,
		parameters: Vec::new(),
	}
}

/// Records every phase it's invoked for, in invocation order, into a shared
/// log keyed by name. Used to assert chain ordering (forward request /
/// reverse response).
pub struct RecordingPolicy {
	pub name: &'static str,
	pub log: Arc<parking_lot::Mutex<Vec<String>>>,
}

impl PolicyImplementation for RecordingPolicy {
	fn on_request(&self, _ctx: &mut RequestContext, _params: &TypedParams) -> Option<RequestAction> {
		self.log.lock().push(format!("{}:request", self.name));
		None
	}

	fn on_response(&self, _ctx: &mut ResponseContext, _params: &TypedParams) -> Option<ResponseAction> {
		self.log.lock().push(format!("{}:response", self.name));
		None
	}
}

/// Always short-circuits the request with the given status.
pub struct RejectAllPolicy {
	pub status: u16,
}

impl PolicyImplementation for RejectAllPolicy {
	fn on_request(&self, _ctx: &mut RequestContext, _params: &TypedParams) -> Option<RequestAction> {
		Some(RequestAction::ImmediateResponse(ImmediateResponse {
			status_code: self.status,
			headers: Default::default(),
			body: b"rejected".to_vec(),
		}))
	}
}

/// Counts invocations; fails shut after `limit` requests with a 429.
pub struct CountingRateLimitPolicy {
	pub limit: usize,
	pub count: AtomicUsize,
}

impl PolicyImplementation for CountingRateLimitPolicy {
	fn on_request(&self, _ctx: &mut RequestContext, _params: &TypedParams) -> Option<RequestAction> {
		let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
		if n > self.limit {
			Some(RequestAction::ImmediateResponse(ImmediateResponse {
				status_code: 429,
				headers: Default::default(),
				body: Vec::new(),
			}))
		} else {
			None
		}
	}
}

/// Sets a single request header to a fixed value.
pub struct SetHeaderPolicy {
	pub name: &'static str,
	pub value: &'static str,
}

impl PolicyImplementation for SetHeaderPolicy {
	fn on_request(&self, _ctx: &mut RequestContext, _params: &TypedParams) -> Option<RequestAction> {
		let mut set_headers = std::collections::BTreeMap::new();
		set_headers.insert(self.name.to_string(), self.value.to_string());
		Some(RequestAction::UpstreamRequestModifications(UpstreamRequestModifications {
			set_headers,
			..Default::default()
		}))
	}
}

/// Writes `metadata.user_id = "u42"` during the request phase.
pub struct AuthWritesMetadataPolicy;

impl PolicyImplementation for AuthWritesMetadataPolicy {
	fn on_request(&self, ctx: &mut RequestContext, _params: &TypedParams) -> Option<RequestAction> {
		ctx.metadata.write().insert("user_id".to_string(), json!("u42"));
		None
	}
}

/// Reads `metadata.user_id` and records it into the shared log.
pub struct ReadsMetadataPolicy {
	pub phase: &'static str,
	pub observed: Arc<parking_lot::Mutex<Vec<Option<JsonValue>>>>,
}

impl PolicyImplementation for ReadsMetadataPolicy {
	fn on_request(&self, ctx: &mut RequestContext, _params: &TypedParams) -> Option<RequestAction> {
		if self.phase == "request" {
			self
				.observed
				.lock()
				.push(ctx.metadata.read().get("user_id").cloned());
		}
		None
	}

	fn on_response(&self, ctx: &mut ResponseContext, _params: &TypedParams) -> Option<ResponseAction> {
		if self.phase == "response" {
			self
				.observed
				.lock()
				.push(ctx.metadata.read().get("user_id").cloned());
		}
		None
	}
}

pub fn empty_params() -> JsonMap<String, JsonValue> {
	JsonMap::new()
}

pub fn registry_with(entries: Vec<(PolicyDefinition, Arc<dyn PolicyImplementation>)>) -> PolicyRegistry {
	let mut builder = PolicyRegistry::builder();
	for (def, imp) in entries {
		builder = builder.register(def, imp);
	}
	builder.build()
}
