//! A `PolicyDefinition` is the immutable identity and schema of a policy
//! type; a `PolicyImplementation` is the behavior behind it. The two are
//! always registered together (see `registry.rs`) but kept as separate types
//! because the definition is serializable bookkeeping while the
//! implementation is a trait object with real logic inside.

use policy_core::strng::Strng;

use crate::action::{RequestAction, ResponseAction};
use crate::context::{RequestContext, ResponseContext};
use crate::schema::ParameterSchema;
use crate::validator::TypedParams;

/// Identity and static shape of a policy. Immutable once registered.
#[derive(Debug, Clone)]
pub struct PolicyDefinition {
	pub name: Strng,
	pub version: Strng,
	pub description: String,
	pub supports_request_phase: bool,
	pub supports_response_phase: bool,
	pub requires_request_body: bool,
	pub requires_response_body: bool,
	pub parameters: Vec<ParameterSchema>,
}

impl PolicyDefinition {
	pub fn key(&self) -> (Strng, Strng) {
		(self.name.clone(), self.version.clone())
	}
}

/// The behavior behind a `PolicyDefinition`. A policy that only supports one
/// phase simply leaves the other method at its default, which returns
/// `None` — indistinguishable at runtime from "implemented but declined to
/// act", since Rust has no reflection over which default methods an impl
/// overrode. Build-time registration code is expected to supply at least one
/// real method consistent with `supports_request_phase`/
/// `supports_response_phase`; nothing at runtime checks this for it.
///
/// Implementations must be `Send + Sync`: the registry is read-only and
/// shared across every concurrently-handled stream, so a policy is invoked
/// from whichever task owns the exchange without further synchronization on
/// the implementation itself.
pub trait PolicyImplementation: Send + Sync {
	fn on_request(&self, _ctx: &mut RequestContext, _typed_params: &TypedParams) -> Option<RequestAction> {
		None
	}

	fn on_response(&self, _ctx: &mut ResponseContext, _typed_params: &TypedParams) -> Option<ResponseAction> {
		None
	}
}
