//! The sum types a policy implementation returns from a single invocation.
//! Dispatch on these is a tag match in the executor, not a virtual call —
//! there is no base "action" trait beyond the stop/continue distinction.

use std::collections::BTreeMap;

/// What a request-phase policy asks the executor to do next.
#[derive(Debug, Clone)]
pub enum RequestAction {
	UpstreamRequestModifications(UpstreamRequestModifications),
	/// Stops the chain; the proxy returns this response without calling
	/// upstream. `StopExecution()` is true by contract for this variant.
	ImmediateResponse(ImmediateResponse),
}

/// What a response-phase policy asks the executor to do next. There is no
/// short-circuit variant here: response actions are modification-only.
#[derive(Debug, Clone)]
pub enum ResponseAction {
	UpstreamResponseModifications(UpstreamResponseModifications),
}

#[derive(Debug, Clone, Default)]
pub struct UpstreamRequestModifications {
	pub set_headers: BTreeMap<String, String>,
	pub remove_headers: Vec<String>,
	pub append_headers: BTreeMap<String, Vec<String>>,
	pub body: Option<Vec<u8>>,
	pub path: Option<String>,
	pub add_query_parameters: BTreeMap<String, Vec<String>>,
	pub remove_query_parameters: Vec<String>,
	pub method: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpstreamResponseModifications {
	pub set_headers: BTreeMap<String, String>,
	pub remove_headers: Vec<String>,
	pub append_headers: BTreeMap<String, Vec<String>>,
	pub body: Option<Vec<u8>>,
	pub status_code: Option<u16>,
}

#[derive(Debug, Clone, Default)]
pub struct ImmediateResponse {
	pub status_code: u16,
	pub headers: BTreeMap<String, String>,
	pub body: Vec<u8>,
}
