//! `RequestContext` and `ResponseContext`: the mutable per-exchange records
//! policies read and write. Distinct from [`crate::cel::context`], which is
//! the narrower, read-only view a CEL expression evaluates against — these
//! types are the live state the executor mutates in place as each policy
//! runs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use policy_core::strng::{CaseInsensitive, Strng};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Metadata is allocated once per request and shared, by reference, between
/// the `RequestContext` and the `ResponseContext` built later for the same
/// exchange. Mutations made by request-phase policies are visible to
/// response-phase policies without any explicit hand-off.
pub type SharedMetadata = Arc<RwLock<JsonMap<String, JsonValue>>>;

pub fn new_metadata() -> SharedMetadata {
	Arc::new(RwLock::new(JsonMap::new()))
}

/// A body buffer, present only once the proxy has sent at least one body
/// frame. `present` distinguishes "no body sent" from "body sent and empty".
#[derive(Debug, Clone, Default)]
pub struct Body {
	pub content: Vec<u8>,
	pub end_of_stream: bool,
	pub present: bool,
}

/// An ordered, case-insensitive multimap of header name to values. Keys are
/// wrapped in `CaseInsensitive` so lookups match regardless of the casing a
/// policy or the proxy used to set them.
#[derive(Debug, Clone, Default)]
pub struct Headers {
	entries: HashMap<CaseInsensitive, Vec<String>>,
}

impl Headers {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, name: &str) -> Option<&[String]> {
		self.entries.get(&CaseInsensitive::new(name)).map(Vec::as_slice)
	}

	pub fn set(&mut self, name: &str, value: String) {
		self.entries.insert(CaseInsensitive::new(name), vec![value]);
	}

	pub fn remove(&mut self, name: &str) {
		self.entries.remove(&CaseInsensitive::new(name));
	}

	pub fn append(&mut self, name: &str, values: impl IntoIterator<Item = String>) {
		self.entries.entry(CaseInsensitive::new(name)).or_default().extend(values);
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
		self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
	}

	/// Copies into a plain `name -> values` map, the shape the wire layer and
	/// CEL snapshots both want; callers outside this module don't need to
	/// know headers are keyed case-insensitively internally.
	pub fn as_map(&self) -> HashMap<String, Vec<String>> {
		self.entries.iter().map(|(k, v)| (k.as_str().to_string(), v.clone())).collect()
	}

	/// Keys present in `self` but absent from `current` — the set a
	/// `HeaderMutation.remove_headers` needs to carry so the proxy actually
	/// drops a header a policy removed, rather than just never re-setting it.
	pub fn removed_since(&self, current: &Headers) -> Vec<String> {
		self
			.entries
			.keys()
			.filter(|k| !current.entries.contains_key(*k))
			.map(|k| k.as_str().to_string())
			.collect()
	}
}

#[derive(Debug, Clone)]
pub struct RequestContext {
	pub headers: Headers,
	/// The header set as received from the proxy, before any policy ran.
	/// Never mutated; used to diff against `headers` so removals can be
	/// reported on the wire instead of just silently dropped from the set.
	pub received_headers: Headers,
	pub body: Option<Body>,
	pub path: String,
	pub method: String,
	pub request_id: Strng,
	pub metadata: SharedMetadata,
}

impl RequestContext {
	pub fn new(path: String, method: String, request_id: Strng) -> Self {
		Self {
			headers: Headers::new(),
			received_headers: Headers::new(),
			body: None,
			path,
			method,
			request_id,
			metadata: new_metadata(),
		}
	}

	/// Installs the headers the proxy sent on the request-headers frame,
	/// keeping a copy as the removal baseline.
	pub fn set_received_headers(&mut self, headers: Headers) {
		self.received_headers = headers.clone();
		self.headers = headers;
	}

	/// The read-only view a CEL execution condition evaluates against.
	pub fn as_cel_snapshot(&self) -> crate::cel::RequestSnapshot {
		crate::cel::RequestSnapshot {
			request_id: self.request_id.to_string(),
			method: self.method.clone(),
			path: self.path.clone(),
			headers: self.headers.as_map(),
			body: body_snapshot(&self.body),
			metadata: self.metadata.read().clone().into_iter().collect(),
		}
	}
}

#[derive(Debug, Clone)]
pub struct ResponseContext {
	pub request_headers: Headers,
	pub request_body: Option<Body>,
	pub request_path: String,
	pub request_method: String,

	pub response_headers: Headers,
	/// The header set as received from the proxy on the response-headers
	/// frame, before any response-phase policy ran. See
	/// `RequestContext::received_headers`.
	pub received_response_headers: Headers,
	pub response_body: Option<Body>,
	pub response_status: u16,

	pub request_id: Strng,
	pub metadata: SharedMetadata,
}

impl ResponseContext {
	/// Snapshots the post-request-phase state of `req` and shares its
	/// metadata map by reference rather than copying it.
	pub fn from_request(req: &RequestContext, response_status: u16) -> Self {
		Self {
			request_headers: req.headers.clone(),
			request_body: req.body.clone(),
			request_path: req.path.clone(),
			request_method: req.method.clone(),
			response_headers: Headers::new(),
			received_response_headers: Headers::new(),
			response_body: None,
			response_status,
			request_id: req.request_id.clone(),
			metadata: req.metadata.clone(),
		}
	}

	/// Installs the headers the proxy sent on the response-headers frame,
	/// keeping a copy as the removal baseline.
	pub fn set_received_response_headers(&mut self, headers: Headers) {
		self.received_response_headers = headers.clone();
		self.response_headers = headers;
	}

	/// The read-only view a CEL execution condition evaluates against.
	pub fn as_cel_snapshot(&self) -> crate::cel::ResponseSnapshot {
		crate::cel::ResponseSnapshot {
			request_id: self.request_id.to_string(),
			status: self.response_status,
			headers: self.response_headers.as_map(),
			body: body_snapshot(&self.response_body),
			metadata: self.metadata.read().clone().into_iter().collect(),
		}
	}
}

fn body_snapshot(body: &Option<Body>) -> crate::cel::BodySnapshot {
	match body {
		Some(b) => crate::cel::BodySnapshot {
			content: b.content.clone(),
			end_of_stream: b.end_of_stream,
			present: b.present,
		},
		None => crate::cel::BodySnapshot::default(),
	}
}
