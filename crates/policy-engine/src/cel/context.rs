use std::collections::HashMap;
use std::sync::Arc;

use cel_interpreter::objects::{Key, Map as CelMap};
use cel_interpreter::{Context, Value};
use serde_json::Value as JsonValue;

/// The `content`/`endOfStream`/`present` triple a CEL expression sees for
/// `request.body`/`response.body`, mirroring `crate::context::Body` without
/// depending on it directly — this module stays a narrow, read-only
/// projection rather than reusing the live, mutable context types.
#[derive(Debug, Clone, Default)]
pub struct BodySnapshot {
	pub content: Vec<u8>,
	pub end_of_stream: bool,
	pub present: bool,
}

/// What a `request`-environment CEL expression can see: headers, path and
/// method, the body's `content`/`endOfStream`/`present` fields, and the
/// shared metadata bag.
#[derive(Debug, Clone, Default)]
pub struct RequestSnapshot {
	pub request_id: String,
	pub method: String,
	pub path: String,
	pub headers: HashMap<String, Vec<String>>,
	pub body: BodySnapshot,
	pub metadata: HashMap<String, JsonValue>,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseSnapshot {
	pub request_id: String,
	pub status: u16,
	pub headers: HashMap<String, Vec<String>>,
	pub body: BodySnapshot,
	pub metadata: HashMap<String, JsonValue>,
}

/// The evaluation-time view handed to `CelEvaluator::evaluate`. Built fresh
/// per call from whichever context (request or response phase) is live;
/// cheap, since it borrows rather than clones the underlying snapshots.
pub enum EvalContext<'a> {
	Request(&'a RequestSnapshot),
	Response {
		request: Option<&'a RequestSnapshot>,
		response: &'a ResponseSnapshot,
	},
}

impl<'a> EvalContext<'a> {
	pub fn for_request(snapshot: &'a RequestSnapshot) -> Self {
		EvalContext::Request(snapshot)
	}

	pub fn for_response(request: Option<&'a RequestSnapshot>, response: &'a ResponseSnapshot) -> Self {
		EvalContext::Response { request, response }
	}

	pub(crate) fn to_cel_context(&self) -> Context<'static> {
		let mut ctx = Context::default();
		match self {
			EvalContext::Request(req) => {
				let _ = ctx.add_variable("request", request_value(req));
			},
			EvalContext::Response { request, response } => {
				if let Some(req) = request {
					let _ = ctx.add_variable("request", request_value(req));
				}
				let _ = ctx.add_variable("response", response_value(response));
			},
		}
		ctx
	}
}

fn headers_value(headers: &HashMap<String, Vec<String>>) -> Value {
	let mut map = HashMap::new();
	for (k, v) in headers {
		let list = Value::List(Arc::new(v.iter().cloned().map(|s| Value::String(Arc::new(s))).collect()));
		map.insert(Key::String(Arc::new(k.to_lowercase())), list);
	}
	Value::Map(CelMap { map: Arc::new(map) })
}

fn metadata_value(metadata: &HashMap<String, JsonValue>) -> Value {
	let mut map = HashMap::new();
	for (k, v) in metadata {
		map.insert(Key::String(Arc::new(k.clone())), json_to_cel(v));
	}
	Value::Map(CelMap { map: Arc::new(map) })
}

fn json_to_cel(v: &JsonValue) -> Value {
	match v {
		JsonValue::Null => Value::Null,
		JsonValue::Bool(b) => Value::Bool(*b),
		JsonValue::Number(n) => {
			if let Some(i) = n.as_i64() {
				Value::Int(i)
			} else {
				Value::Float(n.as_f64().unwrap_or_default())
			}
		},
		JsonValue::String(s) => Value::String(Arc::new(s.clone())),
		JsonValue::Array(a) => Value::List(Arc::new(a.iter().map(json_to_cel).collect())),
		JsonValue::Object(o) => {
			let mut map = HashMap::new();
			for (k, v) in o {
				map.insert(Key::String(Arc::new(k.clone())), json_to_cel(v));
			}
			Value::Map(CelMap { map: Arc::new(map) })
		},
	}
}

fn body_value(body: &BodySnapshot) -> Value {
	let mut map = HashMap::new();
	map.insert(
		Key::String(Arc::new("content".to_string())),
		Value::Bytes(Arc::new(body.content.clone())),
	);
	map.insert(Key::String(Arc::new("endOfStream".to_string())), Value::Bool(body.end_of_stream));
	map.insert(Key::String(Arc::new("present".to_string())), Value::Bool(body.present));
	Value::Map(CelMap { map: Arc::new(map) })
}

fn request_value(req: &RequestSnapshot) -> Value {
	let mut map = HashMap::new();
	map.insert(
		Key::String(Arc::new("requestId".to_string())),
		Value::String(Arc::new(req.request_id.clone())),
	);
	map.insert(Key::String(Arc::new("method".to_string())), Value::String(Arc::new(req.method.clone())));
	map.insert(Key::String(Arc::new("path".to_string())), Value::String(Arc::new(req.path.clone())));
	map.insert(Key::String(Arc::new("headers".to_string())), headers_value(&req.headers));
	map.insert(Key::String(Arc::new("body".to_string())), body_value(&req.body));
	map.insert(Key::String(Arc::new("metadata".to_string())), metadata_value(&req.metadata));
	Value::Map(CelMap { map: Arc::new(map) })
}

fn response_value(resp: &ResponseSnapshot) -> Value {
	let mut map = HashMap::new();
	map.insert(
		Key::String(Arc::new("requestId".to_string())),
		Value::String(Arc::new(resp.request_id.clone())),
	);
	map.insert(Key::String(Arc::new("status".to_string())), Value::Int(resp.status as i64));
	map.insert(Key::String(Arc::new("headers".to_string())), headers_value(&resp.headers));
	map.insert(Key::String(Arc::new("body".to_string())), body_value(&resp.body));
	map.insert(Key::String(Arc::new("metadata".to_string())), metadata_value(&resp.metadata));
	Value::Map(CelMap { map: Arc::new(map) })
}
