//! Translates an execution result plus the context it mutated into the
//! wire frames the proxy understands. Request short-circuit and the two
//! phases' cumulative-mutation frames are each one function; the
//! `mode_override` on headers responses always reflects the chain's
//! aggregate body requirement, not anything computed per-request.

use policy_proto::ext_proc::{
	BodyMutation, BodySendMode, CommonResponse, HeaderMutation, HeaderValueOption, HttpHeader, ImmediateResponse as WireImmediateResponse,
	ProcessingMode,
};

use crate::action::ImmediateResponse;
use crate::chain::PolicyChain;
use crate::context::{Headers, RequestContext, ResponseContext};
use crate::executor::{RequestExecutionResult, ResponseExecutionResult};

/// Builds the wire `HeaderMutation` for one side of an exchange. `set_headers`
/// carries the final value of every header still present; `remove_headers`
/// carries exactly the keys that were present in `received` but are absent
/// from `current` — the only way to tell the proxy a policy actually deleted
/// a header, since omitting a key from `set_headers` alone wouldn't touch the
/// proxy's own copy of it.
fn header_mutation(received: &Headers, current: &Headers) -> HeaderMutation {
	let set_headers = current
		.iter()
		.flat_map(|(name, values)| {
			values.iter().enumerate().map(move |(i, v)| HeaderValueOption {
				header: Some(HttpHeader {
					key: name.to_string(),
					values: vec![v.clone()],
				}),
				// Only the first value for a key replaces; later values for
				// the same key append, matching setHeaders/appendHeaders
				// collapsing onto the same wire representation.
				append: i > 0,
			})
		})
		.collect();
	HeaderMutation {
		set_headers,
		remove_headers: received.removed_since(current),
	}
}

fn body_mode(required: bool) -> i32 {
	if required {
		BodySendMode::Buffered as i32
	} else {
		BodySendMode::Skip as i32
	}
}

pub fn immediate_response_frame(immediate: &ImmediateResponse) -> WireImmediateResponse {
	WireImmediateResponse {
		status: immediate.status_code as u32,
		headers: immediate
			.headers
			.iter()
			.map(|(k, v)| HeaderValueOption {
				header: Some(HttpHeader {
					key: k.clone(),
					values: vec![v.clone()],
				}),
				append: false,
			})
			.collect(),
		body: immediate.body.clone(),
		details: String::new(),
	}
}

pub fn request_common_response(chain: &PolicyChain, ctx: &RequestContext, result: &RequestExecutionResult) -> CommonResponse {
	debug_assert!(!result.short_circuited, "short-circuited phases emit an immediate response, not a common response");
	CommonResponse {
		header_mutation: Some(header_mutation(&ctx.received_headers, &ctx.headers)),
		body_mutation: ctx.body.as_ref().map(|b| BodyMutation {
			mutation: Some(policy_proto::ext_proc::body_mutation::Mutation::Body(b.content.clone())),
		}),
		new_path: Some(prost_wkt_types::StringValue { value: ctx.path.clone() }),
		new_method: Some(prost_wkt_types::StringValue { value: ctx.method.clone() }),
		new_status_code: None,
		mode_override: Some(ProcessingMode {
			request_body_mode: body_mode(chain.requires_request_body),
			response_body_mode: body_mode(chain.requires_response_body),
		}),
		clear_route_cache: false,
	}
}

pub fn response_common_response(chain: &PolicyChain, ctx: &ResponseContext, _result: &ResponseExecutionResult) -> CommonResponse {
	CommonResponse {
		header_mutation: Some(header_mutation(&ctx.received_response_headers, &ctx.response_headers)),
		body_mutation: ctx.response_body.as_ref().map(|b| BodyMutation {
			mutation: Some(policy_proto::ext_proc::body_mutation::Mutation::Body(b.content.clone())),
		}),
		new_path: None,
		new_method: None,
		new_status_code: Some(prost_wkt_types::UInt32Value {
			value: ctx.response_status as u32,
		}),
		mode_override: Some(ProcessingMode {
			request_body_mode: body_mode(chain.requires_request_body),
			response_body_mode: body_mode(chain.requires_response_body),
		}),
		clear_route_cache: false,
	}
}

/// A passthrough frame for routes with no installed chain: both body modes
/// set to SKIP, no mutations.
pub fn passthrough_common_response() -> CommonResponse {
	CommonResponse {
		header_mutation: None,
		body_mutation: None,
		new_path: None,
		new_method: None,
		new_status_code: None,
		mode_override: Some(ProcessingMode {
			request_body_mode: BodySendMode::Skip as i32,
			response_body_mode: BodySendMode::Skip as i32,
		}),
		clear_route_cache: false,
	}
}

/// Acknowledges a headers frame without running the chain yet, used when
/// that side's body is still in flight and the chain hasn't executed. Only
/// `mode_override` is populated — it's a static property of the chain, not
/// of anything the (not-yet-run) policies produced.
pub fn headers_ack_common_response(chain: &PolicyChain) -> CommonResponse {
	CommonResponse {
		header_mutation: None,
		body_mutation: None,
		new_path: None,
		new_method: None,
		new_status_code: None,
		mode_override: Some(ProcessingMode {
			request_body_mode: body_mode(chain.requires_request_body),
			response_body_mode: body_mode(chain.requires_response_body),
		}),
		clear_route_cache: false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn removed_header_is_reported_as_a_removal_not_just_a_missing_set() {
		let mut received = Headers::new();
		received.set("x-drop-me", "v".to_string());
		received.set("x-keep-me", "v".to_string());
		let mut current = received.clone();
		current.remove("x-drop-me");

		let mutation = header_mutation(&received, &current);
		assert_eq!(mutation.remove_headers, vec!["x-drop-me".to_string()]);
		assert!(
			mutation
				.set_headers
				.iter()
				.any(|h| h.header.as_ref().unwrap().key == "x-keep-me")
		);
		assert!(!mutation.set_headers.iter().any(|h| h.header.as_ref().unwrap().key == "x-drop-me"));
	}

	#[test]
	fn untouched_headers_produce_no_spurious_removal() {
		let mut received = Headers::new();
		received.set("host", "ex".to_string());
		let current = received.clone();

		let mutation = header_mutation(&received, &current);
		assert!(mutation.remove_headers.is_empty());
	}
}
