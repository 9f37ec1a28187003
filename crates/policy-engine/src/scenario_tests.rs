//! End-to-end scenario tests exercising the full compile → execute →
//! translate pipeline against a realistic registry, independent of the
//! gRPC transport in `server.rs`.

use std::sync::Arc;

use assert_matches::assert_matches;
use policy_proto::ext_proc::BodySendMode;
use serde_json::json;

use crate::cel::CelEvaluator;
use crate::chain::{PolicyChain, PolicySpec};
use crate::context::{RequestContext, ResponseContext};
use crate::executor::{execute_request, execute_response};
use crate::registry::PolicyRegistry;
use crate::test_support::{self, AuthWritesMetadataPolicy, CountingRateLimitPolicy, ReadsMetadataPolicy, RejectAllPolicy, SetHeaderPolicy, definition};
use crate::translator;

fn spec(name: &str, version: &str) -> PolicySpec {
	PolicySpec {
		name: name.to_string(),
		version: version.to_string(),
		enabled: true,
		raw_parameters: test_support::empty_params(),
		execution_condition: None,
	}
}

/// S1 — a chain of one SetHeader policy adds `X-Custom: v1` to the upstream
/// request frame, and since no policy needs the request body the mode
/// override is SKIP.
#[test]
fn s1_set_header_request_mutation() {
	let registry = test_support::registry_with(vec![(
		definition("set-header", "v1"),
		Arc::new(SetHeaderPolicy {
			name: "x-custom",
			value: "v1",
		}) as _,
	)]);
	let cel = CelEvaluator::new();
	let chain = PolicyChain::compile("R1".into(), &[spec("set-header", "v1")], &registry, &cel).unwrap();

	let mut ctx = RequestContext::new("/any".to_string(), "GET".to_string(), "req-1".into());
	ctx.headers.set("host", "ex".to_string());
	let result = execute_request(&chain, &mut ctx).unwrap();
	assert!(!result.short_circuited);

	let frame = translator::request_common_response(&chain, &ctx, &result);
	let mutation = frame.header_mutation.unwrap();
	assert!(
		mutation
			.set_headers
			.iter()
			.any(|h| h.header.as_ref().unwrap().key == "x-custom" && h.header.as_ref().unwrap().values == vec!["v1".to_string()])
	);
	assert_eq!(frame.mode_override.unwrap().request_body_mode, BodySendMode::Skip as i32);
}

/// S2 — an auth policy that rejects everything short-circuits before a
/// downstream rate-limit policy ever runs.
#[test]
fn s2_auth_short_circuit() {
	let registry = test_support::registry_with(vec![
		(definition("auth", "v1"), Arc::new(RejectAllPolicy { status: 401 }) as _),
		(
			definition("ratelimit", "v1"),
			Arc::new(CountingRateLimitPolicy {
				limit: 1,
				count: Default::default(),
			}) as _,
		),
	]);
	let cel = CelEvaluator::new();
	let chain = PolicyChain::compile("R2".into(), &[spec("auth", "v1"), spec("ratelimit", "v1")], &registry, &cel).unwrap();

	let mut ctx = RequestContext::new("/x".to_string(), "POST".to_string(), "req-2".into());
	let result = execute_request(&chain, &mut ctx).unwrap();
	assert!(result.short_circuited);
	assert_eq!(result.final_action.as_ref().unwrap().status_code, 401);
	assert_eq!(result.entries.len(), 1, "rate limit policy must never be reached");
}

/// S3 — a conditional rate-limit policy: GET requests skip it entirely;
/// POST requests run it and it starts rejecting once its limit is reached.
#[test]
fn s3_conditional_skip_and_rate_limit() {
	let registry = test_support::registry_with(vec![(
		definition("ratelimit", "v1"),
		Arc::new(CountingRateLimitPolicy {
			limit: 5,
			count: Default::default(),
		}) as _,
	)]);
	let cel = CelEvaluator::new();
	let mut cond_spec = spec("ratelimit", "v1");
	cond_spec.execution_condition = Some("request.method in ['POST', 'PUT', 'DELETE']".to_string());
	let chain = PolicyChain::compile("R3".into(), &[cond_spec], &registry, &cel).unwrap();

	let mut get_ctx = RequestContext::new("/x".to_string(), "GET".to_string(), "req-get".into());
	let get_result = execute_request(&chain, &mut get_ctx).unwrap();
	assert!(!get_result.short_circuited);
	assert_matches!(
		get_result.entries[0].outcome,
		crate::executor::EntryOutcome::Skipped(crate::executor::SkipReason::ConditionNotMet)
	);

	let mut rejected_count = 0;
	for i in 0..10 {
		let mut post_ctx = RequestContext::new("/x".to_string(), "POST".to_string(), format!("req-post-{i}").into());
		let result = execute_request(&chain, &mut post_ctx).unwrap();
		if result.short_circuited {
			rejected_count += 1;
		}
	}
	assert_eq!(rejected_count, 5, "5 requests exceed the limit of 5 after the first 5 succeed");
}

/// S4 — metadata written during the request phase by one policy is visible
/// to another policy during the response phase, via the same shared map.
#[test]
fn s4_metadata_flows_from_request_to_response_phase() {
	let observed = Arc::new(parking_lot::Mutex::new(Vec::new()));
	let registry = test_support::registry_with(vec![
		(definition("auth", "v1"), Arc::new(AuthWritesMetadataPolicy) as _),
		(
			definition("logresponse", "v1"),
			Arc::new(ReadsMetadataPolicy {
				phase: "response",
				observed: observed.clone(),
			}) as _,
		),
	]);
	let cel = CelEvaluator::new();
	let chain = PolicyChain::compile("R4".into(), &[spec("auth", "v1"), spec("logresponse", "v1")], &registry, &cel).unwrap();

	let mut req_ctx = RequestContext::new("/x".to_string(), "GET".to_string(), "req-4".into());
	execute_request(&chain, &mut req_ctx).unwrap();

	let mut response_ctx = ResponseContext::from_request(&req_ctx, 200);
	execute_response(&chain, None, &mut response_ctx).unwrap();

	assert_eq!(observed.lock().as_slice(), [Some(json!("u42"))]);
}

/// S5 — the chain's aggregate body requirement, not anything per-request,
/// decides the mode override: a chain with no body-requiring policy emits
/// SKIP, one with an enabled body-requiring policy emits BUFFERED.
#[test]
fn s5_body_mode_flips_with_chain_contents() {
	let registry = test_support::registry_with(vec![
		(definition("set-header", "v1"), Arc::new(SetHeaderPolicy { name: "x", value: "y" }) as _),
		(
			{
				let mut d = definition("body-transform", "v1");
				d.requires_request_body = true;
				d
			},
			Arc::new(SetHeaderPolicy { name: "x", value: "y" }) as _,
		),
	]);
	let cel = CelEvaluator::new();

	let chain_a = PolicyChain::compile("R5".into(), &[spec("set-header", "v1")], &registry, &cel).unwrap();
	assert!(!chain_a.requires_request_body);

	let chain_b = PolicyChain::compile("R5".into(), &[spec("set-header", "v1"), spec("body-transform", "v1")], &registry, &cel).unwrap();
	assert!(chain_b.requires_request_body);

	let mut ctx_a = RequestContext::new("/x".to_string(), "GET".to_string(), "req-5a".into());
	let result_a = execute_request(&chain_a, &mut ctx_a).unwrap();
	let frame_a = translator::request_common_response(&chain_a, &ctx_a, &result_a);
	assert_eq!(frame_a.mode_override.unwrap().request_body_mode, BodySendMode::Skip as i32);

	let mut ctx_b = RequestContext::new("/x".to_string(), "GET".to_string(), "req-5b".into());
	let result_b = execute_request(&chain_b, &mut ctx_b).unwrap();
	let frame_b = translator::request_common_response(&chain_b, &ctx_b, &result_b);
	assert_eq!(frame_b.mode_override.unwrap().request_body_mode, BodySendMode::Buffered as i32);
}

/// S6 — a snapshot where one of several route documents references an
/// unknown policy is rejected in its entirety; the other routes, which
/// would have built cleanly on their own, are not installed either.
#[test]
fn s6_atomic_rejection_of_a_multi_route_snapshot() {
	let registry = test_support::registry_with(vec![(definition("set-header", "v1"), Arc::new(SetHeaderPolicy { name: "x", value: "y" }) as _)]);
	let cel = CelEvaluator::new();

	let docs = vec![
		crate::ingestion::RouteDocument {
			route_key: "r1".to_string(),
			policies: vec![spec("set-header", "v1")],
		},
		crate::ingestion::RouteDocument {
			route_key: "r2".to_string(),
			policies: vec![spec("unknown", "v1")],
		},
		crate::ingestion::RouteDocument {
			route_key: "r3".to_string(),
			policies: vec![spec("set-header", "v1")],
		},
	];
	let rejected = crate::ingestion::compile_snapshot(&docs, &registry, &cel).unwrap_err();
	assert_eq!(rejected.failures.len(), 1);
	assert_eq!(rejected.total, 3);
}
