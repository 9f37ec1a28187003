use std::sync::Arc;

use assert_matches::assert_matches;
use parking_lot::Mutex;

use super::*;
use crate::cel::CelEvaluator;
use crate::chain::PolicySpec;
use crate::context::RequestContext;
use crate::policy::PolicyImplementation;
use crate::test_support::{self, CountingRateLimitPolicy, RecordingPolicy, RejectAllPolicy, SetHeaderPolicy, definition};
use crate::validator::TypedParams;

fn spec(name: &str, version: &str) -> PolicySpec {
	PolicySpec {
		name: name.to_string(),
		version: version.to_string(),
		enabled: true,
		raw_parameters: test_support::empty_params(),
		execution_condition: None,
	}
}

fn ctx() -> RequestContext {
	RequestContext::new("/x".to_string(), "GET".to_string(), "req-1".into())
}

#[test]
fn request_phase_runs_entries_in_spec_order() {
	let log = Arc::new(Mutex::new(Vec::new()));
	let registry = test_support::registry_with(vec![
		(
			definition("p1", "v1"),
			Arc::new(RecordingPolicy { name: "p1", log: log.clone() }) as _,
		),
		(
			definition("p2", "v1"),
			Arc::new(RecordingPolicy { name: "p2", log: log.clone() }) as _,
		),
		(
			definition("p3", "v1"),
			Arc::new(RecordingPolicy { name: "p3", log: log.clone() }) as _,
		),
	]);
	let cel = CelEvaluator::new();
	let chain = PolicyChain::compile("r1".into(), &[spec("p1", "v1"), spec("p2", "v1"), spec("p3", "v1")], &registry, &cel).unwrap();
	let mut c = ctx();
	execute_request(&chain, &mut c).unwrap();
	assert_eq!(*log.lock(), vec!["p1:request", "p2:request", "p3:request"]);
}

#[test]
fn response_phase_runs_entries_in_reverse_spec_order() {
	let log = Arc::new(Mutex::new(Vec::new()));
	let registry = test_support::registry_with(vec![
		(
			definition("p1", "v1"),
			Arc::new(RecordingPolicy { name: "p1", log: log.clone() }) as _,
		),
		(
			definition("p2", "v1"),
			Arc::new(RecordingPolicy { name: "p2", log: log.clone() }) as _,
		),
		(
			definition("p3", "v1"),
			Arc::new(RecordingPolicy { name: "p3", log: log.clone() }) as _,
		),
	]);
	let cel = CelEvaluator::new();
	let chain = PolicyChain::compile("r1".into(), &[spec("p1", "v1"), spec("p2", "v1"), spec("p3", "v1")], &registry, &cel).unwrap();
	let req_ctx = ctx();
	let mut response_ctx = crate::context::ResponseContext::from_request(&req_ctx, 200);
	execute_response(&chain, None, &mut response_ctx).unwrap();
	assert_eq!(*log.lock(), vec!["p3:response", "p2:response", "p1:response"]);
}

#[test]
fn immediate_response_short_circuits_remaining_request_policies() {
	let log = Arc::new(Mutex::new(Vec::new()));
	let registry = test_support::registry_with(vec![
		(definition("auth", "v1"), Arc::new(RejectAllPolicy { status: 401 }) as _),
		(
			definition("ratelimit", "v1"),
			Arc::new(RecordingPolicy {
				name: "ratelimit",
				log: log.clone(),
			}) as _,
		),
	]);
	let cel = CelEvaluator::new();
	let chain = PolicyChain::compile("r1".into(), &[spec("auth", "v1"), spec("ratelimit", "v1")], &registry, &cel).unwrap();
	let mut c = ctx();
	let result = execute_request(&chain, &mut c).unwrap();
	assert!(result.short_circuited);
	assert_eq!(result.final_action.as_ref().unwrap().status_code, 401);
	assert_eq!(result.entries.len(), 1, "ratelimit must never have been invoked");
	assert!(log.lock().is_empty());
}

#[test]
fn disabled_entry_is_skipped_without_invoking_implementation() {
	let log = Arc::new(Mutex::new(Vec::new()));
	let registry = test_support::registry_with(vec![(
		definition("p1", "v1"),
		Arc::new(RecordingPolicy { name: "p1", log: log.clone() }) as _,
	)]);
	let cel = CelEvaluator::new();
	let mut s = spec("p1", "v1");
	s.enabled = false;
	let chain = PolicyChain::compile("r1".into(), &[s], &registry, &cel).unwrap();
	let mut c = ctx();
	let result = execute_request(&chain, &mut c).unwrap();
	assert_matches!(result.entries[0].outcome, EntryOutcome::Skipped(SkipReason::Disabled));
	assert!(log.lock().is_empty());
}

#[test]
fn false_condition_skips_without_invoking_true_condition_invokes() {
	let log = Arc::new(Mutex::new(Vec::new()));
	let registry = test_support::registry_with(vec![(
		definition("p1", "v1"),
		Arc::new(RecordingPolicy { name: "p1", log: log.clone() }) as _,
	)]);
	let cel = CelEvaluator::new();

	let mut false_spec = spec("p1", "v1");
	false_spec.execution_condition = Some("request.method == 'POST'".to_string());
	let chain = PolicyChain::compile("r1".into(), &[false_spec], &registry, &cel).unwrap();
	let mut c = ctx();
	let result = execute_request(&chain, &mut c).unwrap();
	assert_matches!(result.entries[0].outcome, EntryOutcome::Skipped(SkipReason::ConditionNotMet));
	assert!(log.lock().is_empty());

	let mut true_spec = spec("p1", "v1");
	true_spec.execution_condition = Some("request.method == 'GET'".to_string());
	let chain2 = PolicyChain::compile("r1".into(), &[true_spec], &registry, &cel).unwrap();
	let mut c2 = ctx();
	execute_request(&chain2, &mut c2).unwrap();
	assert_eq!(*log.lock(), vec!["p1:request"]);
}

#[test]
fn header_set_by_one_policy_is_visible_to_the_next() {
	let registry = test_support::registry_with(vec![
		(
			definition("setheader", "v1"),
			Arc::new(SetHeaderPolicy {
				name: "x-custom",
				value: "a",
			}) as _,
		),
		(definition("observer", "v1"), Arc::new(HeaderObserverPolicy) as _),
	]);
	let cel = CelEvaluator::new();
	let chain = PolicyChain::compile("r1".into(), &[spec("setheader", "v1"), spec("observer", "v1")], &registry, &cel).unwrap();
	let mut c = ctx();
	execute_request(&chain, &mut c).unwrap();
	assert_eq!(c.headers.get("x-custom"), Some(["a".to_string()].as_slice()));
}

struct HeaderObserverPolicy;
impl PolicyImplementation for HeaderObserverPolicy {
	fn on_request(&self, ctx: &mut RequestContext, _params: &TypedParams) -> Option<RequestAction> {
		assert_eq!(ctx.headers.get("x-custom"), Some(["a".to_string()].as_slice()));
		None
	}
}

#[test]
fn panicking_policy_is_recovered_and_chain_continues() {
	let log = Arc::new(Mutex::new(Vec::new()));
	let registry = test_support::registry_with(vec![
		(definition("boom", "v1"), Arc::new(PanickingPolicy) as _),
		(
			definition("after", "v1"),
			Arc::new(RecordingPolicy { name: "after", log: log.clone() }) as _,
		),
	]);
	let cel = CelEvaluator::new();
	let chain = PolicyChain::compile("r1".into(), &[spec("boom", "v1"), spec("after", "v1")], &registry, &cel).unwrap();
	let mut c = ctx();
	let result = execute_request(&chain, &mut c).unwrap();
	assert_matches!(result.entries[0].outcome, EntryOutcome::Panicked);
	assert_eq!(*log.lock(), vec!["after:request"]);
}

struct PanickingPolicy;
impl PolicyImplementation for PanickingPolicy {
	fn on_request(&self, _ctx: &mut RequestContext, _params: &TypedParams) -> Option<RequestAction> {
		panic!("boom");
	}
}

#[test]
fn rate_limit_allows_up_to_limit_then_rejects() {
	let registry = test_support::registry_with(vec![(
		definition("ratelimit", "v1"),
		Arc::new(CountingRateLimitPolicy {
			limit: 3,
			count: Default::default(),
		}) as _,
	)]);
	let cel = CelEvaluator::new();
	let chain = PolicyChain::compile("r1".into(), &[spec("ratelimit", "v1")], &registry, &cel).unwrap();

	for _ in 0..3 {
		let mut c = ctx();
		let result = execute_request(&chain, &mut c).unwrap();
		assert!(!result.short_circuited);
	}
	let mut c = ctx();
	let result = execute_request(&chain, &mut c).unwrap();
	assert!(result.short_circuited);
	assert_eq!(result.final_action.unwrap().status_code, 429);
}
