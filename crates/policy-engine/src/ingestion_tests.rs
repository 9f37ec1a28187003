use std::sync::Arc;

use super::*;
use crate::cel::CelEvaluator;
use crate::test_support::{self, RecordingPolicy, definition};

fn doc(route_key: &str, policy_names: &[&str]) -> RouteDocument {
	RouteDocument {
		route_key: route_key.to_string(),
		policies: policy_names
			.iter()
			.map(|n| PolicySpec {
				name: n.to_string(),
				version: "v1".to_string(),
				enabled: true,
				raw_parameters: test_support::empty_params(),
				execution_condition: None,
			})
			.collect(),
	}
}

fn registry() -> PolicyRegistry {
	test_support::registry_with(vec![(
		definition("p1", "v1"),
		Arc::new(RecordingPolicy {
			name: "p1",
			log: Default::default(),
		}) as _,
	)])
}

#[test]
fn all_chains_building_cleanly_installs_the_whole_snapshot() {
	let registry = registry();
	let cel = CelEvaluator::new();
	let docs = vec![doc("r1", &["p1"]), doc("r2", &["p1"])];
	let snapshot = compile_snapshot(&docs, &registry, &cel).unwrap();
	assert_eq!(snapshot.len(), 2);
}

#[test]
fn one_chain_failing_to_build_rejects_the_whole_snapshot() {
	let registry = registry();
	let cel = CelEvaluator::new();
	// r2 references an unknown policy; the whole snapshot must be rejected,
	// including r1 and r3 which would otherwise have built cleanly.
	let docs = vec![doc("r1", &["p1"]), doc("r2", &["unknown-policy"]), doc("r3", &["p1"])];
	let rejected = compile_snapshot(&docs, &registry, &cel).unwrap_err();
	assert_eq!(rejected.failures.len(), 1);
	assert_eq!(rejected.total, 3);
}

#[test]
fn rejected_snapshot_is_never_installed_previous_stays_active() {
	let registry = registry();
	let cel = CelEvaluator::new();
	let store = SnapshotStore::new();

	let good = vec![doc("r1", &["p1"])];
	store.install(compile_snapshot(&good, &registry, &cel).unwrap());
	assert_eq!(store.route_count(), 1);

	let bad = vec![doc("r1", &["p1"]), doc("r2", &["unknown-policy"])];
	assert!(compile_snapshot(&bad, &registry, &cel).is_err());
	// The store itself is untouched by a rejected compile: callers must not
	// call `install` on an `Err`, and we never did here.
	assert_eq!(store.route_count(), 1);
	assert!(store.get("r2").is_none());
}
