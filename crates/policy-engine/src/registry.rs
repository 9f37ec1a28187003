//! The process-wide table of known policy types. Populated once at startup
//! from whatever registrations the embedding binary supplies, then treated
//! as read-only: lookups never take a lock, and there is no API to remove or
//! replace an entry after construction.

use std::collections::HashMap;
use std::sync::Arc;

use policy_core::strng::Strng;

use crate::policy::{PolicyDefinition, PolicyImplementation};

#[derive(Clone)]
struct Entry {
	definition: Arc<PolicyDefinition>,
	implementation: Arc<dyn PolicyImplementation>,
}

/// Lookup is exact on `(name, version)` — no semver resolution, no
/// fallback. A missing key at chain-compile time surfaces as
/// `ChainBuildError::UnknownPolicy`, never as a silent default.
#[derive(Clone, Default)]
pub struct PolicyRegistry {
	entries: HashMap<(Strng, Strng), Entry>,
}

pub struct PolicyRegistryBuilder {
	entries: HashMap<(Strng, Strng), Entry>,
}

impl PolicyRegistryBuilder {
	pub fn new() -> Self {
		Self {
			entries: HashMap::new(),
		}
	}

	/// Registers one policy type. Panics on a duplicate `(name, version)`
	/// key: two build-generated registrations colliding is a packaging bug,
	/// not a runtime condition a caller should recover from.
	pub fn register(mut self, definition: PolicyDefinition, implementation: Arc<dyn PolicyImplementation>) -> Self {
		let key = definition.key();
		let entry = Entry {
			definition: Arc::new(definition),
			implementation,
		};
		if self.entries.insert(key.clone(), entry).is_some() {
			panic!("duplicate policy registration for {}@{}", key.0, key.1);
		}
		self
	}

	pub fn build(self) -> PolicyRegistry {
		PolicyRegistry { entries: self.entries }
	}
}

impl Default for PolicyRegistryBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl PolicyRegistry {
	pub fn builder() -> PolicyRegistryBuilder {
		PolicyRegistryBuilder::new()
	}

	pub fn resolve(&self, name: &str, version: &str) -> Option<(Arc<PolicyDefinition>, Arc<dyn PolicyImplementation>)> {
		self
			.entries
			.get(&(Strng::from(name), Strng::from(version)))
			.map(|e| (e.definition.clone(), e.implementation.clone()))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use crate::test_support::{RecordingPolicy, definition};

	use super::*;

	#[test]
	fn resolve_is_exact_on_name_and_version_no_fallback() {
		let registry = PolicyRegistry::builder()
			.register(
				definition("auth", "v1"),
				Arc::new(RecordingPolicy {
					name: "auth",
					log: Default::default(),
				}),
			)
			.build();
		assert!(registry.resolve("auth", "v1").is_some());
		assert!(registry.resolve("auth", "v2").is_none());
		assert!(registry.resolve("other", "v1").is_none());
	}

	#[test]
	#[should_panic(expected = "duplicate policy registration")]
	fn duplicate_registration_panics() {
		PolicyRegistry::builder()
			.register(
				definition("auth", "v1"),
				Arc::new(RecordingPolicy {
					name: "auth",
					log: Default::default(),
				}),
			)
			.register(
				definition("auth", "v1"),
				Arc::new(RecordingPolicy {
					name: "auth",
					log: Default::default(),
				}),
			);
	}
}
