//! Per-process `requestId -> (RequestContext, PolicyChain)` tracking for
//! in-flight exchanges. An entry is created on the first request frame,
//! consulted (and possibly mutated further) through the request and
//! response phases, and removed on completion or stream teardown.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use policy_core::strng::Strng;
use tracing::warn;

use crate::chain::PolicyChain;
use crate::context::{RequestContext, ResponseContext};
use crate::error::ProtocolError;

/// The request-phase context plus whatever response-phase state has
/// accumulated so far. `response` is populated once the response-headers
/// frame arrives; `request_phase_ran`/`response_phase_ran` guard against
/// re-invoking a phase that already executed (e.g. a body frame arriving
/// after the chain already ran at the headers frame because no enabled
/// policy required that side's body).
pub struct StoredExchange {
	pub ctx: RequestContext,
	pub chain: Arc<PolicyChain>,
	pub request_phase_ran: bool,
	pub response: Option<ResponseContext>,
	pub response_phase_ran: bool,
}

/// Holding a chain here (via its `Arc`) is what keeps `SnapshotStore::install`
/// from ever invalidating a chain still in use by an in-flight request: the
/// chain stays alive for as long as any exchange references it, regardless
/// of how many newer snapshots have since been installed.
#[derive(Default)]
pub struct ContextStore {
	entries: Mutex<HashMap<Strng, Arc<Mutex<StoredExchange>>>>,
	/// `None` means unbounded. A configured cap turns a misbehaving or
	/// leaking proxy (one that never sends stream-end) into a bounded
	/// memory cost instead of unbounded growth.
	capacity: Option<usize>,
}

impl ContextStore {
	pub fn new(capacity: Option<usize>) -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
			capacity,
		}
	}

	/// Inserts a new exchange. A colliding request id is not rejected — the
	/// new entry wins and the collision is logged — matching proxies that
	/// share identifiers across misconfigured front ends.
	pub fn put(&self, request_id: Strng, ctx: RequestContext, chain: Arc<PolicyChain>) -> Result<(), ProtocolError> {
		let mut entries = self.entries.lock();
		if let Some(cap) = self.capacity
			&& entries.len() >= cap
			&& !entries.contains_key(&request_id)
		{
			return Err(ProtocolError::ResourceExhausted {
				detail: format!("in-flight context cap of {cap} reached"),
			});
		}
		let exchange = Arc::new(Mutex::new(StoredExchange {
			ctx,
			chain,
			request_phase_ran: false,
			response: None,
			response_phase_ran: false,
		}));
		if entries.insert(request_id.clone(), exchange).is_some() {
			let protocol_error = ProtocolError::DuplicateRequestId {
				request_id: request_id.to_string(),
			};
			warn!(%request_id, %protocol_error, "second context wins; first is dropped");
		}
		Ok(())
	}

	pub fn get(&self, request_id: &str) -> Option<Arc<Mutex<StoredExchange>>> {
		self.entries.lock().get(request_id).cloned()
	}

	pub fn remove(&self, request_id: &str) -> Option<Arc<Mutex<StoredExchange>>> {
		self.entries.lock().remove(request_id)
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;
	use crate::chain::PolicyChain;

	fn empty_chain() -> Arc<PolicyChain> {
		Arc::new(PolicyChain {
			route_key: "r1".into(),
			entries: Vec::new(),
			requires_request_body: false,
			requires_response_body: false,
			has_execution_conditions: false,
		})
	}

	fn ctx(path: &str) -> RequestContext {
		RequestContext::new(path.to_string(), "GET".to_string(), "req-1".into())
	}

	#[test]
	fn put_then_get_then_remove() {
		let store = ContextStore::new(None);
		store.put("req-1".into(), ctx("/a"), empty_chain()).unwrap();
		assert_eq!(store.len(), 1);
		assert!(store.get("req-1").is_some());
		assert!(store.remove("req-1").is_some());
		assert!(store.is_empty());
	}

	#[test]
	fn duplicate_request_id_overwrites_and_does_not_error() {
		let store = ContextStore::new(None);
		store.put("req-1".into(), ctx("/a"), empty_chain()).unwrap();
		store.put("req-1".into(), ctx("/b"), empty_chain()).unwrap();
		assert_eq!(store.len(), 1);
		let exchange = store.get("req-1").unwrap();
		assert_eq!(exchange.lock().ctx.path, "/b");
	}

	#[test]
	fn capacity_cap_rejects_new_ids_once_full() {
		let store = ContextStore::new(Some(1));
		store.put("req-1".into(), ctx("/a"), empty_chain()).unwrap();
		let err = store.put("req-2".into(), ctx("/b"), empty_chain()).unwrap_err();
		assert_matches!(err, ProtocolError::ResourceExhausted { .. });
	}

	#[test]
	fn capacity_cap_still_allows_overwriting_an_existing_id() {
		let store = ContextStore::new(Some(1));
		store.put("req-1".into(), ctx("/a"), empty_chain()).unwrap();
		store.put("req-1".into(), ctx("/b"), empty_chain()).unwrap();
		assert_eq!(store.len(), 1);
	}

	#[test]
	fn concurrent_puts_for_distinct_ids_all_land() {
		let store = Arc::new(ContextStore::new(None));
		let handles: Vec<_> = (0..50)
			.map(|i| {
				let store = store.clone();
				std::thread::spawn(move || {
					let id: Strng = format!("req-{i}").into();
					store.put(id, ctx("/a"), empty_chain()).unwrap();
				})
			})
			.collect();
		for h in handles {
			h.join().unwrap();
		}
		assert_eq!(store.len(), 50);
	}
}
