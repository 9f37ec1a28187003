mod context_store;
mod snapshot;

pub use context_store::{ContextStore, StoredExchange};
pub use snapshot::{Snapshot, SnapshotStore};
