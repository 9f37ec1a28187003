use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::{CelProgram, CompileError, compile_program};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
	pub hits: u64,
	pub misses: u64,
}

/// Process-lifetime, unbounded cache of compiled programs keyed by
/// expression source. Unbounded is fine: the number of distinct expressions
/// is bounded by configuration, not by request volume. Reader-preferred with
/// double-checked compile on miss: we take the cheap read lock first, and
/// only fall to the write lock (re-checking) when the entry is actually
/// absent, so concurrent evaluators never serialize on a cache hit.
#[derive(Debug, Default)]
pub struct CelCache {
	entries: RwLock<HashMap<Arc<str>, Arc<CelProgram>>>,
	hits: AtomicU64,
	misses: AtomicU64,
}

impl CelCache {
	pub fn get_or_compile(&self, source: &str) -> Result<Arc<CelProgram>, CompileError> {
		if let Some(hit) = self.entries.read().get(source) {
			self.hits.fetch_add(1, Ordering::Relaxed);
			return Ok(hit.clone());
		}

		let mut entries = self.entries.write();
		// Double-checked: another writer may have compiled this while we
		// waited for the write lock.
		if let Some(hit) = entries.get(source) {
			self.hits.fetch_add(1, Ordering::Relaxed);
			return Ok(hit.clone());
		}

		let program = compile_program(source)?;
		let key: Arc<str> = Arc::from(source);
		let compiled = Arc::new(CelProgram {
			source: key.clone(),
			program,
		});
		entries.insert(key, compiled.clone());
		self.misses.fetch_add(1, Ordering::Relaxed);
		Ok(compiled)
	}

	pub fn stats(&self) -> CacheStats {
		CacheStats {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
		}
	}
}
