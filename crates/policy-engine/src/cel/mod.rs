//! Compiles and caches boolean expressions over `request`/`response` objects.
//! Built on `cel-interpreter`, a standalone expression-language runtime,
//! rather than a hand-rolled evaluator.

mod cache;
mod context;

use std::sync::Arc;

pub use cache::CelCache;
pub use context::{BodySnapshot, EvalContext, RequestSnapshot, ResponseSnapshot};

/// Which typed environment an expression is compiled/evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
	Request,
	Response,
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum CompileError {
	#[error("failed to parse CEL expression {source:?}: {reason}")]
	Parse { source: String, reason: String },
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum RuntimeError {
	#[error("failed to evaluate CEL expression: {0}")]
	Eval(String),
	#[error("CEL expression did not evaluate to a bool")]
	NotBool,
}

/// A compiled CEL program plus the source it was compiled from, so it can be
/// re-inserted into the cache under its own key and logged on failure.
#[derive(Debug)]
pub struct CelProgram {
	pub source: Arc<str>,
	program: cel_interpreter::Program,
}

/// The process-wide CEL evaluator. `compile` is idempotent and cached across
/// every caller keyed by expression source; `evaluate` is a pure function of
/// a compiled program and a context.
#[derive(Debug, Default)]
pub struct CelEvaluator {
	cache: CelCache,
}

impl CelEvaluator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Compiles `expression` against the given environment. The environment
	/// only matters to callers that require an expression to be valid in
	/// both phases; `cel-interpreter` itself only parses the source here —
	/// type-checking is deferred to evaluation against whichever variables
	/// the context actually supplies.
	pub fn compile(&self, expression: &str, _env: Environment) -> Result<Arc<CelProgram>, CompileError> {
		self.cache.get_or_compile(expression)
	}

	pub fn evaluate(&self, program: &CelProgram, ctx: &EvalContext) -> Result<bool, RuntimeError> {
		evaluate_condition(program, ctx)
	}

	/// Exposes cache hit/miss counters for tests and metrics export.
	pub fn cache_stats(&self) -> cache::CacheStats {
		self.cache.stats()
	}
}

pub(crate) fn compile_program(source: &str) -> Result<cel_interpreter::Program, CompileError> {
	cel_interpreter::Program::compile(source).map_err(|e| CompileError::Parse {
		source: source.to_string(),
		reason: e.to_string(),
	})
}

/// Evaluates a compiled program against a context. A free function, not
/// just a method on `CelEvaluator`, since evaluation needs no cache access —
/// the executor holds compiled programs directly on each chain entry.
pub fn evaluate_condition(program: &CelProgram, ctx: &EvalContext) -> Result<bool, RuntimeError> {
	let cel_ctx = ctx.to_cel_context();
	let value = program
		.program
		.execute(&cel_ctx)
		.map_err(|e| RuntimeError::Eval(e.to_string()))?;
	match value {
		cel_interpreter::Value::Bool(b) => Ok(b),
		_ => Err(RuntimeError::NotBool),
	}
}
